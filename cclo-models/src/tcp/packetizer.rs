// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Packetization over connections.
//!
//! Packets are framed exactly as on the connectionless path, with an
//! [`EthHeader`] word followed by the payload, and are sent on the session
//! given in each [`PacketCmd`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::types::StreamWord;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, warn};

use crate::eth::{EthHeader, HEADER_BYTES, PacketCmd, PacketStatus, check_header_fits};
use crate::tcp::{SessionNotification, TcpNotification, TcpTxMeta, TcpTxStatus};
use crate::udp::{check_packet_size, drain, forward_payload, forward_until_last};

#[derive(EntityGet, EntityDisplay)]
pub struct TcpPacketizer {
    entity: Arc<Entity>,
    width_bytes: usize,
    max_packet_bytes: usize,
    cmd: InPort<PacketCmd>,
    rx: InPort<StreamWord>,
    sts: Mutex<Option<OutPort<PacketStatus>>>,
    tx_cmd: Mutex<Option<OutPort<TcpTxMeta>>>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
    tx_sts: InPort<TcpTxStatus>,
}

impl TcpPacketizer {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        width_bytes: usize,
        max_packet_bytes: usize,
    ) -> Result<Arc<Self>, SimError> {
        check_packet_size(width_bytes, max_packet_bytes)?;
        let entity = Arc::new(Entity::new(parent, name));
        let cmd = InPort::new(&entity, "cmd");
        let rx = InPort::new(&entity, "rx");
        let sts = OutPort::new(&entity, "sts");
        let tx_cmd = OutPort::new(&entity, "tx_cmd");
        let tx = OutPort::new(&entity, "tx");
        let tx_sts = InPort::new(&entity, "tx_sts");
        let rc_self = Arc::new(Self {
            entity,
            width_bytes,
            max_packet_bytes,
            cmd,
            rx,
            sts: Mutex::new(Some(sts)),
            tx_cmd: Mutex::new(Some(tx_cmd)),
            tx: Mutex::new(Some(tx)),
            tx_sts,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<PacketCmd>> {
        self.cmd.state()
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<PacketStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }

    pub fn connect_port_tx_cmd(&self, port_state: Arc<PortState<TcpTxMeta>>) {
        connect_tx!(self.tx_cmd, connect ; port_state);
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }

    #[must_use]
    pub fn port_tx_sts(&self) -> Arc<PortState<TcpTxStatus>> {
        self.tx_sts.state()
    }
}

#[async_trait]
impl Runnable for TcpPacketizer {
    async fn run(&self) -> SimResult {
        let sts = take_option!(self.sts)?;
        let tx_cmd = take_option!(self.tx_cmd)?;
        let tx = take_option!(self.tx)?;

        loop {
            let cmd = self.cmd.get().await?;
            debug!(self.entity ; "send {}", cmd);
            let dest = u64::from(cmd.header.dst);

            let mut remaining = cmd.header.count as usize;
            let mut seqn = cmd.header.seqn;
            loop {
                let packet_bytes = remaining.min(self.max_packet_bytes);
                let header = EthHeader {
                    count: packet_bytes as u32,
                    seqn,
                    ..cmd.header
                };
                tx_cmd
                    .put(TcpTxMeta {
                        session: cmd.session,
                        length: (HEADER_BYTES + packet_bytes) as u32,
                    })
                    .await?;

                let mut header_word = header.to_word(self.width_bytes, dest);
                header_word.last = packet_bytes == 0;
                tx.put(header_word).await?;
                let num_words = packet_bytes.div_ceil(self.width_bytes);
                let bytes = forward_payload(&self.rx, &tx, num_words, dest).await?;

                let status = self.tx_sts.get().await?;
                sts.put(PacketStatus {
                    seqn,
                    bytes,
                    ok: status.ok,
                })
                .await?;

                remaining -= packet_bytes;
                seqn = seqn.wrapping_add(1);
                if remaining == 0 {
                    break;
                }
            }
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct TcpDepacketizer {
    entity: Arc<Entity>,
    rank: u32,
    dest: u64,
    notif: InPort<TcpNotification>,
    rx: InPort<StreamWord>,
    session_notif: Mutex<Option<OutPort<SessionNotification>>>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
}

impl TcpDepacketizer {
    /// Accepts packets for `rank` and forwards their payload with `dest`.
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        rank: u32,
        width_bytes: usize,
        dest: u64,
    ) -> Result<Arc<Self>, SimError> {
        check_header_fits(width_bytes)?;
        let entity = Arc::new(Entity::new(parent, name));
        let notif = InPort::new(&entity, "notif");
        let rx = InPort::new(&entity, "rx");
        let session_notif = OutPort::new(&entity, "session_notif");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Arc::new(Self {
            entity,
            rank,
            dest,
            notif,
            rx,
            session_notif: Mutex::new(Some(session_notif)),
            tx: Mutex::new(Some(tx)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_notif(&self) -> Arc<PortState<TcpNotification>> {
        self.notif.state()
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_session_notif(&self, port_state: Arc<PortState<SessionNotification>>) {
        connect_tx!(self.session_notif, connect ; port_state);
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for TcpDepacketizer {
    async fn run(&self) -> SimResult {
        let session_notif = take_option!(self.session_notif)?;
        let tx = take_option!(self.tx)?;

        loop {
            let notification = self.notif.get().await?;
            let header_word = self.rx.get().await?;
            let header = match EthHeader::from_word(&header_word) {
                Ok(header) => header,
                Err(e) => {
                    warn!(self.entity ; "dropping {}: {}", notification, e);
                    drain(&self.rx, &header_word).await?;
                    continue;
                }
            };
            if header.dst != self.rank {
                warn!(self.entity ; "dropping {} for another rank", header);
                drain(&self.rx, &header_word).await?;
                continue;
            }

            let session = notification.session;
            debug!(self.entity ; "session {}: {}", session, header);
            session_notif.put(SessionNotification { session, header }).await?;

            let bytes = forward_until_last(&self.rx, &tx, &header_word, self.dest).await?;
            if bytes != header.count {
                warn!(self.entity ; "{} carried {} bytes", header, bytes);
            }
        }
    }
}
