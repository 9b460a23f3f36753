// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Connectionless packetization.
//!
//! The [`UdpPacketizer`] splits each outgoing message into packets of at most
//! `max_packet_bytes`. Every packet starts with an [`EthHeader`] word which
//! carries its own byte count and sequence number, and every word of the
//! packet is routed to the destination rank.
//!
//! The [`UdpDepacketizer`] strips the header, forwards the payload to the
//! receive buffers and reports an [`RxStatus`] which flags any mismatch
//! between the declared and received length. Packets addressed to another
//! rank are dropped.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::types::StreamWord;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::sim_error;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, trace, warn};

use crate::eth::{EthHeader, PacketCmd, PacketStatus, check_header_fits};
use crate::rxbuf::RxStatus;

/// Check a packet size against the datapath width.
pub fn check_packet_size(width_bytes: usize, max_packet_bytes: usize) -> Result<(), SimError> {
    check_header_fits(width_bytes)?;
    if max_packet_bytes == 0 || max_packet_bytes % width_bytes != 0 {
        return sim_error!(format!(
            "maximum packet size {max_packet_bytes} is not a multiple of the {width_bytes}B datapath"
        ));
    }
    Ok(())
}

/// Forward `num_words` payload words, marking the final one `last`.
pub(crate) async fn forward_payload(
    rx: &InPort<StreamWord>,
    tx: &OutPort<StreamWord>,
    num_words: usize,
    dest: u64,
) -> Result<u32, SimError> {
    let mut bytes = 0;
    for i in 0..num_words {
        let mut word = rx.get().await?;
        bytes += word.num_valid() as u32;
        word.last = i + 1 == num_words;
        word.dest = dest;
        tx.put(word).await?;
    }
    Ok(bytes)
}

#[derive(EntityGet, EntityDisplay)]
pub struct UdpPacketizer {
    entity: Arc<Entity>,
    width_bytes: usize,
    max_packet_bytes: usize,
    cmd: InPort<PacketCmd>,
    rx: InPort<StreamWord>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
    sts: Mutex<Option<OutPort<PacketStatus>>>,
}

impl UdpPacketizer {
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
        let tx = OutPort::new(&entity, "tx");
        let sts = OutPort::new(&entity, "sts");
        let rc_self = Arc::new(Self {
            entity,
            width_bytes,
            max_packet_bytes,
            cmd,
            rx,
            tx: Mutex::new(Some(tx)),
            sts: Mutex::new(Some(sts)),
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

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<PacketStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for UdpPacketizer {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;
        let sts = take_option!(self.sts)?;

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
                let mut header_word = header.to_word(self.width_bytes, dest);
                header_word.last = packet_bytes == 0;
                trace!(self.entity ; "packet {}", header);
                tx.put(header_word).await?;

                let num_words = packet_bytes.div_ceil(self.width_bytes);
                let bytes = forward_payload(&self.rx, &tx, num_words, dest).await?;
                sts.put(PacketStatus {
                    seqn,
                    bytes,
                    ok: true,
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
pub struct UdpDepacketizer {
    entity: Arc<Entity>,
    rank: u32,
    dest: u64,
    rx: InPort<StreamWord>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
    rx_status: Mutex<Option<OutPort<RxStatus>>>,
}

impl UdpDepacketizer {
    /// Accepts packets for `rank` and forwards their payload with `dest`.
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        rank: u32,
        width_bytes: usize,
        dest: u64,
        rx_depth: usize,
    ) -> Result<Arc<Self>, SimError> {
        check_header_fits(width_bytes)?;
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::with_capacity(&entity, "rx", rx_depth);
        let tx = OutPort::new(&entity, "tx");
        let rx_status = OutPort::new(&entity, "rx_status");
        let rc_self = Arc::new(Self {
            entity,
            rank,
            dest,
            rx,
            tx: Mutex::new(Some(tx)),
            rx_status: Mutex::new(Some(rx_status)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }

    pub fn connect_port_rx_status(&self, port_state: Arc<PortState<RxStatus>>) {
        connect_tx!(self.rx_status, connect ; port_state);
    }
}

/// Forward the payload following a header word until `last`.
///
/// A packet without payload still produces one empty word so that the
/// receiving DMA completes.
pub(crate) async fn forward_until_last(
    rx: &InPort<StreamWord>,
    tx: &OutPort<StreamWord>,
    header_word: &StreamWord,
    dest: u64,
) -> Result<u32, SimError> {
    if header_word.last {
        let mut empty = StreamWord::empty(header_word.width_bytes());
        empty.last = true;
        empty.dest = dest;
        tx.put(empty).await?;
        return Ok(0);
    }

    let mut bytes = 0;
    loop {
        let word = rx.get().await?;
        bytes += word.num_valid() as u32;
        let last = word.last;
        tx.put(word.with_dest(dest)).await?;
        if last {
            return Ok(bytes);
        }
    }
}

/// Discard words up to and including `last`.
pub(crate) async fn drain(rx: &InPort<StreamWord>, first: &StreamWord) -> SimResult {
    let mut last = first.last;
    while !last {
        last = rx.get().await?.last;
    }
    Ok(())
}

#[async_trait]
impl Runnable for UdpDepacketizer {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;
        let rx_status = take_option!(self.rx_status)?;

        loop {
            let header_word = self.rx.get().await?;
            let header = match EthHeader::from_word(&header_word) {
                Ok(header) => header,
                Err(e) => {
                    warn!(self.entity ; "dropping packet: {}", e);
                    drain(&self.rx, &header_word).await?;
                    continue;
                }
            };
            if header.dst != self.rank {
                warn!(self.entity ; "dropping {} for another rank", header);
                drain(&self.rx, &header_word).await?;
                continue;
            }

            let bytes = forward_until_last(&self.rx, &tx, &header_word, self.dest).await?;
            let ok = bytes == header.count;
            if !ok {
                warn!(self.entity ; "{} carried {} bytes", header, bytes);
            }
            debug!(self.entity ; "received {}", header);
            rx_status
                .put(RxStatus {
                    header,
                    bytes,
                    ok,
                    session: None,
                })
                .await?;
        }
    }
}
