// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A stand-in for a hardware TCP offload stack.
//!
//! The stack answers listen and open requests against the shared
//! [`TcpNetwork`], sends data on open sessions across the relay fabric and
//! hands arriving data to the receive handler on request.
//!
//! Data crosses the relay as a frame: one word holding the sending rank, the
//! receiving session and the length, followed by the data words.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::types::StreamWord;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState, select_ready};
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, trace, warn};
use futures::future::try_join3;

use crate::tcp::{
    ListenRequest, ListenStatus, OpenRequest, OpenStatus, TcpNetwork, TcpNotification,
    TcpTxMeta, TcpTxStatus,
};

const FRAME_HEADER_BYTES: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FrameHeader {
    src_rank: u32,
    session: u32,
    length: u32,
}

impl FrameHeader {
    fn to_word(self, width_bytes: usize, dest: u64) -> StreamWord {
        let mut bytes = [0; FRAME_HEADER_BYTES];
        bytes[0..4].copy_from_slice(&self.src_rank.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.session.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        StreamWord::from_bytes(&bytes, width_bytes, false, dest)
    }

    fn from_word(word: &StreamWord) -> Result<Self, SimError> {
        let bytes: Vec<u8> = word.valid_bytes().collect();
        if bytes.len() < FRAME_HEADER_BYTES {
            return Err(SimError(format!(
                "frame header needs {FRAME_HEADER_BYTES} bytes, got {}",
                bytes.len()
            )));
        }
        let field = |i: usize| {
            let mut le = [0; 4];
            le.copy_from_slice(&bytes[i * 4..(i + 1) * 4]);
            u32::from_le_bytes(le)
        };
        Ok(Self {
            src_rank: field(0),
            session: field(1),
            length: field(2),
        })
    }
}

/// Collect words up to and including `last`.
async fn collect_frame(rx: &InPort<StreamWord>) -> Result<Vec<StreamWord>, SimError> {
    let mut words = Vec::new();
    loop {
        let word = rx.get().await?;
        let last = word.last;
        words.push(word);
        if last {
            return Ok(words);
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct DummyTcpStack {
    entity: Arc<Entity>,
    rank: u32,
    width_bytes: usize,
    network: Arc<TcpNetwork>,

    listen_req: InPort<ListenRequest>,
    listen_sts: Mutex<Option<OutPort<ListenStatus>>>,
    open_req: InPort<u64>,
    open_sts: Mutex<Option<OutPort<OpenStatus>>>,

    tx_meta: InPort<TcpTxMeta>,
    tx_data: InPort<StreamWord>,
    tx_sts: Mutex<Option<OutPort<TcpTxStatus>>>,
    egress: Mutex<Option<OutPort<StreamWord>>>,

    ingress: InPort<StreamWord>,
    notif: Mutex<Option<OutPort<TcpNotification>>>,
    read_pkg: InPort<u32>,
    rx_meta: Mutex<Option<OutPort<u32>>>,
    rx_data: Mutex<Option<OutPort<StreamWord>>>,
}

impl DummyTcpStack {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        rank: u32,
        width_bytes: usize,
        network: &Arc<TcpNetwork>,
        ingress_depth: usize,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let listen_req = InPort::new(&entity, "listen_req");
        let listen_sts = OutPort::new(&entity, "listen_sts");
        let open_req = InPort::new(&entity, "open_req");
        let open_sts = OutPort::new(&entity, "open_sts");
        let tx_meta = InPort::new(&entity, "tx_meta");
        let tx_data = InPort::new(&entity, "tx_data");
        let tx_sts = OutPort::new(&entity, "tx_sts");
        let egress = OutPort::new(&entity, "egress");
        let ingress = InPort::with_capacity(&entity, "ingress", ingress_depth);
        let notif = OutPort::new(&entity, "notif");
        let read_pkg = InPort::new(&entity, "read_pkg");
        let rx_meta = OutPort::new(&entity, "rx_meta");
        let rx_data = OutPort::new(&entity, "rx_data");
        let rc_self = Arc::new(Self {
            entity,
            rank,
            width_bytes,
            network: network.clone(),
            listen_req,
            listen_sts: Mutex::new(Some(listen_sts)),
            open_req,
            open_sts: Mutex::new(Some(open_sts)),
            tx_meta,
            tx_data,
            tx_sts: Mutex::new(Some(tx_sts)),
            egress: Mutex::new(Some(egress)),
            ingress,
            notif: Mutex::new(Some(notif)),
            read_pkg,
            rx_meta: Mutex::new(Some(rx_meta)),
            rx_data: Mutex::new(Some(rx_data)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_listen_req(&self) -> Arc<PortState<ListenRequest>> {
        self.listen_req.state()
    }

    pub fn connect_port_listen_sts(&self, port_state: Arc<PortState<ListenStatus>>) {
        connect_tx!(self.listen_sts, connect ; port_state);
    }

    #[must_use]
    pub fn port_open_req(&self) -> Arc<PortState<u64>> {
        self.open_req.state()
    }

    pub fn connect_port_open_sts(&self, port_state: Arc<PortState<OpenStatus>>) {
        connect_tx!(self.open_sts, connect ; port_state);
    }

    #[must_use]
    pub fn port_tx_meta(&self) -> Arc<PortState<TcpTxMeta>> {
        self.tx_meta.state()
    }

    #[must_use]
    pub fn port_tx_data(&self) -> Arc<PortState<StreamWord>> {
        self.tx_data.state()
    }

    pub fn connect_port_tx_sts(&self, port_state: Arc<PortState<TcpTxStatus>>) {
        connect_tx!(self.tx_sts, connect ; port_state);
    }

    pub fn connect_port_egress(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.egress, connect ; port_state);
    }

    #[must_use]
    pub fn port_ingress(&self) -> Arc<PortState<StreamWord>> {
        self.ingress.state()
    }

    pub fn connect_port_notif(&self, port_state: Arc<PortState<TcpNotification>>) {
        connect_tx!(self.notif, connect ; port_state);
    }

    #[must_use]
    pub fn port_read_pkg(&self) -> Arc<PortState<u32>> {
        self.read_pkg.state()
    }

    pub fn connect_port_rx_meta(&self, port_state: Arc<PortState<u32>>) {
        connect_tx!(self.rx_meta, connect ; port_state);
    }

    pub fn connect_port_rx_data(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.rx_data, connect ; port_state);
    }

    async fn run_control(
        &self,
        listen_sts: OutPort<ListenStatus>,
        open_sts: OutPort<OpenStatus>,
    ) -> SimResult {
        loop {
            match select_ready(&[&self.listen_req, &self.open_req]).await? {
                0 => {
                    let req = self.listen_req.get().await?;
                    let ok = self.network.listen(self.rank, req.port);
                    debug!(self.entity ; "{} ok={}", req, ok);
                    listen_sts.put(ListenStatus { port: req.port, ok }).await?;
                }
                _ => {
                    let req = OpenRequest::unpack(self.open_req.get().await?);
                    let status = match self.network.open(self.rank, req.ip, req.port) {
                        Ok(session) => OpenStatus {
                            session,
                            ip: req.ip,
                            port: req.port,
                            ok: true,
                        },
                        Err(e) => {
                            warn!(self.entity ; "{}: {}", req, e);
                            OpenStatus {
                                session: u32::MAX,
                                ip: req.ip,
                                port: req.port,
                                ok: false,
                            }
                        }
                    };
                    debug!(self.entity ; "{}", status);
                    open_sts.put(status).await?;
                }
            }
        }
    }

    async fn run_tx(&self, tx_sts: OutPort<TcpTxStatus>, egress: OutPort<StreamWord>) -> SimResult {
        loop {
            let meta = self.tx_meta.get().await?;
            let words = collect_frame(&self.tx_data).await?;

            let ok = match self.network.route(self.rank, meta.session) {
                Some(route) => {
                    let dest = u64::from(route.remote_rank);
                    let header = FrameHeader {
                        src_rank: self.rank,
                        session: route.remote_session,
                        length: meta.length,
                    };
                    trace!(self.entity ; "{} to rank {}", meta, route.remote_rank);
                    egress.put(header.to_word(self.width_bytes, dest)).await?;
                    for word in words {
                        egress.put(word.with_dest(dest)).await?;
                    }
                    true
                }
                None => {
                    warn!(self.entity ; "{}: no such session", meta);
                    false
                }
            };
            tx_sts
                .put(TcpTxStatus {
                    session: meta.session,
                    length: meta.length,
                    ok,
                })
                .await?;
        }
    }

    async fn run_rx(
        &self,
        notif: OutPort<TcpNotification>,
        rx_meta: OutPort<u32>,
        rx_data: OutPort<StreamWord>,
    ) -> SimResult {
        loop {
            let header_word = self.ingress.get().await?;
            let header = match FrameHeader::from_word(&header_word) {
                Ok(header) if !header_word.last => header,
                Ok(_) => {
                    warn!(self.entity ; "dropping empty frame");
                    continue;
                }
                Err(e) => {
                    warn!(self.entity ; "dropping frame: {}", e);
                    if !header_word.last {
                        collect_frame(&self.ingress).await?;
                    }
                    continue;
                }
            };
            let words = collect_frame(&self.ingress).await?;
            let (session, length, src) = (header.session, header.length, header.src_rank);
            trace!(self.entity ; "{}B from rank {} on session {}", length, src, session);

            notif.put(TcpNotification { session, length }).await?;
            let read = self.read_pkg.get().await?;
            if read != session {
                warn!(self.entity ; "read of session {} while {} is pending", read, session);
            }
            rx_meta.put(session).await?;
            for word in words {
                rx_data.put(word).await?;
            }
        }
    }
}

#[async_trait]
impl Runnable for DummyTcpStack {
    async fn run(&self) -> SimResult {
        let listen_sts = take_option!(self.listen_sts)?;
        let open_sts = take_option!(self.open_sts)?;
        let tx_sts = take_option!(self.tx_sts)?;
        let egress = take_option!(self.egress)?;
        let notif = take_option!(self.notif)?;
        let rx_meta = take_option!(self.rx_meta)?;
        let rx_data = take_option!(self.rx_data)?;

        try_join3(
            self.run_control(listen_sts, open_sts),
            self.run_tx(tx_sts, egress),
            self.run_rx(notif, rx_meta, rx_data),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_word() {
        let header = FrameHeader {
            src_rank: 2,
            session: 7,
            length: 88,
        };
        let word = header.to_word(32, 1);
        assert_eq!(word.dest, 1);
        assert_eq!(word.num_valid(), FRAME_HEADER_BYTES);
        assert_eq!(FrameHeader::from_word(&word).unwrap(), header);
        assert!(FrameHeader::from_word(&StreamWord::empty(32)).is_err());
    }
}
