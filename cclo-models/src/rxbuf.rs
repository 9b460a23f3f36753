// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Management of the buffers that receive network data.
//!
//! Each buffer moves through
//! `Free => Enqueued => Notified => Sought => Free`:
//!
//!  - [`RxEnqueue`] claims free buffers and issues the DMA write command that
//!    will land the next packet in each one
//!  - [`RxDequeue`] matches each DMA write status with its buffer, marks the
//!    buffer notified and emits an [`RxNotification`]
//!  - [`RxSeek`] answers seek requests from consumers and returns released
//!    buffers to the free pool
//!
//! Only these actors change buffer state. When no buffer is free the enqueue
//! side blocks until one is released.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState, select_ready};
use cclo_engine::sim_error;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, lock, trace, warn};

use crate::dma::{DmaCommand, DmaStatus, MAX_DMA_BYTES};
use crate::eth::EthHeader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxBufferState {
    Free,
    Enqueued,
    Notified,
    Sought,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxBufferDescriptor {
    pub index: u32,
    pub address: u64,
    pub capacity: u32,
    pub state: RxBufferState,

    /// Header of the packet held, valid once notified.
    pub header: EthHeader,

    /// Bytes landed in the buffer.
    pub bytes: u32,

    /// Whether the packet arrived intact.
    pub ok: bool,

    /// Connection the packet arrived on, for connection-oriented transports.
    pub session: Option<u32>,
}

impl fmt::Display for RxBufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rxbuf{}[{:#x} {:?} {}B {}]",
            self.index, self.address, self.state, self.bytes, self.header
        )
    }
}

/// What the receive path reports about one packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxStatus {
    pub header: EthHeader,
    pub bytes: u32,
    pub ok: bool,
    pub session: Option<u32>,
}

impl fmt::Display for RxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx_sts[{} {}B {}]",
            self.header,
            self.bytes,
            if self.ok { "ok" } else { "bad" }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxNotification {
    pub index: u32,
    pub header: EthHeader,
    pub bytes: u32,
    pub ok: bool,
}

impl fmt::Display for RxNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rx_notif[buf={} {} {}B]", self.index, self.header, self.bytes)
    }
}

/// A request to locate the buffer holding a given packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxSeekRequest {
    pub src: u32,
    pub tag: u32,
    pub seqn: u32,

    /// When set, a miss is not answered until a notification newer than this
    /// generation has arrived.
    pub after_generation: Option<u64>,
}

impl fmt::Display for RxSeekRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seek[src={} tag={:#x} seqn={}]",
            self.src, self.tag, self.seqn
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxSeekResult {
    Found(RxBufferDescriptor),

    /// No match among the notified buffers as of `generation`.
    NotFound { generation: u64 },
}

impl fmt::Display for RxSeekResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxSeekResult::Found(desc) => write!(f, "found {desc}"),
            RxSeekResult::NotFound { generation } => write!(f, "not found @{generation}"),
        }
    }
}

/// The state of every receive buffer of a rank.
pub struct RxBufferTable {
    buffers: Vec<RxBufferDescriptor>,

    /// Number of notifications so far.
    generation: u64,
}

impl RxBufferTable {
    pub fn new(base_address: u64, count: u32, capacity: u32) -> Result<Self, SimError> {
        if count == 0 || capacity == 0 || capacity > MAX_DMA_BYTES {
            return sim_error!(format!(
                "invalid receive buffers: {count} of {capacity} bytes"
            ));
        }
        let buffers = (0..count)
            .map(|index| RxBufferDescriptor {
                index,
                address: base_address + u64::from(index) * u64::from(capacity),
                capacity,
                state: RxBufferState::Free,
                header: EthHeader::default(),
                bytes: 0,
                ok: false,
                session: None,
            })
            .collect();
        Ok(Self {
            buffers,
            generation: 0,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn descriptor(&self, index: u32) -> Option<&RxBufferDescriptor> {
        self.buffers.get(index as usize)
    }

    fn get_mut(&mut self, index: u32) -> Result<&mut RxBufferDescriptor, SimError> {
        self.buffers
            .get_mut(index as usize)
            .ok_or_else(|| SimError(format!("no receive buffer {index}")))
    }

    /// Claim the lowest numbered free buffer.
    pub fn claim(&mut self) -> Option<RxBufferDescriptor> {
        let desc = self
            .buffers
            .iter_mut()
            .find(|desc| desc.state == RxBufferState::Free)?;
        desc.state = RxBufferState::Enqueued;
        desc.bytes = 0;
        desc.ok = false;
        desc.session = None;
        Some(*desc)
    }

    /// Record a packet landing in an enqueued buffer.
    pub fn notify(
        &mut self,
        index: u32,
        status: &RxStatus,
    ) -> Result<RxBufferDescriptor, SimError> {
        let desc = self.get_mut(index)?;
        if desc.state != RxBufferState::Enqueued {
            return sim_error!(format!(
                "buffer {index} notified while {:?}",
                desc.state
            ));
        }
        desc.state = RxBufferState::Notified;
        desc.header = status.header;
        desc.bytes = status.bytes;
        desc.ok = status.ok;
        desc.session = status.session;
        let desc = *desc;
        self.generation += 1;
        Ok(desc)
    }

    /// Find a notified buffer holding the packet from `src` with `seqn`.
    ///
    /// A match is marked sought. A miss changes nothing.
    pub fn seek(&mut self, src: u32, tag: u32, seqn: u32) -> Option<RxBufferDescriptor> {
        let desc = self.buffers.iter_mut().find(|desc| {
            desc.state == RxBufferState::Notified && desc.header.matches(src, tag, seqn)
        })?;
        desc.state = RxBufferState::Sought;
        Some(*desc)
    }

    /// Return a buffer to the free pool. Only notified or sought buffers can
    /// be released.
    pub fn release(&mut self, index: u32) -> Result<(), SimError> {
        let desc = self.get_mut(index)?;
        match desc.state {
            RxBufferState::Notified | RxBufferState::Sought => {
                desc.state = RxBufferState::Free;
                Ok(())
            }
            state => sim_error!(format!("buffer {index} released while {state:?}")),
        }
    }
}

pub type SharedRxBufferTable = Arc<Mutex<RxBufferTable>>;

#[derive(EntityGet, EntityDisplay)]
pub struct RxEnqueue {
    entity: Arc<Entity>,
    table: SharedRxBufferTable,
    recycle: InPort<u32>,
    dma_cmd: Mutex<Option<OutPort<DmaCommand>>>,
    inflight: Mutex<Option<OutPort<u32>>>,
}

impl RxEnqueue {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        table: &SharedRxBufferTable,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let recycle = InPort::with_capacity(&entity, "recycle", lock(table).len());
        let dma_cmd = OutPort::new(&entity, "dma_cmd");
        let inflight = OutPort::new(&entity, "inflight");
        let rc_self = Arc::new(Self {
            entity,
            table: table.clone(),
            recycle,
            dma_cmd: Mutex::new(Some(dma_cmd)),
            inflight: Mutex::new(Some(inflight)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_recycle(&self) -> Arc<PortState<u32>> {
        self.recycle.state()
    }

    pub fn connect_port_dma_cmd(&self, port_state: Arc<PortState<DmaCommand>>) {
        connect_tx!(self.dma_cmd, connect ; port_state);
    }

    pub fn connect_port_inflight(&self, port_state: Arc<PortState<u32>>) {
        connect_tx!(self.inflight, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for RxEnqueue {
    async fn run(&self) -> SimResult {
        let dma_cmd = take_option!(self.dma_cmd)?;
        let inflight = take_option!(self.inflight)?;

        loop {
            let claimed = lock(&self.table).claim();
            let Some(desc) = claimed else {
                trace!(self.entity ; "no free buffer");
                self.recycle.get().await?;
                continue;
            };

            debug!(self.entity ; "enqueue {}", desc);
            let cmd = DmaCommand::new(desc.address, desc.capacity, (desc.index & 0xf) as u8)?;
            dma_cmd.put(cmd).await?;
            inflight.put(desc.index).await?;
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct RxDequeue {
    entity: Arc<Entity>,
    table: SharedRxBufferTable,
    inflight: InPort<u32>,
    dma_sts: InPort<DmaStatus>,
    rx_status: InPort<RxStatus>,
    notif: Mutex<Option<OutPort<RxNotification>>>,
}

impl RxDequeue {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        table: &SharedRxBufferTable,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let depth = lock(table).len();
        let inflight = InPort::with_capacity(&entity, "inflight", depth);
        let dma_sts = InPort::new(&entity, "dma_sts");
        let rx_status = InPort::new(&entity, "rx_status");
        let notif = OutPort::new(&entity, "notif");
        let rc_self = Arc::new(Self {
            entity,
            table: table.clone(),
            inflight,
            dma_sts,
            rx_status,
            notif: Mutex::new(Some(notif)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_inflight(&self) -> Arc<PortState<u32>> {
        self.inflight.state()
    }

    #[must_use]
    pub fn port_dma_sts(&self) -> Arc<PortState<DmaStatus>> {
        self.dma_sts.state()
    }

    #[must_use]
    pub fn port_rx_status(&self) -> Arc<PortState<RxStatus>> {
        self.rx_status.state()
    }

    pub fn connect_port_notif(&self, port_state: Arc<PortState<RxNotification>>) {
        connect_tx!(self.notif, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for RxDequeue {
    async fn run(&self) -> SimResult {
        let notif = take_option!(self.notif)?;

        loop {
            let dma_sts = self.dma_sts.get().await?;
            let index = self.inflight.get().await?;
            let mut status = self.rx_status.get().await?;

            status.ok = status.ok && dma_sts.okay && dma_sts.bytes == status.header.count;
            if !status.ok {
                warn!(self.entity ; "buffer {}: bad packet {} ({})", index, status, dma_sts);
            }
            status.bytes = dma_sts.bytes;

            let desc = lock(&self.table).notify(index, &status)?;
            debug!(self.entity ; "dequeue {}", desc);
            notif
                .put(RxNotification {
                    index,
                    header: status.header,
                    bytes: status.bytes,
                    ok: status.ok,
                })
                .await?;
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct RxSeek {
    entity: Arc<Entity>,
    table: SharedRxBufferTable,
    notif: InPort<RxNotification>,
    release: InPort<u32>,
    seek_req: InPort<RxSeekRequest>,
    seek_ack: Mutex<Option<OutPort<RxSeekResult>>>,
    recycle: Mutex<Option<OutPort<u32>>>,
}

impl RxSeek {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        table: &SharedRxBufferTable,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let notif = InPort::new(&entity, "notif");
        let release = InPort::new(&entity, "release");
        let seek_req = InPort::new(&entity, "seek_req");
        let seek_ack = OutPort::new(&entity, "seek_ack");
        let recycle = OutPort::new(&entity, "recycle");
        let rc_self = Arc::new(Self {
            entity,
            table: table.clone(),
            notif,
            release,
            seek_req,
            seek_ack: Mutex::new(Some(seek_ack)),
            recycle: Mutex::new(Some(recycle)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_notif(&self) -> Arc<PortState<RxNotification>> {
        self.notif.state()
    }

    #[must_use]
    pub fn port_release(&self) -> Arc<PortState<u32>> {
        self.release.state()
    }

    #[must_use]
    pub fn port_seek_req(&self) -> Arc<PortState<RxSeekRequest>> {
        self.seek_req.state()
    }

    pub fn connect_port_seek_ack(&self, port_state: Arc<PortState<RxSeekResult>>) {
        connect_tx!(self.seek_ack, connect ; port_state);
    }

    pub fn connect_port_recycle(&self, port_state: Arc<PortState<u32>>) {
        connect_tx!(self.recycle, connect ; port_state);
    }

    fn lookup(&self, req: &RxSeekRequest) -> RxSeekResult {
        let mut table = lock(&self.table);
        match table.seek(req.src, req.tag, req.seqn) {
            Some(desc) => RxSeekResult::Found(desc),
            None => RxSeekResult::NotFound {
                generation: table.generation(),
            },
        }
    }
}

#[async_trait]
impl Runnable for RxSeek {
    async fn run(&self) -> SimResult {
        let seek_ack = take_option!(self.seek_ack)?;
        let recycle = take_option!(self.recycle)?;
        let mut deferred: VecDeque<RxSeekRequest> = VecDeque::new();

        loop {
            match select_ready(&[&self.notif, &self.release, &self.seek_req]).await? {
                0 => {
                    let notif = self.notif.get().await?;
                    trace!(self.entity ; "{}", notif);
                    for req in std::mem::take(&mut deferred) {
                        let result = self.lookup(&req);
                        debug!(self.entity ; "{} => {}", req, result);
                        seek_ack.put(result).await?;
                    }
                }
                1 => {
                    let index = self.release.get().await?;
                    let released = lock(&self.table).release(index);
                    match released {
                        Ok(()) => {
                            debug!(self.entity ; "release buffer {}", index);
                            recycle.put(index).await?;
                        }
                        Err(e) => warn!(self.entity ; "ignoring release: {}", e),
                    }
                }
                _ => {
                    let req = self.seek_req.get().await?;
                    let result = self.lookup(&req);
                    match (result, req.after_generation) {
                        (RxSeekResult::NotFound { generation }, Some(after))
                            if generation <= after =>
                        {
                            trace!(self.entity ; "defer {}", req);
                            deferred.push_back(req);
                        }
                        _ => {
                            debug!(self.entity ; "{} => {}", req, result);
                            seek_ack.put(result).await?;
                        }
                    }
                }
            }
        }
    }
}

/// The three actors of the receive buffer manager and their shared table.
pub struct RxBufferManager {
    pub enqueue: Arc<RxEnqueue>,
    pub dequeue: Arc<RxDequeue>,
    pub seek: Arc<RxSeek>,
    table: SharedRxBufferTable,
}

impl RxBufferManager {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        base_address: u64,
        count: u32,
        capacity: u32,
    ) -> Result<Self, SimError> {
        let table = Arc::new(Mutex::new(RxBufferTable::new(base_address, count, capacity)?));
        let enqueue = RxEnqueue::new_and_register(engine, parent, "rxbuf_enqueue", &table);
        let dequeue = RxDequeue::new_and_register(engine, parent, "rxbuf_dequeue", &table);
        let seek = RxSeek::new_and_register(engine, parent, "rxbuf_seek", &table);

        dequeue.connect_port_notif(seek.port_notif());
        seek.connect_port_recycle(enqueue.port_recycle());

        Ok(Self {
            enqueue,
            dequeue,
            seek,
            table,
        })
    }

    #[must_use]
    pub fn table(&self) -> &SharedRxBufferTable {
        &self.table
    }

    #[must_use]
    pub fn state(&self, index: u32) -> Option<RxBufferState> {
        lock(&self.table).descriptor(index).map(|desc| desc.state)
    }
}
