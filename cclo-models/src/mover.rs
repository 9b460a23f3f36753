// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The move engine.
//!
//! The [`Mover`] executes host [`MoveCommand`]s by programming the DMA
//! engines, the segmenters, the packetizer and the receive buffer manager.
//! It returns one [`MoveStatus`] per command, in order.
//!
//! Every command is split into chunks. A chunk is one DMA command and one
//! segmenter frame, so it never exceeds `max_frame_words` datapath words.
//! Network sends are further limited to one packet per chunk, which lets the
//! receiving side predict the packet boundaries of a message from its length.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::segmenter::{SegmenterCmd, SegmenterStatus};
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::sim_error;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, info, lock, trace, warn};

use crate::arithmetic::ArithOp;
use crate::compression::CastMode;
use crate::dma::{DmaCommand, DmaStatus};
use crate::eth::{EthHeader, PacketCmd, PacketStatus};
use crate::routes::{
    MASTER_ARITH_OP0, MASTER_ARITH_OP1, MASTER_BYPASS, MASTER_DMA1_WRITE, MASTER_ETH_TX,
    MASTER_EXT_KRNL, NUM_CLANES, NUM_SEGMENTERS, SEG_ARITH_OP0, SEG_ARITH_OP1, SEG_ARITH_RES,
    SEG_DMA0_READ, SEG_DMA1_READ, SEG_KRNL_IN, SEG_KRNL_OUT, master_clane, seg_clane_op,
    seg_clane_res,
};
use crate::rxbuf::{RxSeekRequest, RxSeekResult};
use crate::tcp::SharedSessionTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveCommand {
    Copy {
        src: u64,
        dst: u64,
        len: u32,
    },

    /// `res = op0 + op1`, elementwise.
    Combine {
        op: ArithOp,
        op0: u64,
        op1: u64,
        res: u64,
        len: u32,
    },

    Send {
        src: u64,
        len: u32,
        dst_rank: u32,
        tag: u32,
    },

    Recv {
        dst: u64,
        len: u32,
        src_rank: u32,
        tag: u32,
    },

    /// Pass through the external kernel.
    Kernel {
        src: u64,
        dst: u64,
        len: u32,
    },

    /// Pass through the external kernel on the bypass route, which skips the
    /// kernel input segmenter.
    KernelBypass {
        src: u64,
        dst: u64,
        len: u32,
    },

    /// Pass through compression lane `lane`. `len` is the source length.
    Cast {
        lane: usize,
        mode: CastMode,
        src: u64,
        dst: u64,
        len: u32,
    },
}

impl fmt::Display for MoveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveCommand::Copy { src, dst, len } => write!(f, "copy[{src:#x} => {dst:#x} {len}B]"),
            MoveCommand::Combine {
                op,
                op0,
                op1,
                res,
                len,
            } => write!(f, "combine[{op} {op0:#x} + {op1:#x} => {res:#x} {len}B]"),
            MoveCommand::Send {
                src,
                len,
                dst_rank,
                tag,
            } => write!(f, "send[{src:#x} {len}B => rank{dst_rank} tag={tag:#x}]"),
            MoveCommand::Recv {
                dst,
                len,
                src_rank,
                tag,
            } => write!(f, "recv[rank{src_rank} tag={tag:#x} => {dst:#x} {len}B]"),
            MoveCommand::Kernel { src, dst, len } => {
                write!(f, "kernel[{src:#x} => {dst:#x} {len}B]")
            }
            MoveCommand::KernelBypass { src, dst, len } => {
                write!(f, "kernel_bypass[{src:#x} => {dst:#x} {len}B]")
            }
            MoveCommand::Cast {
                lane,
                mode,
                src,
                dst,
                len,
            } => write!(f, "cast{lane}[{mode} {src:#x} => {dst:#x} {len}B]"),
        }
    }
}

impl MoveCommand {
    /// The `(address, length)` of every memory region the command touches.
    fn regions(&self) -> Vec<(u64, u64)> {
        match *self {
            MoveCommand::Copy { src, dst, len }
            | MoveCommand::Kernel { src, dst, len }
            | MoveCommand::KernelBypass { src, dst, len } => {
                vec![(src, u64::from(len)), (dst, u64::from(len))]
            }
            MoveCommand::Combine {
                op0, op1, res, len, ..
            } => vec![(op0, u64::from(len)), (op1, u64::from(len)), (res, u64::from(len))],
            MoveCommand::Send { src, len, .. } => vec![(src, u64::from(len))],
            MoveCommand::Recv { dst, len, .. } => vec![(dst, u64::from(len))],
            MoveCommand::Cast {
                mode, src, dst, len, ..
            } => vec![(src, u64::from(len)), (dst, cast_bytes(mode, u64::from(len)))],
        }
    }

    /// Whether no region wraps past the end of the address space.
    #[must_use]
    pub fn in_address_space(&self) -> bool {
        self.regions()
            .iter()
            .all(|&(address, len)| address.checked_add(len).is_some())
    }
}

/// Bytes written by a cast of `n` source bytes.
fn cast_bytes(mode: CastMode, n: u64) -> u64 {
    match mode {
        CastMode::Pass => n,
        CastMode::Down => n / 2,
        CastMode::Up => n * 2,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveError {
    /// A DMA reported an error or moved the wrong number of bytes.
    Dma,

    /// There is no open connection to the destination rank.
    NoSession,

    /// The length is zero or does not suit the operation.
    BadLength,

    /// No such compression lane.
    BadLane,

    /// A received packet did not match the expected size or arrived damaged.
    RxMismatch,

    /// The peer is not a rank of the system.
    BadRank,
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MoveError::Dma => "dma error",
            MoveError::NoSession => "no session",
            MoveError::BadLength => "bad length",
            MoveError::BadLane => "bad lane",
            MoveError::RxMismatch => "receive mismatch",
            MoveError::BadRank => "bad rank",
        };
        f.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveStatus {
    pub ok: bool,

    /// Bytes written to memory, or sent for a [`MoveCommand::Send`].
    pub bytes: u64,

    pub error: Option<MoveError>,
}

impl MoveStatus {
    fn failed(bytes: u64, error: MoveError) -> Self {
        Self {
            ok: false,
            bytes,
            error: Some(error),
        }
    }
}

impl fmt::Display for MoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.error {
            Some(e) => write!(f, "move_sts[{}B {}]", self.bytes, e),
            None => write!(f, "move_sts[{}B ok]", self.bytes),
        }
    }
}

/// Static parameters of a [`Mover`].
#[derive(Clone, Debug)]
pub struct MoverConfig {
    pub rank: u32,

    /// Ranks in the system. Peers are numbered from zero.
    pub num_ranks: u32,
    pub width_bytes: usize,
    pub max_frame_words: usize,
    pub max_packet_bytes: usize,

    /// Present when sends go over connections.
    pub sessions: Option<SharedSessionTable>,
}

impl MoverConfig {
    fn frame_bytes(&self) -> u32 {
        (self.max_frame_words * self.width_bytes) as u32
    }

    /// Bytes per network packet.
    #[must_use]
    pub fn packet_bytes(&self) -> u32 {
        self.frame_bytes().min(self.max_packet_bytes as u32)
    }
}

/// Split `len` bytes into chunks of at most `chunk` bytes as
/// `(offset, length)` pairs.
fn chunks(len: u32, chunk: u32) -> impl Iterator<Item = (u32, u32)> {
    (0..len.div_ceil(chunk)).map(move |i| {
        let offset = i * chunk;
        (offset, chunk.min(len - offset))
    })
}

/// The output ports, owned by the running actor.
struct MoverPorts {
    dma0_read_cmd: OutPort<DmaCommand>,
    dma1_read_cmd: OutPort<DmaCommand>,
    dma1_write_cmd: OutPort<DmaCommand>,
    seg_cmd: Vec<OutPort<SegmenterCmd>>,
    pkt_cmd: OutPort<PacketCmd>,
    seek_req: OutPort<RxSeekRequest>,
    release: OutPort<u32>,
}

impl MoverPorts {
    async fn segment(&self, segmenter: usize, dest: u64) -> SimResult {
        self.segment_job(segmenter, dest, false).await
    }

    async fn segment_job(&self, segmenter: usize, dest: u64, emit_status: bool) -> SimResult {
        self.seg_cmd[segmenter]
            .put(SegmenterCmd {
                dest,
                num_words: None,
                emit_status,
            })
            .await
    }
}

/// Sequence numbers of the packets exchanged with each peer.
#[derive(Default)]
struct Sequences {
    tx: HashMap<u32, u32>,
    rx: HashMap<u32, u32>,
}

fn next(seqns: &mut HashMap<u32, u32>, rank: u32) -> u32 {
    let seqn = seqns.entry(rank).or_insert(0);
    let current = *seqn;
    *seqn = seqn.wrapping_add(1);
    current
}

#[derive(EntityGet, EntityDisplay)]
pub struct Mover {
    entity: Arc<Entity>,
    config: MoverConfig,

    cmd: InPort<MoveCommand>,
    sts: Mutex<Option<OutPort<MoveStatus>>>,

    dma0_read_cmd: Mutex<Option<OutPort<DmaCommand>>>,
    dma0_read_sts: InPort<DmaStatus>,
    dma1_read_cmd: Mutex<Option<OutPort<DmaCommand>>>,
    dma1_read_sts: InPort<DmaStatus>,
    dma1_write_cmd: Mutex<Option<OutPort<DmaCommand>>>,
    dma1_write_sts: InPort<DmaStatus>,

    seg_cmd: Mutex<Option<Vec<OutPort<SegmenterCmd>>>>,
    seg_sts: InPort<SegmenterStatus>,

    pkt_cmd: Mutex<Option<OutPort<PacketCmd>>>,
    pkt_sts: InPort<PacketStatus>,

    seek_req: Mutex<Option<OutPort<RxSeekRequest>>>,
    seek_ack: InPort<RxSeekResult>,
    release: Mutex<Option<OutPort<u32>>>,
}

impl Mover {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        config: MoverConfig,
    ) -> Result<Arc<Self>, SimError> {
        if config.width_bytes == 0 || config.max_frame_words == 0 || config.max_packet_bytes == 0 {
            return sim_error!(format!(
                "{parent}::{name}: datapath, frame and packet sizes must be non-zero"
            ));
        }

        let entity = Arc::new(Entity::new(parent, name));
        let seg_cmd = (0..NUM_SEGMENTERS)
            .map(|i| OutPort::new(&entity, &format!("seg_cmd{i}")))
            .collect();
        let rc_self = Arc::new(Self {
            cmd: InPort::new(&entity, "cmd"),
            sts: Mutex::new(Some(OutPort::new(&entity, "sts"))),
            dma0_read_cmd: Mutex::new(Some(OutPort::new(&entity, "dma0_read_cmd"))),
            dma0_read_sts: InPort::new(&entity, "dma0_read_sts"),
            dma1_read_cmd: Mutex::new(Some(OutPort::new(&entity, "dma1_read_cmd"))),
            dma1_read_sts: InPort::new(&entity, "dma1_read_sts"),
            dma1_write_cmd: Mutex::new(Some(OutPort::new(&entity, "dma1_write_cmd"))),
            dma1_write_sts: InPort::new(&entity, "dma1_write_sts"),
            seg_cmd: Mutex::new(Some(seg_cmd)),
            seg_sts: InPort::new(&entity, "seg_sts"),
            pkt_cmd: Mutex::new(Some(OutPort::new(&entity, "pkt_cmd"))),
            pkt_sts: InPort::new(&entity, "pkt_sts"),
            seek_req: Mutex::new(Some(OutPort::new(&entity, "seek_req"))),
            seek_ack: InPort::new(&entity, "seek_ack"),
            release: Mutex::new(Some(OutPort::new(&entity, "release"))),
            entity,
            config,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<MoveCommand>> {
        self.cmd.state()
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<MoveStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }

    pub fn connect_port_dma0_read_cmd(&self, port_state: Arc<PortState<DmaCommand>>) {
        connect_tx!(self.dma0_read_cmd, connect ; port_state);
    }

    #[must_use]
    pub fn port_dma0_read_sts(&self) -> Arc<PortState<DmaStatus>> {
        self.dma0_read_sts.state()
    }

    pub fn connect_port_dma1_read_cmd(&self, port_state: Arc<PortState<DmaCommand>>) {
        connect_tx!(self.dma1_read_cmd, connect ; port_state);
    }

    #[must_use]
    pub fn port_dma1_read_sts(&self) -> Arc<PortState<DmaStatus>> {
        self.dma1_read_sts.state()
    }

    pub fn connect_port_dma1_write_cmd(&self, port_state: Arc<PortState<DmaCommand>>) {
        connect_tx!(self.dma1_write_cmd, connect ; port_state);
    }

    #[must_use]
    pub fn port_dma1_write_sts(&self) -> Arc<PortState<DmaStatus>> {
        self.dma1_write_sts.state()
    }

    /// Segmenter `i`, numbered as in [`routes`](crate::routes).
    ///
    /// # Panics
    ///
    /// If `i` is not a segmenter.
    pub fn connect_port_seg_cmd_i(&self, i: usize, port_state: Arc<PortState<SegmenterCmd>>) {
        if let Some(ports) = lock(&self.seg_cmd).as_mut() {
            ports[i].connect(port_state);
        }
    }

    #[must_use]
    pub fn port_seg_sts(&self) -> Arc<PortState<SegmenterStatus>> {
        self.seg_sts.state()
    }

    pub fn connect_port_pkt_cmd(&self, port_state: Arc<PortState<PacketCmd>>) {
        connect_tx!(self.pkt_cmd, connect ; port_state);
    }

    #[must_use]
    pub fn port_pkt_sts(&self) -> Arc<PortState<PacketStatus>> {
        self.pkt_sts.state()
    }

    pub fn connect_port_seek_req(&self, port_state: Arc<PortState<RxSeekRequest>>) {
        connect_tx!(self.seek_req, connect ; port_state);
    }

    #[must_use]
    pub fn port_seek_ack(&self) -> Arc<PortState<RxSeekResult>> {
        self.seek_ack.state()
    }

    pub fn connect_port_release(&self, port_state: Arc<PortState<u32>>) {
        connect_tx!(self.release, connect ; port_state);
    }

    fn dma_ok(&self, what: &str, sts: &DmaStatus, expected: u32) -> bool {
        let ok = sts.okay && sts.bytes == expected;
        if !ok {
            warn!(self.entity ; "{} expected {}B, got {}", what, expected, sts);
        }
        ok
    }

    async fn copy(
        &self,
        ports: &MoverPorts,
        src: u64,
        dst: u64,
        len: u32,
    ) -> Result<MoveStatus, SimError> {
        let mut bytes = 0;
        for (offset, n) in chunks(len, self.config.frame_bytes()) {
            let offset_64 = u64::from(offset);
            ports.dma1_write_cmd.put(DmaCommand::new(dst + offset_64, n, 1)?).await?;
            ports.segment(SEG_DMA0_READ, MASTER_DMA1_WRITE).await?;
            ports.dma0_read_cmd.put(DmaCommand::new(src + offset_64, n, 0)?).await?;

            let read = self.dma0_read_sts.get().await?;
            let write = self.dma1_write_sts.get().await?;
            bytes += u64::from(write.bytes);
            if !(self.dma_ok("read", &read, n) & self.dma_ok("write", &write, n)) {
                return Ok(MoveStatus::failed(bytes, MoveError::Dma));
            }
        }
        Ok(MoveStatus {
            ok: true,
            bytes,
            error: None,
        })
    }

    async fn combine(
        &self,
        ports: &MoverPorts,
        op: ArithOp,
        addresses: [u64; 3],
        len: u32,
    ) -> Result<MoveStatus, SimError> {
        if len as usize % op.element_bytes() != 0 {
            return Ok(MoveStatus::failed(0, MoveError::BadLength));
        }
        let [op0, op1, res] = addresses;
        let tag = op as u64;
        let mut bytes = 0;
        for (offset, n) in chunks(len, self.config.frame_bytes()) {
            let offset_64 = u64::from(offset);
            ports.dma1_write_cmd.put(DmaCommand::new(res + offset_64, n, 1)?).await?;
            ports.segment(SEG_ARITH_RES, MASTER_DMA1_WRITE).await?;
            ports.segment(SEG_ARITH_OP0, tag).await?;
            ports.segment(SEG_ARITH_OP1, tag).await?;
            ports.segment(SEG_DMA0_READ, MASTER_ARITH_OP0).await?;
            ports.segment(SEG_DMA1_READ, MASTER_ARITH_OP1).await?;
            ports.dma0_read_cmd.put(DmaCommand::new(op0 + offset_64, n, 0)?).await?;
            ports.dma1_read_cmd.put(DmaCommand::new(op1 + offset_64, n, 0)?).await?;

            let read0 = self.dma0_read_sts.get().await?;
            let read1 = self.dma1_read_sts.get().await?;
            let write = self.dma1_write_sts.get().await?;
            bytes += u64::from(write.bytes);
            let ok = self.dma_ok("op0 read", &read0, n)
                & self.dma_ok("op1 read", &read1, n)
                & self.dma_ok("result write", &write, n);
            if !ok {
                return Ok(MoveStatus::failed(bytes, MoveError::Dma));
            }
        }
        Ok(MoveStatus {
            ok: true,
            bytes,
            error: None,
        })
    }

    async fn send(
        &self,
        ports: &MoverPorts,
        seqns: &mut Sequences,
        src: u64,
        len: u32,
        dst_rank: u32,
        tag: u32,
    ) -> Result<MoveStatus, SimError> {
        if dst_rank >= self.config.num_ranks {
            warn!(self.entity ; "rank {} does not exist", dst_rank);
            return Ok(MoveStatus::failed(0, MoveError::BadRank));
        }
        let session = match &self.config.sessions {
            None => 0,
            Some(sessions) => {
                let session = lock(sessions).session_to(dst_rank);
                match session {
                    Some(session) => session,
                    None => {
                        warn!(self.entity ; "no connection to rank {}", dst_rank);
                        return Ok(MoveStatus::failed(0, MoveError::NoSession));
                    }
                }
            }
        };

        let mut bytes = 0;
        for (offset, n) in chunks(len, self.config.packet_bytes()) {
            let header = EthHeader {
                count: n,
                tag,
                src: self.config.rank,
                seqn: next(&mut seqns.tx, dst_rank),
                strm: 0,
                dst: dst_rank,
            };
            trace!(self.entity ; "packet {}", header);
            ports.pkt_cmd.put(PacketCmd { header, session }).await?;
            ports.segment(SEG_DMA0_READ, MASTER_ETH_TX).await?;
            ports
                .dma0_read_cmd
                .put(DmaCommand::new(src + u64::from(offset), n, 0)?)
                .await?;

            let read = self.dma0_read_sts.get().await?;
            let sent = self.pkt_sts.get().await?;
            bytes += u64::from(sent.bytes);
            if !self.dma_ok("read", &read, n) {
                return Ok(MoveStatus::failed(bytes, MoveError::Dma));
            }
            if !sent.ok {
                warn!(self.entity ; "transmit failed: {}", sent);
                return Ok(MoveStatus::failed(bytes, MoveError::NoSession));
            }
        }
        Ok(MoveStatus {
            ok: true,
            bytes,
            error: None,
        })
    }

    async fn recv(
        &self,
        ports: &MoverPorts,
        seqns: &mut Sequences,
        dst: u64,
        len: u32,
        src_rank: u32,
        tag: u32,
    ) -> Result<MoveStatus, SimError> {
        if src_rank >= self.config.num_ranks {
            warn!(self.entity ; "rank {} does not exist", src_rank);
            return Ok(MoveStatus::failed(0, MoveError::BadRank));
        }
        let mut bytes = 0;
        for (offset, n) in chunks(len, self.config.packet_bytes()) {
            let seqn = next(&mut seqns.rx, src_rank);
            let mut after_generation = None;
            let desc = loop {
                ports
                    .seek_req
                    .put(RxSeekRequest {
                        src: src_rank,
                        tag,
                        seqn,
                        after_generation,
                    })
                    .await?;
                match self.seek_ack.get().await? {
                    RxSeekResult::Found(desc) => break desc,
                    RxSeekResult::NotFound { generation } => {
                        trace!(self.entity ; "waiting for rank {} seqn {}", src_rank, seqn);
                        after_generation = Some(generation);
                    }
                }
            };
            debug!(self.entity ; "found {}", desc);

            if desc.bytes > 0 {
                let length = desc.bytes.min(n);
                ports
                    .dma1_write_cmd
                    .put(DmaCommand::new(dst + u64::from(offset), length, 1)?)
                    .await?;
                ports.segment(SEG_DMA1_READ, MASTER_DMA1_WRITE).await?;
                ports.dma1_read_cmd.put(DmaCommand::new(desc.address, length, 0)?).await?;

                let read = self.dma1_read_sts.get().await?;
                let write = self.dma1_write_sts.get().await?;
                bytes += u64::from(write.bytes);
                let ok = self.dma_ok("buffer read", &read, length)
                    & self.dma_ok("write", &write, length);
                if !ok {
                    ports.release.put(desc.index).await?;
                    return Ok(MoveStatus::failed(bytes, MoveError::Dma));
                }
            }
            ports.release.put(desc.index).await?;

            if !desc.ok || desc.bytes != n {
                warn!(self.entity ; "expected {}B from rank {}, got {}", n, src_rank, desc);
                return Ok(MoveStatus::failed(bytes, MoveError::RxMismatch));
            }
        }
        Ok(MoveStatus {
            ok: true,
            bytes,
            error: None,
        })
    }

    /// With `bypass` the stream reaches the kernel without being framed
    /// again on the way in.
    async fn kernel(
        &self,
        ports: &MoverPorts,
        src: u64,
        dst: u64,
        len: u32,
        bypass: bool,
    ) -> Result<MoveStatus, SimError> {
        let mut bytes = 0;
        for (offset, n) in chunks(len, self.config.frame_bytes()) {
            let offset_64 = u64::from(offset);
            ports.dma1_write_cmd.put(DmaCommand::new(dst + offset_64, n, 1)?).await?;
            ports.segment_job(SEG_KRNL_OUT, MASTER_DMA1_WRITE, true).await?;
            if bypass {
                ports.segment(SEG_DMA0_READ, MASTER_BYPASS).await?;
            } else {
                ports.segment(SEG_KRNL_IN, 0).await?;
                ports.segment(SEG_DMA0_READ, MASTER_EXT_KRNL).await?;
            }
            ports.dma0_read_cmd.put(DmaCommand::new(src + offset_64, n, 0)?).await?;

            let read = self.dma0_read_sts.get().await?;
            let segmented = self.seg_sts.get().await?;
            let write = self.dma1_write_sts.get().await?;
            trace!(self.entity ; "kernel returned {}", segmented);
            bytes += u64::from(write.bytes);
            if !(self.dma_ok("read", &read, n) & self.dma_ok("write", &write, n)) {
                return Ok(MoveStatus::failed(bytes, MoveError::Dma));
            }
        }
        Ok(MoveStatus {
            ok: true,
            bytes,
            error: None,
        })
    }

    async fn cast(
        &self,
        ports: &MoverPorts,
        lane: usize,
        mode: CastMode,
        src: u64,
        dst: u64,
        len: u32,
    ) -> Result<MoveStatus, SimError> {
        if lane >= NUM_CLANES {
            return Ok(MoveStatus::failed(0, MoveError::BadLane));
        }
        let frame_bytes = self.config.frame_bytes();
        // Source chunk size
        let chunk = match mode {
            CastMode::Pass => frame_bytes,
            CastMode::Down if len % 4 == 0 => frame_bytes,
            CastMode::Up if len % 2 == 0 => (frame_bytes / 2).max(2),
            _ => return Ok(MoveStatus::failed(0, MoveError::BadLength)),
        };

        let mut bytes = 0;
        for (offset, n) in chunks(len, chunk) {
            // A chunk never writes more than a frame
            let written = cast_bytes(mode, u64::from(n)) as u32;
            let dst_offset = cast_bytes(mode, u64::from(offset));
            ports.dma1_write_cmd.put(DmaCommand::new(dst + dst_offset, written, 1)?).await?;
            ports.segment(seg_clane_res(lane), MASTER_DMA1_WRITE).await?;
            ports.segment(seg_clane_op(lane), mode as u64).await?;
            ports.segment(SEG_DMA0_READ, master_clane(lane)).await?;
            ports
                .dma0_read_cmd
                .put(DmaCommand::new(src + u64::from(offset), n, 0)?)
                .await?;

            let read = self.dma0_read_sts.get().await?;
            let write = self.dma1_write_sts.get().await?;
            bytes += u64::from(write.bytes);
            if !(self.dma_ok("read", &read, n) & self.dma_ok("write", &write, written)) {
                return Ok(MoveStatus::failed(bytes, MoveError::Dma));
            }
        }
        Ok(MoveStatus {
            ok: true,
            bytes,
            error: None,
        })
    }
}

#[async_trait]
impl Runnable for Mover {
    async fn run(&self) -> SimResult {
        let sts = take_option!(self.sts)?;
        let ports = MoverPorts {
            dma0_read_cmd: take_option!(self.dma0_read_cmd)?,
            dma1_read_cmd: take_option!(self.dma1_read_cmd)?,
            dma1_write_cmd: take_option!(self.dma1_write_cmd)?,
            seg_cmd: take_option!(self.seg_cmd)?,
            pkt_cmd: take_option!(self.pkt_cmd)?,
            seek_req: take_option!(self.seek_req)?,
            release: take_option!(self.release)?,
        };
        let mut seqns = Sequences::default();

        loop {
            let cmd = self.cmd.get().await?;
            info!(self.entity ; "{}", cmd);
            let status = match cmd {
                MoveCommand::Copy { len: 0, .. }
                | MoveCommand::Combine { len: 0, .. }
                | MoveCommand::Send { len: 0, .. }
                | MoveCommand::Recv { len: 0, .. }
                | MoveCommand::Kernel { len: 0, .. }
                | MoveCommand::KernelBypass { len: 0, .. }
                | MoveCommand::Cast { len: 0, .. } => MoveStatus::failed(0, MoveError::BadLength),
                _ if !cmd.in_address_space() => {
                    warn!(self.entity ; "{} runs past the end of the address space", cmd);
                    MoveStatus::failed(0, MoveError::Dma)
                }
                MoveCommand::Copy { src, dst, len } => self.copy(&ports, src, dst, len).await?,
                MoveCommand::Combine {
                    op,
                    op0,
                    op1,
                    res,
                    len,
                } => self.combine(&ports, op, [op0, op1, res], len).await?,
                MoveCommand::Send {
                    src,
                    len,
                    dst_rank,
                    tag,
                } => {
                    self.send(&ports, &mut seqns, src, len, dst_rank, tag)
                        .await?
                }
                MoveCommand::Recv {
                    dst,
                    len,
                    src_rank,
                    tag,
                } => {
                    self.recv(&ports, &mut seqns, dst, len, src_rank, tag)
                        .await?
                }
                MoveCommand::Kernel { src, dst, len } => {
                    self.kernel(&ports, src, dst, len, false).await?
                }
                MoveCommand::KernelBypass { src, dst, len } => {
                    self.kernel(&ports, src, dst, len, true).await?
                }
                MoveCommand::Cast {
                    lane,
                    mode,
                    src,
                    dst,
                    len,
                } => self.cast(&ports, lane, mode, src, dst, len).await?,
            };
            debug!(self.entity ; "{} => {}", cmd, status);
            sts.put(status).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking() {
        let split: Vec<_> = chunks(100, 32).collect();
        assert_eq!(split, vec![(0, 32), (32, 32), (64, 32), (96, 4)]);
        assert_eq!(chunks(32, 32).count(), 1);
    }

    #[test]
    fn sequence_numbers_are_per_peer() {
        let mut seqns = HashMap::new();
        assert_eq!(next(&mut seqns, 1), 0);
        assert_eq!(next(&mut seqns, 1), 1);
        assert_eq!(next(&mut seqns, 2), 0);
    }

    #[test]
    fn packets_fit_frames() {
        let config = MoverConfig {
            rank: 0,
            num_ranks: 1,
            width_bytes: 64,
            max_frame_words: 4,
            max_packet_bytes: 1024,
            sessions: None,
        };
        assert_eq!(config.packet_bytes(), 256);
    }

    #[test]
    fn regions_must_not_wrap() {
        let copy = MoveCommand::Copy {
            src: 0,
            dst: u64::MAX - 15,
            len: 16,
        };
        assert!(!copy.in_address_space());
        let copy = MoveCommand::Copy {
            src: 0,
            dst: u64::MAX - 16,
            len: 16,
        };
        assert!(copy.in_address_space());

        let up = MoveCommand::Cast {
            lane: 1,
            mode: CastMode::Up,
            src: 0,
            dst: u64::MAX - 40,
            len: 32,
        };
        assert!(!up.in_address_space());
        let down = MoveCommand::Cast {
            lane: 1,
            mode: CastMode::Down,
            src: 0,
            dst: u64::MAX - 40,
            len: 32,
        };
        assert!(down.in_address_space());
    }
}
