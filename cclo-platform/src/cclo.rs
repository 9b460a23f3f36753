// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! One rank of the system: a complete offload engine around its memory.
//!
//! All datapath blocks hang off a central switch. Every block feeding the
//! switch, and every lane fed by it, has a segmenter in front that frames the
//! stream and sets the destination from commands issued by the [`Mover`].

use std::collections::HashMap;
use std::sync::Arc;

use cclo_components::connect_port;
use cclo_components::mux::Mux;
use cclo_components::segmenter::Segmenter;
use cclo_components::switch::{DefaultRouter, Switch};
use cclo_components::types::StreamWord;
use cclo_components::width_converter::WidthConverter;
use cclo_engine::engine::Engine;
use cclo_engine::port::PortState;
use cclo_engine::sim_error;
use cclo_engine::types::SimError;
use cclo_model_builder::EntityGet;
use cclo_models::arithmetic::ArithmeticLane;
use cclo_models::compression::CompressionLane;
use cclo_models::dma::{DmaRead, DmaWrite};
use cclo_models::external_kernel::{ExternalKernel, KernelOp};
use cclo_models::memory::Memory;
use cclo_models::mover::{MoveCommand, MoveStatus, Mover, MoverConfig};
use cclo_models::routes::{
    MASTER_ARITH_OP0, MASTER_ARITH_OP1, MASTER_BYPASS, MASTER_DMA0_WRITE, MASTER_DMA1_WRITE,
    MASTER_ETH_TX, MASTER_EXT_KRNL, NUM_CLANES, NUM_MASTERS, NUM_SEGMENTERS, NUM_SLAVES,
    SEG_ARITH_OP0, SEG_ARITH_OP1, SEG_ARITH_RES, SEG_DMA0_READ, SEG_DMA1_READ, SEG_KRNL_IN,
    SEG_KRNL_OUT, SLAVE_ARITH_RES, SLAVE_DMA0_READ, SLAVE_DMA1_READ, SLAVE_ETH_RX,
    SLAVE_EXT_KRNL, master_clane, seg_clane_op, seg_clane_res, slave_clane,
};
use cclo_models::rxbuf::RxBufferManager;
use cclo_models::rxbuf_session::RxSessionAdapter;
use cclo_models::tcp::handlers::{TcpRxHandler, TcpTxHandler};
use cclo_models::tcp::packetizer::{TcpDepacketizer, TcpPacketizer};
use cclo_models::tcp::session_handler::SessionHandler;
use cclo_models::tcp::stack::DummyTcpStack;
use cclo_models::tcp::{
    ListenRequest, ListenStatus, OpenRequest, OpenStatus, SharedSessionTable, TcpNetwork,
};
use cclo_models::udp::{UdpDepacketizer, UdpPacketizer};
use cclo_track::entity::Entity;
use cclo_track::{debug, info};

use crate::types::{RankConfig, SystemConfig};

/// Role of each segmenter, indexed as in [`cclo_models::routes`].
fn segmenter_name(index: usize) -> String {
    match index {
        SEG_DMA0_READ => "seg_dma0_read".to_string(),
        SEG_DMA1_READ => "seg_dma1_read".to_string(),
        SEG_KRNL_IN => "seg_krnl_in".to_string(),
        SEG_KRNL_OUT => "seg_krnl_out".to_string(),
        SEG_ARITH_OP0 => "seg_arith_op0".to_string(),
        SEG_ARITH_OP1 => "seg_arith_op1".to_string(),
        SEG_ARITH_RES => "seg_arith_res".to_string(),
        i => {
            let lane = (i - SEG_ARITH_RES - 1) / 2;
            if seg_clane_op(lane) == i {
                format!("seg_clane{lane}_op")
            } else {
                format!("seg_clane{lane}_res")
            }
        }
    }
}

/// Session control of a rank using connections.
struct TcpControl {
    sessions: SharedSessionTable,
    session_handler: Arc<SessionHandler>,
    stack: Arc<DummyTcpStack>,
}

enum Transport {
    Udp {
        packetizer: Arc<UdpPacketizer>,
        depacketizer: Arc<UdpDepacketizer>,
    },
    Tcp(TcpControl),
}

#[derive(EntityGet)]
pub struct Cclo {
    entity: Arc<Entity>,
    rank: u32,
    memory: Arc<Memory>,
    mover: Arc<Mover>,
    rxbuf: RxBufferManager,
    arithmetic: Arc<ArithmeticLane>,
    clanes: Vec<Arc<CompressionLane>>,
    transport: Transport,
}

impl Cclo {
    /// Build rank `rank` of a system.
    ///
    /// `network` must be given when the system uses connections.
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        rank: u32,
        config: &SystemConfig,
        network: Option<&Arc<TcpNetwork>>,
        kernel: Box<dyn KernelOp>,
    ) -> Result<Self, SimError> {
        let rank_config = usize::try_from(rank)
            .ok()
            .and_then(|i| config.ranks.get(i))
            .ok_or_else(|| SimError(format!("rank {rank} is not configured")))?;
        check_rank(config, rank, rank_config)?;

        let entity = Arc::new(Entity::new(parent, &format!("rank{rank}")));
        let width = config.datapath_bytes;
        let cmd_depth = config.cmd_channel_depth;
        let memory_bytes = usize::try_from(rank_config.memory_bytes)
            .map_err(|e| SimError(format!("{entity}: memory too large: {e}")))?;
        let memory = Arc::new(Memory::new(memory_bytes));
        info!(entity ; "{}B of memory, {}B datapath", memory_bytes, width);

        let sessions = network.map(|_| SharedSessionTable::default());
        let mover_config = MoverConfig {
            rank,
            num_ranks: u32::try_from(config.ranks.len())
                .map_err(|e| SimError(format!("{entity}: too many ranks: {e}")))?,
            width_bytes: width,
            max_frame_words: config.max_frame_words,
            max_packet_bytes: config.max_packet_bytes as usize,
            sessions: sessions.clone(),
        };
        let switch = Switch::with_capacity(
            engine,
            &entity,
            "switch",
            NUM_SLAVES,
            NUM_MASTERS,
            Box::new(DefaultRouter {}),
            config.channel_depth,
        )?;
        let seg = (0..NUM_SEGMENTERS)
            .map(|i| {
                Segmenter::new_and_register(
                    engine,
                    &entity,
                    &segmenter_name(i),
                    config.max_frame_words as u64,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mover = Mover::new_and_register(engine, &entity, "mover", mover_config)?;

        for (i, segmenter) in seg.iter().enumerate() {
            mover.connect_port_seg_cmd_i(i, segmenter.port_cmd());
            connect_port!(segmenter, sts => mover, seg_sts);
        }

        // Memory access
        let dma0_read =
            DmaRead::new_and_register(engine, &entity, "dma0_read", &memory, width, cmd_depth);
        let dma1_read =
            DmaRead::new_and_register(engine, &entity, "dma1_read", &memory, width, cmd_depth);
        let dma0_write =
            DmaWrite::new_and_register(engine, &entity, "dma0_write", &memory, cmd_depth);
        let dma1_write =
            DmaWrite::new_and_register(engine, &entity, "dma1_write", &memory, cmd_depth);

        connect_port!(mover, dma0_read_cmd => dma0_read, cmd);
        connect_port!(dma0_read, sts => mover, dma0_read_sts);
        connect_port!(dma0_read, tx => seg[SEG_DMA0_READ], rx);
        connect_port!(seg[SEG_DMA0_READ], tx => switch, rx, SLAVE_DMA0_READ);

        connect_port!(mover, dma1_read_cmd => dma1_read, cmd);
        connect_port!(dma1_read, sts => mover, dma1_read_sts);
        connect_port!(dma1_read, tx => seg[SEG_DMA1_READ], rx);
        connect_port!(seg[SEG_DMA1_READ], tx => switch, rx, SLAVE_DMA1_READ);

        connect_port!(switch, tx, MASTER_DMA1_WRITE as usize => dma1_write, rx);
        connect_port!(mover, dma1_write_cmd => dma1_write, cmd);
        connect_port!(dma1_write, sts => mover, dma1_write_sts);

        // Received packets land in buffers written by DMA0
        let rx_buffers = &rank_config.rx_buffers;
        let capacity = u32::try_from(rx_buffers.bytes)
            .map_err(|e| SimError(format!("{entity}: receive buffers too large: {e}")))?;
        let rxbuf = RxBufferManager::new_and_register(
            engine,
            &entity,
            rx_buffers.base_address,
            rx_buffers.count,
            capacity,
        )?;
        connect_port!(switch, tx, MASTER_DMA0_WRITE as usize => dma0_write, rx);
        connect_port!(rxbuf.enqueue, dma_cmd => dma0_write, cmd);
        connect_port!(rxbuf.enqueue, inflight => rxbuf.dequeue, inflight);
        connect_port!(dma0_write, sts => rxbuf.dequeue, dma_sts);
        connect_port!(mover, seek_req => rxbuf.seek, seek_req);
        connect_port!(rxbuf.seek, seek_ack => mover, seek_ack);
        connect_port!(mover, release => rxbuf.seek, release);

        // Compute lanes
        let arithmetic = ArithmeticLane::new_and_register(engine, &entity, "arith", width)?;
        connect_port!(switch, tx, MASTER_ARITH_OP0 as usize => seg[SEG_ARITH_OP0], rx);
        connect_port!(switch, tx, MASTER_ARITH_OP1 as usize => seg[SEG_ARITH_OP1], rx);
        connect_port!(seg[SEG_ARITH_OP0], tx => arithmetic, op0);
        connect_port!(seg[SEG_ARITH_OP1], tx => arithmetic, op1);
        connect_port!(arithmetic, tx => seg[SEG_ARITH_RES], rx);
        connect_port!(seg[SEG_ARITH_RES], tx => switch, rx, SLAVE_ARITH_RES);

        let clanes = (0..NUM_CLANES)
            .map(|lane| {
                let name = format!("clane{lane}");
                let clane = CompressionLane::new_and_register(engine, &entity, &name, width)?;
                let master = master_clane(lane) as usize;
                connect_port!(switch, tx, master => seg[seg_clane_op(lane)], rx);
                connect_port!(seg[seg_clane_op(lane)], tx => clane, rx);
                connect_port!(clane, tx => seg[seg_clane_res(lane)], rx);
                connect_port!(seg[seg_clane_res(lane)], tx => switch, rx, slave_clane(lane));
                Ok(clane)
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        // The kernel may run at its own width. Its input is either framed by
        // a segmenter or taken straight from the bypass master.
        let kernel_bytes = config.kernel_bytes();
        let to_kernel_mux = Mux::new_and_register(engine, &entity, "to_krnl_mux");
        let to_kernel =
            WidthConverter::new_and_register(engine, &entity, "to_krnl", width, kernel_bytes)?;
        let krnl = ExternalKernel::new_and_register(engine, &entity, "krnl", kernel);
        let from_kernel =
            WidthConverter::new_and_register(engine, &entity, "from_krnl", kernel_bytes, width)?;
        connect_port!(switch, tx, MASTER_EXT_KRNL as usize => seg[SEG_KRNL_IN], rx);
        connect_port!(seg[SEG_KRNL_IN], tx => to_kernel_mux, rx0);
        connect_port!(switch, tx, MASTER_BYPASS as usize => to_kernel_mux, rx1);
        connect_port!(to_kernel_mux, tx => to_kernel, rx);
        connect_port!(to_kernel, tx => krnl, rx);
        connect_port!(krnl, tx => from_kernel, rx);
        connect_port!(from_kernel, tx => seg[SEG_KRNL_OUT], rx);
        connect_port!(seg[SEG_KRNL_OUT], tx => switch, rx, SLAVE_EXT_KRNL);

        let transport = match (network, sessions) {
            (Some(network), Some(sessions)) => {
                let peers: HashMap<u32, u32> = config
                    .ranks
                    .iter()
                    .enumerate()
                    .map(|(i, rank)| Ok((parse_rank_ip(&rank.ip)?, i as u32)))
                    .collect::<Result<_, SimError>>()?;
                let session_handler = SessionHandler::new_and_register(
                    engine,
                    &entity,
                    "session_handler",
                    &sessions,
                    peers,
                );
                let stack = DummyTcpStack::new_and_register(
                    engine,
                    &entity,
                    "stack",
                    rank,
                    width,
                    network,
                    config.eth_channel_depth,
                );
                connect_port!(session_handler, stack_listen_req => stack, listen_req);
                connect_port!(stack, listen_sts => session_handler, stack_listen_sts);
                connect_port!(session_handler, stack_open_req => stack, open_req);
                connect_port!(stack, open_sts => session_handler, stack_open_sts);

                let packetizer = TcpPacketizer::new_and_register(
                    engine,
                    &entity,
                    "packetizer",
                    width,
                    config.max_packet_bytes as usize,
                )?;
                let tx_handler = TcpTxHandler::new_and_register(engine, &entity, "tx_handler");
                connect_port!(switch, tx, MASTER_ETH_TX as usize => packetizer, rx);
                connect_port!(mover, pkt_cmd => packetizer, cmd);
                connect_port!(packetizer, sts => mover, pkt_sts);
                connect_port!(packetizer, tx_cmd => tx_handler, cmd);
                connect_port!(packetizer, tx => tx_handler, rx);
                connect_port!(tx_handler, sts => packetizer, tx_sts);
                connect_port!(tx_handler, stack_meta => stack, tx_meta);
                connect_port!(tx_handler, stack_data => stack, tx_data);
                connect_port!(stack, tx_sts => tx_handler, stack_sts);

                let rx_handler = TcpRxHandler::new_and_register(engine, &entity, "rx_handler");
                let depacketizer = TcpDepacketizer::new_and_register(
                    engine,
                    &entity,
                    "depacketizer",
                    rank,
                    width,
                    MASTER_DMA0_WRITE,
                )?;
                let adapter = RxSessionAdapter::new_and_register(
                    engine,
                    &entity,
                    "session_adapter",
                    &sessions,
                );
                connect_port!(stack, notif => rx_handler, stack_notif);
                connect_port!(rx_handler, read_pkg => stack, read_pkg);
                connect_port!(stack, rx_meta => rx_handler, stack_meta);
                connect_port!(stack, rx_data => rx_handler, stack_data);
                connect_port!(rx_handler, notif => depacketizer, notif);
                connect_port!(rx_handler, tx => depacketizer, rx);
                connect_port!(depacketizer, session_notif => adapter, notif);
                connect_port!(depacketizer, tx => switch, rx, SLAVE_ETH_RX);
                connect_port!(adapter, rx_status => rxbuf.dequeue, rx_status);

                Transport::Tcp(TcpControl {
                    sessions,
                    session_handler,
                    stack,
                })
            }
            _ => {
                let packetizer = UdpPacketizer::new_and_register(
                    engine,
                    &entity,
                    "packetizer",
                    width,
                    config.max_packet_bytes as usize,
                )?;
                let depacketizer = UdpDepacketizer::new_and_register(
                    engine,
                    &entity,
                    "depacketizer",
                    rank,
                    width,
                    MASTER_DMA0_WRITE,
                    config.eth_channel_depth,
                )?;
                connect_port!(switch, tx, MASTER_ETH_TX as usize => packetizer, rx);
                connect_port!(mover, pkt_cmd => packetizer, cmd);
                connect_port!(packetizer, sts => mover, pkt_sts);
                connect_port!(depacketizer, tx => switch, rx, SLAVE_ETH_RX);
                connect_port!(depacketizer, rx_status => rxbuf.dequeue, rx_status);
                Transport::Udp {
                    packetizer,
                    depacketizer,
                }
            }
        };

        debug!(entity ; "built rank {}", rank);
        Ok(Self {
            entity,
            rank,
            memory,
            mover,
            rxbuf,
            arithmetic,
            clanes,
            transport,
        })
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// The memory of this rank, for loading inputs and checking results.
    #[must_use]
    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    #[must_use]
    pub fn rx_buffers(&self) -> &RxBufferManager {
        &self.rxbuf
    }

    /// Receive sessions and open connections, when using connections.
    #[must_use]
    pub fn sessions(&self) -> Option<&SharedSessionTable> {
        match &self.transport {
            Transport::Tcp(control) => Some(&control.sessions),
            Transport::Udp { .. } => None,
        }
    }

    /// Messages whose lane tags were not recognised.
    #[must_use]
    pub fn num_rejected(&self) -> usize {
        self.arithmetic.num_rejected()
            + self
                .clanes
                .iter()
                .map(|clane| clane.num_rejected())
                .sum::<usize>()
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<MoveCommand>> {
        self.mover.port_cmd()
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<MoveStatus>>) {
        self.mover.connect_port_sts(port_state);
    }

    fn tcp_control(&self) -> Result<&TcpControl, SimError> {
        match &self.transport {
            Transport::Tcp(control) => Ok(control),
            Transport::Udp { .. } => {
                sim_error!(format!("{}: no connections over UDP", self.entity))
            }
        }
    }

    pub fn port_listen_cmd(&self) -> Result<Arc<PortState<ListenRequest>>, SimError> {
        Ok(self.tcp_control()?.session_handler.port_listen_cmd())
    }

    pub fn port_open_cmd(&self) -> Result<Arc<PortState<OpenRequest>>, SimError> {
        Ok(self.tcp_control()?.session_handler.port_open_cmd())
    }

    pub fn connect_port_listen_sts(
        &self,
        port_state: Arc<PortState<ListenStatus>>,
    ) -> Result<(), SimError> {
        self.tcp_control()?.session_handler.connect_port_listen_sts(port_state);
        Ok(())
    }

    pub fn connect_port_open_sts(
        &self,
        port_state: Arc<PortState<OpenStatus>>,
    ) -> Result<(), SimError> {
        self.tcp_control()?.session_handler.connect_port_open_sts(port_state);
        Ok(())
    }

    /// Packets arriving from the network.
    #[must_use]
    pub fn port_ingress(&self) -> Arc<PortState<StreamWord>> {
        match &self.transport {
            Transport::Udp { depacketizer, .. } => depacketizer.port_rx(),
            Transport::Tcp(control) => control.stack.port_ingress(),
        }
    }

    /// Packets leaving for the network, each word carrying the destination
    /// rank.
    pub fn connect_port_egress(&self, port_state: Arc<PortState<StreamWord>>) {
        match &self.transport {
            Transport::Udp { packetizer, .. } => packetizer.connect_port_tx(port_state),
            Transport::Tcp(control) => control.stack.connect_port_egress(port_state),
        }
    }
}

pub(crate) fn parse_rank_ip(ip: &str) -> Result<u32, SimError> {
    cclo_models::tcp::parse_ip(ip).map_err(SimError)
}

/// Check the parts of a rank that individual blocks cannot check alone.
fn check_rank(config: &SystemConfig, rank: u32, rank_config: &RankConfig) -> Result<(), SimError> {
    let rx_buffers = &rank_config.rx_buffers;
    let packet_bytes = config.packet_bytes();
    if rx_buffers.bytes < packet_bytes {
        return sim_error!(format!(
            "rank {rank}: receive buffers of {}B cannot hold a {packet_bytes}B packet",
            rx_buffers.bytes
        ));
    }
    let end = u64::from(rx_buffers.count)
        .checked_mul(rx_buffers.bytes)
        .and_then(|size| size.checked_add(rx_buffers.base_address));
    match end {
        Some(end) if end <= rank_config.memory_bytes => Ok(()),
        _ => sim_error!(format!(
            "rank {rank}: {} receive buffers of {}B at {:#x} do not fit in {}B of memory",
            rx_buffers.count, rx_buffers.bytes, rx_buffers.base_address, rank_config.memory_bytes
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmenter_names_are_unique() {
        let mut names: Vec<String> = (0..NUM_SEGMENTERS).map(segmenter_name).collect();
        assert_eq!(names[seg_clane_op(0)], "seg_clane0_op");
        assert_eq!(names[seg_clane_res(2)], "seg_clane2_res");
        names.sort();
        names.dedup();
        assert_eq!(names.len(), NUM_SEGMENTERS);
    }
}
