// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Build complete multi-rank systems from a YAML topology.
//!
//! A [`System`] holds one [`Cclo`] per rank. The ranks exchange packets
//! through a relay switch that routes every packet to the rank given by its
//! `dest`.
//!
//! ```yaml
//! transport: udp
//! datapath_bytes: 64
//! max_packet_bytes: 1KiB
//! ranks:
//!   - ip: 10.0.0.1
//!     memory_bytes: 1MiB
//!     rx_buffers: { count: 16, bytes: 1KiB, base_address: 0x8_0000 }
//!   - ip: 10.0.0.2
//!     memory_bytes: 1MiB
//!     rx_buffers: { count: 16, bytes: 1KiB, base_address: 0x8_0000 }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cclo_components::switch::{DefaultRouter, Switch};
use cclo_components::types::StreamWord;
use cclo_engine::engine::Engine;
use cclo_engine::sim_error;
use cclo_engine::types::SimError;
use cclo_model_builder::EntityGet;
use cclo_models::external_kernel::{AddByte, Identity, KernelOp};
use cclo_models::tcp::TcpNetwork;
use cclo_track::entity::Entity;
use cclo_track::info;

use crate::cclo::{Cclo, parse_rank_ip};
use crate::types::{SystemConfig, Transport};

pub mod cclo;
pub mod host;
pub mod types;

#[derive(EntityGet)]
pub struct System {
    entity: Arc<Entity>,
    config: SystemConfig,
    ranks: Vec<Cclo>,
    ips: Vec<u32>,
    relay: Arc<Switch<StreamWord>>,
    network: Option<Arc<TcpNetwork>>,
}

impl System {
    pub fn from_file(engine: &mut Engine, system_path: &Path) -> Result<Self, SimError> {
        let s = std::fs::read_to_string(system_path)
            .map_err(|e| SimError(format!("Unable to read {}: {e}", system_path.display())))?;
        System::from_string(engine, &s)
    }

    pub fn from_string(engine: &mut Engine, system_config: &str) -> Result<Self, SimError> {
        System::build(engine, SystemConfig::from_yaml(system_config)?)
    }

    pub fn build(engine: &mut Engine, cfg: SystemConfig) -> Result<Self, SimError> {
        let ips = check_system(&cfg)?;
        if cfg.drain_ms > 0 {
            engine.set_drain_delay(Duration::from_millis(cfg.drain_ms));
        }
        let engine: &Engine = engine;

        let top = engine.top().clone();
        let entity = Arc::new(Entity::new(&top, "system"));
        let network = match cfg.transport {
            Transport::Udp => None,
            Transport::Tcp => Some(Arc::new(TcpNetwork::new(&ips))),
        };

        let ranks = (0..cfg.ranks.len() as u32)
            .map(|rank| {
                let kernel: Box<dyn KernelOp> = match cfg.kernel_increment {
                    0 => Box::new(Identity),
                    n => Box::new(AddByte(n)),
                };
                Cclo::new_and_register(engine, &top, rank, &cfg, network.as_ref(), kernel)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let relay = Switch::with_capacity(
            engine,
            &top,
            "relay",
            ranks.len(),
            ranks.len(),
            Box::new(DefaultRouter {}),
            cfg.eth_channel_depth,
        )?;
        for (i, rank) in ranks.iter().enumerate() {
            rank.connect_port_egress(relay.port_rx_i(i));
            relay.connect_port_tx_i(i, rank.port_ingress());
        }

        info!(entity ; "{} ranks over {:?}", ranks.len(), cfg.transport);
        Ok(System {
            entity,
            config: cfg,
            ranks,
            ips,
            relay,
            network,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    #[must_use]
    pub fn num_ranks(&self) -> usize {
        self.ranks.len()
    }

    pub fn rank(&self, rank: usize) -> Result<&Cclo, SimError> {
        self.ranks
            .get(rank)
            .ok_or_else(|| SimError(format!("{}: no rank {rank}", self.entity)))
    }

    pub fn ranks(&self) -> impl Iterator<Item = &Cclo> {
        self.ranks.iter()
    }

    /// Address of a rank.
    pub fn ip(&self, rank: usize) -> Result<u32, SimError> {
        self.ips
            .get(rank)
            .copied()
            .ok_or_else(|| SimError(format!("{}: no rank {rank}", self.entity)))
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<Switch<StreamWord>> {
        &self.relay
    }

    #[must_use]
    pub fn network(&self) -> Option<&Arc<TcpNetwork>> {
        self.network.as_ref()
    }
}

/// Check the topology as a whole, returning the address of every rank.
fn check_system(cfg: &SystemConfig) -> Result<Vec<u32>, SimError> {
    if cfg.ranks.is_empty() {
        return sim_error!("a system needs at least one rank");
    }
    if cfg.datapath_bytes == 0 || cfg.max_frame_words == 0 || cfg.max_packet_bytes == 0 {
        return sim_error!("datapath, frame and packet sizes must be non-zero");
    }

    let mut seen = HashSet::new();
    cfg.ranks
        .iter()
        .map(|rank| {
            let ip = parse_rank_ip(&rank.ip)?;
            if !seen.insert(ip) {
                return sim_error!(format!("{} is used by more than one rank", rank.ip));
            }
            Ok(ip)
        })
        .collect()
}
