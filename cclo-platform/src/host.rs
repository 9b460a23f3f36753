// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A scripted host driving the command ports of every rank.
//!
//! Steps run one after another. Each step waits for all of its statuses
//! before the next one starts, so connection setup is complete before data
//! is sent. The commands of a [`HostStep::Moves`] step are all issued before
//! any status is collected, which lets a send on one rank and the matching
//! receive on another proceed together.

use std::sync::{Arc, Mutex};

use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort};
use cclo_engine::types::SimError;
use cclo_models::mover::{MoveCommand, MoveStatus};
use cclo_models::tcp::{ListenRequest, ListenStatus, OpenRequest, OpenStatus};
use cclo_track::entity::Entity;
use cclo_track::{debug, lock, warn};

use crate::System;

#[derive(Clone, Debug)]
pub enum HostStep {
    /// Listen for connections on `rank`.
    Listen { rank: usize, port: u16 },

    /// Open a connection from `rank` to a port `peer` listens on.
    Open { rank: usize, peer: usize, port: u16 },

    /// Issue commands to ranks and wait for all of them to complete.
    Moves(Vec<(usize, MoveCommand)>),
}

/// Everything the host received, in order.
#[derive(Debug, Default)]
pub struct HostReport {
    pub listens: Vec<ListenStatus>,
    pub opens: Vec<OpenStatus>,
    pub moves: Vec<(usize, MoveStatus)>,
}

impl HostReport {
    /// Whether every request completed successfully.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.listens.iter().all(|s| s.ok)
            && self.opens.iter().all(|s| s.ok)
            && self.moves.iter().all(|(_, s)| s.ok)
    }
}

pub type SharedHostReport = Arc<Mutex<HostReport>>;

struct ControlPorts {
    listen_cmd: OutPort<ListenRequest>,
    listen_sts: InPort<ListenStatus>,
    open_cmd: OutPort<OpenRequest>,
    open_sts: InPort<OpenStatus>,
}

struct RankPorts {
    cmd: OutPort<MoveCommand>,
    sts: InPort<MoveStatus>,
    control: Option<ControlPorts>,
}

impl RankPorts {
    fn control(&self, rank: usize) -> Result<&ControlPorts, SimError> {
        self.control
            .as_ref()
            .ok_or_else(|| SimError(format!("rank {rank} has no connections")))
    }
}

/// A step with addresses resolved.
enum Step {
    Listen { rank: usize, port: u16 },
    Open { rank: usize, ip: u32, port: u16 },
    Moves(Vec<(usize, MoveCommand)>),
}

fn host_ports(system: &System, entity: &Arc<Entity>) -> Result<Vec<RankPorts>, SimError> {
    system
        .ranks()
        .enumerate()
        .map(|(i, cclo)| {
            let mut cmd = OutPort::new(entity, &format!("rank{i}_cmd"));
            let sts = InPort::new(entity, &format!("rank{i}_sts"));
            cmd.connect(cclo.port_cmd());
            cclo.connect_port_sts(sts.state());

            let control = match cclo.sessions() {
                Some(_) => {
                    let mut listen_cmd = OutPort::new(entity, &format!("rank{i}_listen_cmd"));
                    let listen_sts = InPort::new(entity, &format!("rank{i}_listen_sts"));
                    let mut open_cmd = OutPort::new(entity, &format!("rank{i}_open_cmd"));
                    let open_sts = InPort::new(entity, &format!("rank{i}_open_sts"));
                    listen_cmd.connect(cclo.port_listen_cmd()?);
                    cclo.connect_port_listen_sts(listen_sts.state())?;
                    open_cmd.connect(cclo.port_open_cmd()?);
                    cclo.connect_port_open_sts(open_sts.state())?;
                    Some(ControlPorts {
                        listen_cmd,
                        listen_sts,
                        open_cmd,
                        open_sts,
                    })
                }
                None => None,
            };
            Ok(RankPorts { cmd, sts, control })
        })
        .collect()
}

/// Spawn a host running `steps` against `system`.
///
/// The returned report is complete once the engine has run.
pub fn spawn_host(
    engine: &Engine,
    system: &System,
    steps: Vec<HostStep>,
) -> Result<SharedHostReport, SimError> {
    let entity = Arc::new(Entity::new(engine.top(), "host"));
    let ports = host_ports(system, &entity)?;

    let check_rank = |rank: usize| {
        if rank < ports.len() {
            Ok(rank)
        } else {
            Err(SimError(format!("{entity}: no rank {rank}")))
        }
    };
    let steps = steps
        .into_iter()
        .map(|step| {
            Ok(match step {
                HostStep::Listen { rank, port } => Step::Listen {
                    rank: check_rank(rank)?,
                    port,
                },
                HostStep::Open { rank, peer, port } => Step::Open {
                    rank: check_rank(rank)?,
                    ip: system.ip(peer)?,
                    port,
                },
                HostStep::Moves(moves) => Step::Moves(
                    moves
                        .into_iter()
                        .map(|(rank, cmd)| Ok((check_rank(rank)?, cmd)))
                        .collect::<Result<_, SimError>>()?,
                ),
            })
        })
        .collect::<Result<Vec<_>, SimError>>()?;

    let report = SharedHostReport::default();
    let host_report = report.clone();
    engine.spawn(async move {
        for step in steps {
            match step {
                Step::Listen { rank, port } => {
                    let control = ports[rank].control(rank)?;
                    control.listen_cmd.put(ListenRequest { port }).await?;
                    let status = control.listen_sts.get().await?;
                    debug!(entity ; "rank {}: {}", rank, status);
                    lock(&host_report).listens.push(status);
                }
                Step::Open { rank, ip, port } => {
                    let control = ports[rank].control(rank)?;
                    control.open_cmd.put(OpenRequest { ip, port }).await?;
                    let status = control.open_sts.get().await?;
                    debug!(entity ; "rank {}: {}", rank, status);
                    lock(&host_report).opens.push(status);
                }
                Step::Moves(moves) => {
                    for (rank, cmd) in &moves {
                        debug!(entity ; "rank {}: {}", rank, cmd);
                        ports[*rank].cmd.put(*cmd).await?;
                    }
                    for (rank, cmd) in &moves {
                        let status = ports[*rank].sts.get().await?;
                        if !status.ok {
                            warn!(entity ; "rank {}: {} failed: {}", rank, cmd, status);
                        }
                        lock(&host_report).moves.push((*rank, status));
                    }
                }
            }
        }
        Ok(())
    });
    Ok(report)
}
