// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Scenarios the emulator can run, with the results they must produce.

use std::fmt;

use cclo_engine::sim_error;
use cclo_engine::types::SimError;
use cclo_models::arithmetic::ArithOp;
use cclo_models::compression::CastMode;
use cclo_models::mover::MoveCommand;
use cclo_platform::System;
use cclo_platform::host::HostStep;
use cclo_platform::types::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const SRC: u64 = 0;
const OP1: u64 = 0x2_0000;
const MID: u64 = 0x4_0000;
const DST: u64 = 0x8_0000;

/// Largest message any scenario will move.
pub const MAX_LEN: u32 = (OP1 - SRC) as u32;

const TAG: u32 = 1;
const PORT: u16 = 5001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Copy a message within rank 0.
    Copy,

    /// Add two vectors of 32-bit integers on rank 0.
    Combine,

    /// Send a message from rank 0 and receive it on rank 1.
    SendRecv,

    /// Pass a message through the external kernel of rank 0.
    Kernel,

    /// Widen a message through one compression lane and narrow it back
    /// through another.
    Cast,
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scenario::Copy => "copy",
            Scenario::Combine => "combine",
            Scenario::SendRecv => "send-recv",
            Scenario::Kernel => "kernel",
            Scenario::Cast => "cast",
        };
        write!(f, "{name}")
    }
}

/// Bytes expected in the memory of a rank once the scenario has run.
#[derive(Debug)]
pub struct Check {
    pub rank: usize,
    pub address: u64,
    pub expected: Vec<u8>,
}

pub struct Plan {
    pub steps: Vec<HostStep>,
    pub checks: Vec<Check>,
}

fn random_bytes(rng: &mut StdRng, len: u32) -> Vec<u8> {
    (0..len).map(|_| rng.r#gen()).collect()
}

fn check_len(scenario: Scenario, len: u32, multiple: u32) -> Result<(), SimError> {
    if len == 0 || len > MAX_LEN {
        return sim_error!(format!(
            "{scenario}: length must be between 1 and {MAX_LEN}, not {len}"
        ));
    }
    if len % multiple != 0 {
        return sim_error!(format!(
            "{scenario}: length must be a multiple of {multiple}, not {len}"
        ));
    }
    Ok(())
}

/// Load the inputs of `scenario` into `system` and return the host steps
/// that run it.
pub fn prepare(system: &System, scenario: Scenario, len: u32, seed: u64) -> Result<Plan, SimError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let rank0 = system.rank(0)?;

    let (steps, checks) = match scenario {
        Scenario::Copy => {
            check_len(scenario, len, 1)?;
            let data = random_bytes(&mut rng, len);
            rank0.memory().write(SRC, &data)?;
            let cmd = MoveCommand::Copy { src: SRC, dst: DST, len };
            (vec![HostStep::Moves(vec![(0, cmd)])], vec![check(0, DST, data)])
        }
        Scenario::Combine => {
            let op = ArithOp::I32;
            check_len(scenario, len, op.element_bytes() as u32)?;
            let op0 = random_bytes(&mut rng, len);
            let op1 = random_bytes(&mut rng, len);
            rank0.memory().write(SRC, &op0)?;
            rank0.memory().write(OP1, &op1)?;
            let expected = op0
                .chunks_exact(4)
                .zip(op1.chunks_exact(4))
                .flat_map(|(a, b)| {
                    let a = i32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                    let b = i32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    a.wrapping_add(b).to_le_bytes()
                })
                .collect();
            let cmd = MoveCommand::Combine {
                op,
                op0: SRC,
                op1: OP1,
                res: DST,
                len,
            };
            (vec![HostStep::Moves(vec![(0, cmd)])], vec![check(0, DST, expected)])
        }
        Scenario::SendRecv => {
            check_len(scenario, len, 1)?;
            if system.num_ranks() < 2 {
                return sim_error!(format!("{scenario}: needs at least two ranks"));
            }
            let data = random_bytes(&mut rng, len);
            rank0.memory().write(SRC, &data)?;

            let mut steps = Vec::new();
            if system.config().transport == Transport::Tcp {
                steps.push(HostStep::Listen { rank: 1, port: PORT });
                steps.push(HostStep::Open {
                    rank: 0,
                    peer: 1,
                    port: PORT,
                });
            }
            steps.push(HostStep::Moves(vec![
                (
                    0,
                    MoveCommand::Send {
                        src: SRC,
                        len,
                        dst_rank: 1,
                        tag: TAG,
                    },
                ),
                (
                    1,
                    MoveCommand::Recv {
                        dst: DST,
                        len,
                        src_rank: 0,
                        tag: TAG,
                    },
                ),
            ]));
            (steps, vec![check(1, DST, data)])
        }
        Scenario::Kernel => {
            check_len(scenario, len, 1)?;
            let data = random_bytes(&mut rng, len);
            rank0.memory().write(SRC, &data)?;
            let increment = system.config().kernel_increment;
            let expected = data.iter().map(|b| b.wrapping_add(increment)).collect();
            let cmd = MoveCommand::Kernel { src: SRC, dst: DST, len };
            (vec![HostStep::Moves(vec![(0, cmd)])], vec![check(0, DST, expected)])
        }
        Scenario::Cast => {
            check_len(scenario, len, 2)?;
            let data = random_bytes(&mut rng, len);
            rank0.memory().write(SRC, &data)?;
            let widened = data.chunks_exact(2).flat_map(|x| [0, 0, x[0], x[1]]).collect();
            let up = MoveCommand::Cast {
                lane: 1,
                mode: CastMode::Up,
                src: SRC,
                dst: MID,
                len,
            };
            let down = MoveCommand::Cast {
                lane: 2,
                mode: CastMode::Down,
                src: MID,
                dst: DST,
                len: len * 2,
            };
            (
                vec![HostStep::Moves(vec![(0, up)]), HostStep::Moves(vec![(0, down)])],
                vec![check(0, MID, widened), check(0, DST, data)],
            )
        }
    };
    Ok(Plan { steps, checks })
}

fn check(rank: usize, address: u64, expected: Vec<u8>) -> Check {
    Check {
        rank,
        address,
        expected,
    }
}

/// Compare memory against every check, returning a message for each
/// mismatch.
pub fn verify(system: &System, checks: &[Check]) -> Result<Vec<String>, SimError> {
    let mut mismatches = Vec::new();
    for check in checks {
        let actual = system
            .rank(check.rank)?
            .memory()
            .read(check.address, check.expected.len())?;
        if let Some(offset) = actual.iter().zip(&check.expected).position(|(a, e)| a != e) {
            mismatches.push(format!(
                "rank {} at {:#x}: expected {:#04x}, found {:#04x}",
                check.rank,
                check.address + offset as u64,
                check.expected[offset],
                actual[offset]
            ));
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use cclo_engine::run_simulation;
    use cclo_engine::test_helpers::start_test;
    use cclo_platform::host::spawn_host;
    use cclo_platform::types::SystemConfig;

    use super::*;

    fn run(scenario: Scenario, transport: Transport, len: u32) {
        let mut engine = start_test(file!());
        let mut config = SystemConfig::from_yaml(crate::DEFAULT_TOPOLOGY).unwrap();
        config.transport = transport;
        config.kernel_increment = 5;
        let system = System::build(&mut engine, config).unwrap();

        let plan = prepare(&system, scenario, len, 42).unwrap();
        let report = spawn_host(&engine, &system, plan.steps).unwrap();
        run_simulation!(engine);

        assert!(report.lock().unwrap().all_ok());
        assert!(verify(&system, &plan.checks).unwrap().is_empty());
    }

    #[test]
    fn copy() {
        run(Scenario::Copy, Transport::Udp, 5000);
    }

    #[test]
    fn combine() {
        run(Scenario::Combine, Transport::Udp, 4096);
    }

    #[test]
    fn send_recv_udp() {
        run(Scenario::SendRecv, Transport::Udp, 3000);
    }

    #[test]
    fn send_recv_tcp() {
        run(Scenario::SendRecv, Transport::Tcp, 3000);
    }

    #[test]
    fn kernel() {
        run(Scenario::Kernel, Transport::Udp, 777);
    }

    #[test]
    fn cast() {
        run(Scenario::Cast, Transport::Udp, 1000);
    }

    #[test]
    fn lengths_are_checked() {
        let mut engine = start_test(file!());
        let system = System::from_string(&mut engine, crate::DEFAULT_TOPOLOGY).unwrap();
        let err = |scenario, len| prepare(&system, scenario, len, 0).err().unwrap();

        assert_eq!(
            err(Scenario::Copy, 0),
            SimError("copy: length must be between 1 and 131072, not 0".to_string())
        );
        assert_eq!(
            err(Scenario::Combine, 10),
            SimError("combine: length must be a multiple of 4, not 10".to_string())
        );
        assert_eq!(
            err(Scenario::Cast, 7),
            SimError("cast: length must be a multiple of 2, not 7".to_string())
        );
    }

    #[test]
    fn mismatches_are_reported() {
        let mut engine = start_test(file!());
        let system = System::from_string(&mut engine, crate::DEFAULT_TOPOLOGY).unwrap();
        system.rank(0).unwrap().memory().write(0x100, &[1, 2, 3]).unwrap();
        let checks = [check(0, 0x100, vec![1, 2, 4])];
        assert_eq!(
            verify(&system, &checks).unwrap(),
            vec!["rank 0 at 0x102: expected 0x04, found 0x03".to_string()]
        );
    }
}
