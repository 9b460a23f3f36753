// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The arithmetic lane.
//!
//! Sums two operand streams elementwise. The element type is selected by the
//! `dest` of the first word of operand 0, see [`ArithOp`]. The result takes
//! the framing of operand 0.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
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
use cclo_track::{error, trace};

use crate::udp::drain;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    F32 = 0,
    F64 = 1,
    I32 = 2,
    I64 = 3,
}

impl ArithOp {
    #[must_use]
    pub fn element_bytes(&self) -> usize {
        match self {
            ArithOp::F32 | ArithOp::I32 => 4,
            ArithOp::F64 | ArithOp::I64 => 8,
        }
    }

    /// Sum one pair of little-endian elements into `out`.
    fn sum(&self, a: &[u8], b: &[u8], out: &mut [u8]) {
        match self {
            ArithOp::F32 => {
                let s = f32::from_le_bytes(to_array(a)) + f32::from_le_bytes(to_array(b));
                out.copy_from_slice(&s.to_le_bytes());
            }
            ArithOp::F64 => {
                let s = f64::from_le_bytes(to_array(a)) + f64::from_le_bytes(to_array(b));
                out.copy_from_slice(&s.to_le_bytes());
            }
            ArithOp::I32 => {
                let s = i32::from_le_bytes(to_array(a))
                    .wrapping_add(i32::from_le_bytes(to_array(b)));
                out.copy_from_slice(&s.to_le_bytes());
            }
            ArithOp::I64 => {
                let s = i64::from_le_bytes(to_array(a))
                    .wrapping_add(i64::from_le_bytes(to_array(b)));
                out.copy_from_slice(&s.to_le_bytes());
            }
        }
    }
}

/// Slices handed to `to_array` are always exactly `N` bytes long.
fn to_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(bytes);
    array
}

impl TryFrom<u64> for ArithOp {
    type Error = SimError;

    fn try_from(tag: u64) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(ArithOp::F32),
            1 => Ok(ArithOp::F64),
            2 => Ok(ArithOp::I32),
            3 => Ok(ArithOp::I64),
            _ => sim_error!(format!("unsupported arithmetic operation {tag}")),
        }
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

static ZEROS: [u8; 8] = [0; 8];

/// Sum `op0` and `op1` over the elements that are fully kept in `op0`.
#[must_use]
pub fn sum_words(op: ArithOp, op0: &StreamWord, op1: &StreamWord) -> StreamWord {
    let n = op.element_bytes();
    let mut out = StreamWord {
        data: vec![0; op0.width_bytes()],
        keep: op0.keep.clone(),
        last: op0.last,
        dest: op0.dest,
    };
    for start in (0..op0.width_bytes()).step_by(n) {
        let end = start + n;
        if end > op0.width_bytes() || !op0.keep[start..end].iter().all(|k| *k) {
            continue;
        }
        let b = op1.data.get(start..end).unwrap_or(&ZEROS[..n]);
        op.sum(&op0.data[start..end], b, &mut out.data[start..end]);
    }
    out
}

#[derive(EntityGet, EntityDisplay)]
pub struct ArithmeticLane {
    entity: Arc<Entity>,
    op0: InPort<StreamWord>,
    op1: InPort<StreamWord>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
    num_rejected: AtomicUsize,
}

impl ArithmeticLane {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        width_bytes: usize,
    ) -> Result<Arc<Self>, SimError> {
        if width_bytes == 0 || width_bytes % 8 != 0 {
            return sim_error!(format!(
                "{width_bytes}B is not a whole number of 64-bit elements"
            ));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let op0 = InPort::new(&entity, "op0");
        let op1 = InPort::new(&entity, "op1");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Arc::new(Self {
            entity,
            op0,
            op1,
            tx: Mutex::new(Some(tx)),
            num_rejected: AtomicUsize::new(0),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    #[must_use]
    pub fn port_op0(&self) -> Arc<PortState<StreamWord>> {
        self.op0.state()
    }

    #[must_use]
    pub fn port_op1(&self) -> Arc<PortState<StreamWord>> {
        self.op1.state()
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }

    /// Number of messages dropped for carrying an unsupported operation.
    #[must_use]
    pub fn num_rejected(&self) -> usize {
        self.num_rejected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Runnable for ArithmeticLane {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;

        loop {
            let mut a = self.op0.get().await?;
            let mut b = self.op1.get().await?;
            let op = match ArithOp::try_from(a.dest) {
                Ok(op) => op,
                Err(e) => {
                    error!(self.entity ; "dropping message: {}", e.0);
                    self.num_rejected.fetch_add(1, Ordering::Relaxed);
                    drain(&self.op0, &a).await?;
                    drain(&self.op1, &b).await?;
                    continue;
                }
            };
            trace!(self.entity ; "{} message", op);

            // Operand 1 reads as zero once its message has ended
            let mut op1_done = false;
            loop {
                if op1_done {
                    b = StreamWord::empty(a.width_bytes());
                }
                let last = a.last;
                op1_done = op1_done || b.last;
                tx.put(sum_words(op, &a, &b)).await?;
                if last {
                    break;
                }
                a = self.op0.get().await?;
                if !op1_done {
                    b = self.op1.get().await?;
                }
            }
            if !op1_done {
                drain(&self.op1, &b).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(bytes: &[u8], dest: u64) -> StreamWord {
        StreamWord::from_bytes(bytes, 8, true, dest)
    }

    #[test]
    fn integer_sums_wrap() {
        let a = word(&[i32::MAX.to_le_bytes(), 1i32.to_le_bytes()].concat(), 2);
        let b = word(&[1i32.to_le_bytes(), 2i32.to_le_bytes()].concat(), 0);
        let out = sum_words(ArithOp::I32, &a, &b);
        assert_eq!(&out.data[..4], &i32::MIN.to_le_bytes());
        assert_eq!(&out.data[4..], &3i32.to_le_bytes());
        assert!(out.last);
    }

    #[test]
    fn partial_elements_are_skipped() {
        let a = word(&[0, 0, 0x80, 0x3f, 1, 2], 0);
        let b = word(&[0, 0, 0x80, 0x3f, 0, 0, 0, 0], 0);
        let out = sum_words(ArithOp::F32, &a, &b);
        assert_eq!(&out.data[..4], &2.0f32.to_le_bytes());
        assert_eq!(&out.data[4..], &[0, 0, 0, 0]);
        assert_eq!(out.num_valid(), 6);
    }

    #[test]
    fn operations() {
        assert_eq!(ArithOp::try_from(1).unwrap(), ArithOp::F64);
        assert_eq!(ArithOp::I64.element_bytes(), 8);
        assert!(ArithOp::try_from(4).is_err());
    }
}
