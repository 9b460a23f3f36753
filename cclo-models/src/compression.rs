// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The compression lane.
//!
//! Values are treated as 32-bit fixed point slices whose upper 16 bits are
//! the compressed form. The operation applied to a message is selected by
//! the `dest` of its first word, see [`CastMode`].

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
pub enum CastMode {
    Pass = 0,

    /// Two words of 32-bit slices become one word of 16-bit slices.
    Down = 1,

    /// One word of 16-bit slices becomes two words of 32-bit slices with the
    /// lower halves zero.
    Up = 2,
}

impl TryFrom<u64> for CastMode {
    type Error = SimError;

    fn try_from(tag: u64) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(CastMode::Pass),
            1 => Ok(CastMode::Down),
            2 => Ok(CastMode::Up),
            _ => sim_error!(format!("unsupported compression mode {tag}")),
        }
    }
}

impl fmt::Display for CastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Place the upper halves of the 32-bit slices of `word` in `out`, starting
/// at 16-bit slot `first_slot`.
fn narrow_into(word: &StreamWord, out: &mut StreamWord, first_slot: usize) {
    for (i, slice) in word.data.chunks_exact(4).enumerate() {
        let valid = word.keep[4 * i..4 * i + 4].iter().all(|k| *k);
        let at = 2 * (first_slot + i);
        out.data[at..at + 2].copy_from_slice(&slice[2..4]);
        out.keep[at..at + 2].fill(valid);
    }
}

/// Widen the 16-bit slices `bytes` (with their `keep`) into one word.
fn widen(bytes: &[u8], keep: &[bool], width_bytes: usize) -> StreamWord {
    let mut out = StreamWord::empty(width_bytes);
    for (i, slice) in bytes.chunks_exact(2).enumerate() {
        let valid = keep[2 * i] && keep[2 * i + 1];
        out.data[4 * i + 2..4 * i + 4].copy_from_slice(slice);
        out.keep[4 * i..4 * i + 4].fill(valid);
    }
    out
}

#[derive(EntityGet, EntityDisplay)]
pub struct CompressionLane {
    entity: Arc<Entity>,
    width_bytes: usize,
    rx: InPort<StreamWord>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
    num_rejected: AtomicUsize,
}

impl CompressionLane {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        width_bytes: usize,
    ) -> Result<Arc<Self>, SimError> {
        if width_bytes == 0 || width_bytes % 4 != 0 {
            return sim_error!(format!(
                "{width_bytes}B is not a whole number of 32-bit slices"
            ));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Arc::new(Self {
            entity,
            width_bytes,
            rx,
            tx: Mutex::new(Some(tx)),
            num_rejected: AtomicUsize::new(0),
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

    /// Number of messages dropped for carrying an unsupported mode.
    #[must_use]
    pub fn num_rejected(&self) -> usize {
        self.num_rejected.load(Ordering::Relaxed)
    }

    fn check_width(&self, word: &StreamWord) -> SimResult {
        if word.width_bytes() != self.width_bytes {
            return sim_error!(format!(
                "{}: {} is not {}B wide",
                self.entity, word, self.width_bytes
            ));
        }
        Ok(())
    }

    async fn pass(&self, tx: &OutPort<StreamWord>, first: StreamWord) -> SimResult {
        let mut word = first;
        loop {
            let last = word.last;
            tx.put(word.with_dest(0)).await?;
            if last {
                return Ok(());
            }
            word = self.rx.get().await?;
            self.check_width(&word)?;
        }
    }

    async fn down(&self, tx: &OutPort<StreamWord>, first: StreamWord) -> SimResult {
        let half = self.width_bytes / 4;
        let mut a = first;
        loop {
            let mut out = StreamWord::empty(self.width_bytes);
            narrow_into(&a, &mut out, 0);
            let mut last = a.last;
            if !last {
                let b = self.rx.get().await?;
                self.check_width(&b)?;
                narrow_into(&b, &mut out, half);
                last = b.last;
            }
            out.last = last;
            tx.put(out).await?;
            if last {
                return Ok(());
            }
            a = self.rx.get().await?;
            self.check_width(&a)?;
        }
    }

    async fn up(&self, tx: &OutPort<StreamWord>, first: StreamWord) -> SimResult {
        let half = self.width_bytes / 2;
        let mut word = first;
        loop {
            let mut lower = widen(&word.data[..half], &word.keep[..half], self.width_bytes);
            let mut upper = widen(&word.data[half..], &word.keep[half..], self.width_bytes);
            if word.last && !word.keep[half] {
                lower.last = true;
                tx.put(lower).await?;
            } else {
                upper.last = word.last;
                tx.put(lower).await?;
                tx.put(upper).await?;
            }
            if word.last {
                return Ok(());
            }
            word = self.rx.get().await?;
            self.check_width(&word)?;
        }
    }
}

#[async_trait]
impl Runnable for CompressionLane {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;

        loop {
            let first = self.rx.get().await?;
            self.check_width(&first)?;
            match CastMode::try_from(first.dest) {
                Ok(mode) => {
                    trace!(self.entity ; "{} message", mode);
                    match mode {
                        CastMode::Pass => self.pass(&tx, first).await?,
                        CastMode::Down => self.down(&tx, first).await?,
                        CastMode::Up => self.up(&tx, first).await?,
                    }
                }
                Err(e) => {
                    error!(self.entity ; "dropping message: {}", e.0);
                    self.num_rejected.fetch_add(1, Ordering::Relaxed);
                    drain(&self.rx, &first).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes() {
        assert_eq!(CastMode::try_from(1).unwrap(), CastMode::Down);
        assert_eq!(CastMode::try_from(2).unwrap(), CastMode::Up);
        assert!(CastMode::try_from(3).is_err());
    }

    #[test]
    fn widen_then_narrow() {
        let bytes: Vec<u8> = (1..=8).collect();
        let word = StreamWord::from_bytes(&bytes, 8, true, 0);
        let lower = widen(&word.data[..4], &word.keep[..4], 8);
        assert_eq!(lower.data, vec![0, 0, 1, 2, 0, 0, 3, 4]);

        let mut out = StreamWord::empty(8);
        narrow_into(&lower, &mut out, 0);
        assert_eq!(&out.data[..4], &[1, 2, 3, 4]);
        assert_eq!(out.num_valid(), 4);
    }
}
