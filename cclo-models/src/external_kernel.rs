// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A stand-in for a user compute kernel attached to the offload engine.
//!
//! The kernel sees plain framed messages: the `dest` of every word is
//! cleared before the [`KernelOp`] is applied, and the result keeps the
//! framing of the input.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::types::StreamWord;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::traits::Runnable;
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::trace;

/// The per-word transformation of a kernel.
pub trait KernelOp: Send + Sync {
    fn apply(&self, word: StreamWord) -> StreamWord;
}

/// Returns every word unchanged.
pub struct Identity;

impl KernelOp for Identity {
    fn apply(&self, word: StreamWord) -> StreamWord {
        word
    }
}

/// Adds a constant to every valid byte.
pub struct AddByte(pub u8);

impl KernelOp for AddByte {
    fn apply(&self, mut word: StreamWord) -> StreamWord {
        for (d, k) in word.data.iter_mut().zip(word.keep.iter()) {
            if *k {
                *d = d.wrapping_add(self.0);
            }
        }
        word
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct ExternalKernel {
    entity: Arc<Entity>,
    op: Box<dyn KernelOp>,
    rx: InPort<StreamWord>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
}

impl ExternalKernel {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        op: Box<dyn KernelOp>,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Arc::new(Self {
            entity,
            op,
            rx,
            tx: Mutex::new(Some(tx)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for ExternalKernel {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;

        loop {
            let word = self.rx.get().await?.with_dest(0);
            trace!(self.entity ; "{}", word);
            tx.put(self.op.apply(word)).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_byte_skips_invalid_bytes() {
        let word = StreamWord::from_bytes(&[1, 255], 4, true, 0);
        let out = AddByte(2).apply(word);
        assert_eq!(out.data, vec![3, 1, 0, 0]);
        assert!(out.last);
    }
}
