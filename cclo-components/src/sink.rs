// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Sink components.
//!
//! A [`Sink`] consumes everything it receives and keeps it so that tests and
//! host drivers can inspect what arrived.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, PortState};
use cclo_engine::traits::{Runnable, SimObject};
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{lock, trace};

#[derive(EntityGet, EntityDisplay)]
pub struct Sink<T>
where
    T: SimObject,
{
    entity: Arc<Entity>,
    sunk: Mutex<Vec<T>>,
    rx: InPort<T>,
}

impl<T> Sink<T>
where
    T: SimObject,
{
    #[must_use]
    pub fn new_and_register(engine: &Engine, parent: &Arc<Entity>, name: &str) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let sink = Arc::new(Self {
            entity,
            sunk: Mutex::new(Vec::new()),
            rx,
        });
        engine.register(sink.clone());
        sink
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<T>> {
        self.rx.state()
    }

    #[must_use]
    pub fn num_sunk(&self) -> usize {
        lock(&self.sunk).len()
    }

    /// Everything received so far, in arrival order.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        lock(&self.sunk).clone()
    }
}

#[async_trait]
impl<T> Runnable for Sink<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        loop {
            let value = self.rx.get().await?;
            trace!(self.entity ; "sunk {}", value);
            lock(&self.sunk).push(value);
        }
    }
}
