// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A 2:1 message multiplexer.
//!
//! Forwards one complete framed message at a time from either input. When
//! both inputs hold data, `rx0` is served first.
//!
//! # Ports
//!
//! This component has:
//!  - Two [input ports](cclo_engine::port::InPort): `rx0`, `rx1`
//!  - One [output port](cclo_engine::port::OutPort): `tx`

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState, select_ready};
use cclo_engine::traits::{Framed, Runnable, SimObject};
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::trace;

use crate::{connect_tx, take_option};

#[derive(EntityGet, EntityDisplay)]
pub struct Mux<T>
where
    T: SimObject + Framed,
{
    entity: Arc<Entity>,
    rx0: InPort<T>,
    rx1: InPort<T>,
    tx: Mutex<Option<OutPort<T>>>,
}

impl<T> Mux<T>
where
    T: SimObject + Framed,
{
    #[must_use]
    pub fn new_and_register(engine: &Engine, parent: &Arc<Entity>, name: &str) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let rx0 = InPort::new(&entity, "rx0");
        let rx1 = InPort::new(&entity, "rx1");
        let tx = OutPort::new(&entity, "tx");
        let mux = Arc::new(Self {
            entity,
            rx0,
            rx1,
            tx: Mutex::new(Some(tx)),
        });
        engine.register(mux.clone());
        mux
    }

    #[must_use]
    pub fn port_rx0(&self) -> Arc<PortState<T>> {
        self.rx0.state()
    }

    #[must_use]
    pub fn port_rx1(&self) -> Arc<PortState<T>> {
        self.rx1.state()
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<T>>) {
        connect_tx!(self.tx, connect ; port_state);
    }
}

#[async_trait]
impl<T> Runnable for Mux<T>
where
    T: SimObject + Framed,
{
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;
        loop {
            let rx = match select_ready(&[&self.rx0, &self.rx1]).await? {
                0 => &self.rx0,
                _ => &self.rx1,
            };
            trace!(self.entity ; "forward message from {}", rx);
            loop {
                let word = rx.get().await?;
                let last = word.is_last();
                tx.put(word).await?;
                if last {
                    break;
                }
            }
        }
    }
}
