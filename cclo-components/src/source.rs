// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A data source.
//!
//! The data source produces data as defined by the [DataGenerator] that is
//! provided.
//!
//! # Ports
//!
//! This component has one port:
//!  - One [output port](cclo_engine::port::OutPort): `tx`

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{OutPort, PortState};
use cclo_engine::traits::{Runnable, SimObject};
use cclo_engine::types::SimResult;
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{lock, trace};

use crate::types::DataGenerator;
use crate::{connect_tx, take_option};

#[derive(EntityGet, EntityDisplay)]
pub struct Source<T>
where
    T: SimObject,
{
    entity: Arc<Entity>,
    data_generator: Mutex<Option<DataGenerator<T>>>,
    tx: Mutex<Option<OutPort<T>>>,
}

impl<T> Source<T>
where
    T: SimObject,
{
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        data_generator: Option<DataGenerator<T>>,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let tx = OutPort::new(&entity, "tx");
        let source = Arc::new(Self {
            entity,
            data_generator: Mutex::new(data_generator),
            tx: Mutex::new(Some(tx)),
        });
        engine.register(source.clone());
        source
    }

    pub fn set_generator(&self, data_generator: Option<DataGenerator<T>>) {
        *lock(&self.data_generator) = data_generator;
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<T>>) {
        connect_tx!(self.tx, connect ; port_state);
    }
}

#[async_trait]
impl<T> Runnable for Source<T>
where
    T: SimObject,
{
    async fn run(&self) -> SimResult {
        let mut data_generator = match lock(&self.data_generator).take() {
            Some(data_generator) => data_generator,
            None => return Ok(()),
        };

        let tx = take_option!(self.tx)?;
        for value in data_generator.by_ref() {
            trace!(self.entity ; "put {}", value);
            tx.put(value).await?;
        }
        Ok(())
    }
}
