// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! An N-to-M stream switch.
//!
//! Each slave (input) forwards whole framed messages to the master (output)
//! selected by a [`Route`]. The route is decided from the first word of a
//! message and applies to every word up to and including `last`.
//!
//! A master is granted to one slave for the duration of a message, so words
//! from two messages never interleave on a master. When several slaves wait
//! for the same master it goes to the lowest-numbered one. Slaves are
//! otherwise independent: a slave blocked on a busy master does not stop the
//! others.
//!
//! # Ports
//!
//! This component has:
//!  - N [input ports](cclo_engine::port::InPort): `rx[i]` for `i in [0, N-1]`
//!  - M [output ports](cclo_engine::port::OutPort): `tx[i]` for `i in [0,
//!    M-1]`

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::sim_error;
use cclo_engine::traits::{Framed, Routable, Runnable, SimObject};
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{lock, trace};
use futures::future::try_join_all;

use crate::take_option;

pub trait Route<T>: Send + Sync {
    /// Select one of `num_masters` outputs for a message starting with
    /// `first`.
    fn route(&self, first: &T, num_masters: usize) -> usize;
}

/// Route by `dest`, saturating at the last master.
pub struct DefaultRouter {}

impl<T> Route<T> for DefaultRouter
where
    T: Routable,
{
    fn route(&self, first: &T, num_masters: usize) -> usize {
        let last_master = num_masters.saturating_sub(1);
        usize::try_from(first.dest()).map_or(last_master, |dest| dest.min(last_master))
    }
}

/// Hands a master to one slave at a time.
#[derive(Default)]
struct Arbiter {
    state: Mutex<ArbiterState>,
}

#[derive(Default)]
struct ArbiterState {
    owner: Option<usize>,
    waiting: BTreeMap<usize, Waker>,
}

impl Arbiter {
    fn acquire(&self, slave: usize) -> Acquire<'_> {
        Acquire {
            arbiter: self,
            slave,
        }
    }

    fn release(&self) {
        let mut state = lock(&self.state);
        state.owner = None;
        if let Some(waker) = state.waiting.values().next() {
            waker.wake_by_ref();
        }
    }
}

struct Acquire<'a> {
    arbiter: &'a Arbiter,
    slave: usize,
}

impl<'a> Future for Acquire<'a> {
    type Output = Grant<'a>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let arbiter = self.arbiter;
        let slave = self.slave;
        let mut state = lock(&arbiter.state);
        let first_waiting = state.waiting.keys().next().copied();
        if state.owner.is_none() && first_waiting.is_none_or(|first| first >= slave) {
            state.waiting.remove(&slave);
            state.owner = Some(slave);
            Poll::Ready(Grant { arbiter })
        } else {
            state.waiting.insert(slave, cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Ownership of a master, given up on drop.
struct Grant<'a> {
    arbiter: &'a Arbiter,
}

impl Drop for Grant<'_> {
    fn drop(&mut self) {
        self.arbiter.release();
    }
}

struct Master<T> {
    arbiter: Arbiter,
    tx: OutPort<T>,
}

#[derive(EntityGet, EntityDisplay)]
pub struct Switch<T>
where
    T: SimObject + Routable + Framed,
{
    entity: Arc<Entity>,
    rx: Vec<InPort<T>>,
    tx: Mutex<Option<Vec<OutPort<T>>>>,
    router: Box<dyn Route<T>>,
}

impl<T> Switch<T>
where
    T: SimObject + Routable + Framed,
{
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        num_slaves: usize,
        num_masters: usize,
        router: Box<dyn Route<T>>,
    ) -> Result<Arc<Self>, SimError> {
        Self::with_capacity(engine, parent, name, num_slaves, num_masters, router, 0)
    }

    /// As [`Switch::new_and_register`] with a given depth for every slave
    /// channel. A depth of zero selects the default.
    pub fn with_capacity(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        num_slaves: usize,
        num_masters: usize,
        router: Box<dyn Route<T>>,
        capacity: usize,
    ) -> Result<Arc<Self>, SimError> {
        if num_slaves == 0 || num_masters == 0 {
            return sim_error!(format!(
                "{parent}::{name}: switch needs at least one slave and one master"
            ));
        }

        let entity = Arc::new(Entity::new(parent, name));
        let rx = (0..num_slaves)
            .map(|i| {
                let name = format!("rx{i}");
                if capacity == 0 {
                    InPort::new(&entity, &name)
                } else {
                    InPort::with_capacity(&entity, &name, capacity)
                }
            })
            .collect();
        let tx = (0..num_masters)
            .map(|i| OutPort::new(&entity, &format!("tx{i}")))
            .collect();
        let switch = Arc::new(Self {
            entity,
            rx,
            tx: Mutex::new(Some(tx)),
            router,
        });
        engine.register(switch.clone());
        Ok(switch)
    }

    #[must_use]
    pub fn num_slaves(&self) -> usize {
        self.rx.len()
    }

    /// # Panics
    ///
    /// If `i` is not a slave index.
    #[must_use]
    pub fn port_rx_i(&self, i: usize) -> Arc<PortState<T>> {
        match self.rx.get(i) {
            Some(rx) => rx.state(),
            None => panic!("{}: no rx port {}", self.entity, i),
        }
    }

    /// # Panics
    ///
    /// If `i` is not a master index.
    pub fn connect_port_tx_i(&self, i: usize, port_state: Arc<PortState<T>>) {
        if let Some(tx) = lock(&self.tx).as_mut() {
            match tx.get_mut(i) {
                Some(tx) => tx.connect(port_state),
                None => panic!("{}: no tx port {}", self.entity, i),
            }
        }
    }

    async fn forward(&self, slave: usize, masters: &[Master<T>]) -> SimResult {
        let rx = &self.rx[slave];
        loop {
            let first = rx.get().await?;
            let master_index = self.router.route(&first, masters.len());
            let master = &masters[master_index];
            let _grant = master.arbiter.acquire(slave).await;
            trace!(self.entity ; "rx{} => tx{}: {}", slave, master_index, first);

            let mut last = first.is_last();
            master.tx.put(first).await?;
            while !last {
                let word = rx.get().await?;
                last = word.is_last();
                master.tx.put(word).await?;
            }
        }
    }
}

#[async_trait]
impl<T> Runnable for Switch<T>
where
    T: SimObject + Routable + Framed,
{
    async fn run(&self) -> SimResult {
        let masters: Vec<_> = take_option!(self.tx)?
            .into_iter()
            .map(|tx| Master {
                arbiter: Arbiter::default(),
                tx,
            })
            .collect();
        let masters = masters.as_slice();
        try_join_all((0..self.rx.len()).map(|slave| self.forward(slave, masters))).await?;
        Ok(())
    }
}

