// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Bounded channels connecting actors.
//!
//! An [`InPort`] owns the channel state ([`PortState`]) and is the single
//! consumer of it. Any number of [`OutPort`]s can be connected to that state.
//!
//! `put()` suspends while the channel is full and `get()` suspends while it is
//! empty. Nothing else suspends an actor. Once the engine is halting, every
//! `get()` and `put()` resolves to an error.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use cclo_track::entity::Entity;
use cclo_track::{connect, trace};

use crate::executor::is_halting;
use crate::types::{SimError, lock};

/// Channel depth used when none is given.
pub const DEFAULT_CAPACITY: usize = 64;

struct Channel<T> {
    queue: VecDeque<T>,
    capacity: usize,
    waiting_get: Option<Waker>,
    waiting_put: Vec<Waker>,
}

/// The shared state of one channel.
pub struct PortState<T> {
    channel: Mutex<Channel<T>>,
    in_port_entity: Arc<Entity>,
}

impl<T> PortState<T> {
    fn new(in_port_entity: Arc<Entity>, capacity: usize) -> Self {
        Self {
            channel: Mutex::new(Channel {
                queue: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                waiting_get: None,
                waiting_put: Vec::new(),
            }),
            in_port_entity,
        }
    }

    /// Register interest in data arriving. Returns whether data is present.
    fn register_ready(&self, waker: &Waker) -> bool {
        let mut channel = lock(&self.channel);
        if channel.queue.is_empty() {
            channel.waiting_get = Some(waker.clone());
            false
        } else {
            true
        }
    }
}

pub struct InPort<T> {
    pub entity: Arc<Entity>,
    state: Arc<PortState<T>>,
}

impl<T> fmt::Display for InPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.entity, f)
    }
}

impl<T> InPort<T> {
    #[must_use]
    pub fn new(parent: &Arc<Entity>, name: &str) -> Self {
        Self::with_capacity(parent, name, DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(parent: &Arc<Entity>, name: &str, capacity: usize) -> Self {
        let entity = Arc::new(Entity::new(parent, name));
        let state = Arc::new(PortState::new(entity.clone(), capacity));
        Self { entity, state }
    }

    #[must_use]
    pub fn state(&self) -> Arc<PortState<T>> {
        self.state.clone()
    }

    pub fn get(&self) -> PortGet<'_, T> {
        PortGet { port: self }
    }

    /// Best-effort check for data. Only suitable for polling for work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.state.channel).queue.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state.channel).queue.len()
    }
}

/// Ports that can be waited on by [`select_ready`].
pub trait WaitReady: Send + Sync {
    #[doc(hidden)]
    fn register_ready(&self, waker: &Waker) -> bool;
}

impl<T: Send> WaitReady for InPort<T> {
    fn register_ready(&self, waker: &Waker) -> bool {
        self.state.register_ready(waker)
    }
}

/// Wait until one of the ports has data.
///
/// Resolves to the lowest index of a port holding data, so earlier ports have
/// priority.
pub fn select_ready<'a>(ports: &'a [&'a dyn WaitReady]) -> SelectReady<'a> {
    SelectReady { ports }
}

pub struct SelectReady<'a> {
    ports: &'a [&'a dyn WaitReady],
}

impl Future for SelectReady<'_> {
    type Output = Result<usize, SimError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if is_halting() {
            return Poll::Ready(Err(SimError("halted while selecting".to_string())));
        }
        for (i, port) in self.ports.iter().enumerate() {
            if port.register_ready(cx.waker()) {
                return Poll::Ready(Ok(i));
            }
        }
        Poll::Pending
    }
}

pub struct OutPort<T> {
    pub entity: Arc<Entity>,
    state: Option<Arc<PortState<T>>>,
}

impl<T> fmt::Display for OutPort<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.entity, f)
    }
}

impl<T> OutPort<T> {
    #[must_use]
    pub fn new(parent: &Arc<Entity>, name: &str) -> Self {
        Self {
            entity: Arc::new(Entity::new(parent, name)),
            state: None,
        }
    }

    pub fn connect(&mut self, port_state: Arc<PortState<T>>) {
        connect!(self.entity ; port_state.in_port_entity);
        self.state = Some(port_state);
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_some()
    }

    pub fn put(&self, value: T) -> PortPut<'_, T> {
        PortPut {
            port: self,
            value: Some(value),
        }
    }
}

pub struct PortPut<'a, T> {
    port: &'a OutPort<T>,
    value: Option<T>,
}

// The value is only ever moved, never pinned.
impl<T> Unpin for PortPut<'_, T> {}

impl<T> Future for PortPut<'_, T> {
    type Output = Result<(), SimError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if is_halting() {
            return Poll::Ready(Err(SimError(format!("{}: halted during put", this.port))));
        }
        let Some(state) = &this.port.state else {
            return Poll::Ready(Err(SimError(format!("{}: not connected", this.port))));
        };

        let mut channel = lock(&state.channel);
        if channel.queue.len() < channel.capacity {
            if let Some(value) = this.value.take() {
                channel.queue.push_back(value);
            }
            let waiting = channel.waiting_get.take();
            drop(channel);
            if let Some(waker) = waiting {
                waker.wake();
            }
            Poll::Ready(Ok(()))
        } else {
            trace!(this.port.entity ; "full");
            channel.waiting_put.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

pub struct PortGet<'a, T> {
    port: &'a InPort<T>,
}

impl<T> Future for PortGet<'_, T> {
    type Output = Result<T, SimError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if is_halting() {
            return Poll::Ready(Err(SimError(format!("{}: halted during get", self.port))));
        }

        let mut channel = lock(&self.port.state.channel);
        match channel.queue.pop_front() {
            Some(value) => {
                let waiting = std::mem::take(&mut channel.waiting_put);
                drop(channel);
                for waker in waiting {
                    waker.wake();
                }
                Poll::Ready(Ok(value))
            }
            None => {
                channel.waiting_get = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use cclo_track::entity::toplevel;
    use cclo_track::tracker::dev_null_tracker;
    use futures::executor::block_on;

    use super::*;

    #[test]
    fn fifo_order_and_capacity() {
        let top = toplevel(&dev_null_tracker(), "top");
        let rx: InPort<u32> = InPort::with_capacity(&top, "rx", 2);
        let mut tx = OutPort::new(&top, "tx");
        tx.connect(rx.state());

        block_on(async {
            tx.put(1).await.unwrap();
            tx.put(2).await.unwrap();
        });
        assert_eq!(rx.len(), 2);

        // A third put cannot complete until there is space
        let mut third = tx.put(3);
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut third).poll(&mut cx).is_pending());

        assert_eq!(block_on(rx.get()).unwrap(), 1);
        assert!(Pin::new(&mut third).poll(&mut cx).is_ready());
        assert_eq!(block_on(rx.get()).unwrap(), 2);
        assert_eq!(block_on(rx.get()).unwrap(), 3);
        assert!(rx.is_empty());
    }

    #[test]
    fn unconnected_put_fails() {
        let top = toplevel(&dev_null_tracker(), "top");
        let tx: OutPort<u32> = OutPort::new(&top, "tx");
        let err = block_on(tx.put(7)).unwrap_err();
        assert_eq!(err.0, "top::tx: not connected");
    }

    #[test]
    fn select_prefers_lowest_index() {
        let top = toplevel(&dev_null_tracker(), "top");
        let rx0: InPort<u32> = InPort::new(&top, "rx0");
        let rx1: InPort<u32> = InPort::new(&top, "rx1");
        let mut tx0 = OutPort::new(&top, "tx0");
        let mut tx1 = OutPort::new(&top, "tx1");
        tx0.connect(rx0.state());
        tx1.connect(rx1.state());

        block_on(async {
            tx1.put(10).await.unwrap();
            assert_eq!(select_ready(&[&rx0, &rx1]).await.unwrap(), 1);
            tx0.put(20).await.unwrap();
            assert_eq!(select_ready(&[&rx0, &rx1]).await.unwrap(), 0);
        });
    }
}
