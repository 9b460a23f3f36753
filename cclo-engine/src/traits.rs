// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A set of common traits used across the emulation engine.

use std::fmt::{Debug, Display};

use async_trait::async_trait;

use crate::types::SimResult;

/// The `SimObject` trait is required for an object to be sent through ports.
///
/// Every value crossing a channel may move between OS threads.
pub trait SimObject: Clone + Debug + Display + Send + Sync + 'static {}

impl<T> SimObject for T where T: Clone + Debug + Display + Send + Sync + 'static {}

/// The `Routable` trait provides the destination tag used to steer an object.
pub trait Routable {
    /// Return the destination (`dest`) tag.
    fn dest(&self) -> u64;
}

/// Objects that form part of a framed message.
pub trait Framed {
    /// Whether this is the final object of its message.
    fn is_last(&self) -> bool;
}

/// The `Runnable` trait is implemented by every actor the engine executes.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Run the actor until its inputs are exhausted or the network halts.
    async fn run(&self) -> SimResult {
        Ok(())
    }
}
