// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The dataflow engine of the CCLO emulator.
//!
//! An emulated offload engine is a static network of actors connected by
//! bounded channels, in the manner of a Kahn process network. Each actor is a
//! [`Runnable`](crate::traits::Runnable) whose `run()` loop blocks only on
//! channel operations.
//!
//! # Example
//!
//! ```rust
//! use cclo_engine::engine::Engine;
//! use cclo_engine::port::{InPort, OutPort};
//! use cclo_engine::run_simulation;
//! use cclo_track::tracker::dev_null_tracker;
//!
//! let mut engine = Engine::new(&dev_null_tracker());
//! let rx: InPort<u32> = InPort::new(engine.top(), "rx");
//! let mut tx = OutPort::new(engine.top(), "tx");
//! tx.connect(rx.state());
//!
//! engine.spawn(async move {
//!     for i in 0..4 {
//!         tx.put(i).await?;
//!     }
//!     Ok(())
//! });
//! engine.spawn(async move {
//!     for i in 0..4 {
//!         assert_eq!(rx.get().await?, i);
//!     }
//!     Ok(())
//! });
//! run_simulation!(engine);
//! ```

pub mod engine;
pub mod executor;
pub mod port;
pub mod test_helpers;
pub mod traits;
pub mod types;

#[macro_export]
/// Run the engine and check the result.
///
/// With only the engine the run must succeed. When an error string is given
/// the run must fail with exactly that error.
macro_rules! run_simulation {
    ($engine:ident) => {
        $engine.run().unwrap();
    };
    ($engine:ident, $expect:expr) => {
        match $engine.run() {
            Ok(()) => panic!("Expected an error!"),
            Err(e) => assert_eq!(format!("{e}").as_str(), $expect),
        }
    };
}
