// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Models of the blocks of the CCLO collective offload engine.
//!
//! Each model is an actor built with `new_and_register()` and wired up
//! through its `port_*()` and `connect_port_*()` functions. The
//! [`routes`](crate::routes) module fixes where each block sits on the
//! datapath switch.

pub mod arithmetic;
pub mod compression;
pub mod dma;
pub mod eth;
pub mod external_kernel;
pub mod memory;
pub mod mover;
pub mod routes;
pub mod rxbuf;
pub mod rxbuf_session;
pub mod tcp;
pub mod udp;
