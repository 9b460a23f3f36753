// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A library of generic stream components.
//!
//! These components move [`StreamWord`](crate::types::StreamWord)s (or any
//! other [`SimObject`](cclo_engine::traits::SimObject)) between actors. They
//! are the building blocks of the CCLO datapath: switches, multiplexers, width
//! converters and segmenters.

pub mod connect;
pub mod mux;
pub mod segmenter;
pub mod sink;
pub mod source;
pub mod switch;
pub mod types;
pub mod width_converter;
