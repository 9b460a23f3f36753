// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Port numbering of the datapath switch of one rank.
//!
//! Words entering a slave are steered to the master given by their `dest`.

pub const NUM_SLAVES: usize = 8;
pub const NUM_MASTERS: usize = 10;

pub const SLAVE_DMA0_READ: usize = 0;
pub const SLAVE_DMA1_READ: usize = 1;
pub const SLAVE_EXT_KRNL: usize = 2;
pub const SLAVE_ARITH_RES: usize = 3;
pub const SLAVE_CLANE0: usize = 4;
pub const SLAVE_CLANE1: usize = 5;
pub const SLAVE_CLANE2: usize = 6;
pub const SLAVE_ETH_RX: usize = 7;

pub const MASTER_DMA0_WRITE: u64 = 0;
pub const MASTER_DMA1_WRITE: u64 = 1;
pub const MASTER_ETH_TX: u64 = 2;
pub const MASTER_ARITH_OP0: u64 = 3;
pub const MASTER_ARITH_OP1: u64 = 4;
pub const MASTER_CLANE0: u64 = 5;
pub const MASTER_CLANE1: u64 = 6;
pub const MASTER_CLANE2: u64 = 7;
pub const MASTER_EXT_KRNL: u64 = 8;
pub const MASTER_BYPASS: u64 = 9;

/// Number of compression lanes.
pub const NUM_CLANES: usize = 3;

/// Segmenters, one per stream entering or leaving the switch.
pub const SEG_DMA0_READ: usize = 0;
pub const SEG_DMA1_READ: usize = 1;
pub const SEG_KRNL_IN: usize = 2;
pub const SEG_KRNL_OUT: usize = 3;
pub const SEG_ARITH_OP0: usize = 4;
pub const SEG_ARITH_OP1: usize = 5;
pub const SEG_ARITH_RES: usize = 6;
pub const NUM_SEGMENTERS: usize = 13;

/// Segmenter feeding compression lane `lane`.
#[must_use]
pub const fn seg_clane_op(lane: usize) -> usize {
    7 + 2 * lane
}

/// Segmenter carrying the result of compression lane `lane`.
#[must_use]
pub const fn seg_clane_res(lane: usize) -> usize {
    8 + 2 * lane
}

/// Switch master feeding compression lane `lane`.
#[must_use]
pub const fn master_clane(lane: usize) -> u64 {
    MASTER_CLANE0 + lane as u64
}

/// Switch slave receiving the result of compression lane `lane`.
#[must_use]
pub const fn slave_clane(lane: usize) -> usize {
    SLAVE_CLANE0 + lane
}
