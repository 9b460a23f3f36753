// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! DMA engines moving bytes between the [`Memory`] and streams.
//!
//! Commands and statuses follow the layout of an AXI DataMover.
//!
//! A [`DmaRead`] pops a [`DmaCommand`], emits the addressed bytes as one
//! framed message and then returns one [`DmaStatus`].
//!
//! A [`DmaWrite`] pops a [`DmaCommand`] and then consumes words until either
//! `length` bytes have been written or a word marked `last` arrives. The
//! status reports the bytes written and whether an end of packet was seen.
//! Ending early is not an error.
//!
//! An access outside the memory fails with a decode error in the status. The
//! stream side is unaffected: reads still emit a frame of the right shape
//! (with no valid bytes) and writes drain their input.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_components::types::StreamWord;
use cclo_components::{connect_tx, take_option};
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::sim_error;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, warn};

use crate::memory::Memory;

/// Largest transfer a single command can describe.
pub const MAX_DMA_BYTES: u32 = (1 << 23) - 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DmaCommand {
    pub address: u64,
    pub length: u32,
    pub tag: u8,
    pub eof: bool,
}

impl DmaCommand {
    pub fn new(address: u64, length: u32, tag: u8) -> Result<Self, SimError> {
        if length > MAX_DMA_BYTES {
            return sim_error!(format!(
                "DMA length {length} exceeds {MAX_DMA_BYTES} bytes"
            ));
        }
        Ok(Self {
            address,
            length,
            tag: tag & 0xf,
            eof: true,
        })
    }

    /// Pack into the 104-bit command layout.
    ///
    /// `[22:0]` bytes to transfer, `[23]` incrementing burst type, `[30]` EOF,
    /// `[95:32]` address, `[99:96]` tag.
    #[must_use]
    pub fn pack(&self) -> u128 {
        u128::from(self.length & MAX_DMA_BYTES)
            | (1 << 23)
            | (u128::from(self.eof) << 30)
            | (u128::from(self.address) << 32)
            | (u128::from(self.tag & 0xf) << 96)
    }

    #[must_use]
    pub fn unpack(bits: u128) -> Self {
        Self {
            length: (bits & u128::from(MAX_DMA_BYTES)) as u32,
            eof: (bits >> 30) & 1 == 1,
            address: (bits >> 32) as u64,
            tag: ((bits >> 96) & 0xf) as u8,
        }
    }
}

impl fmt::Display for DmaCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dma_cmd[{:#x}+{} tag={}]",
            self.address, self.length, self.tag
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DmaStatus {
    pub tag: u8,
    pub interr: bool,
    pub decerr: bool,
    pub slverr: bool,
    pub okay: bool,
    pub bytes: u32,
    pub end_of_packet: bool,
}

impl DmaStatus {
    /// Pack into the 32-bit status layout.
    ///
    /// `[3:0]` tag, `[4]` INTERR, `[5]` DECERR, `[6]` SLVERR, `[7]` OKAY,
    /// `[30:8]` bytes received, `[31]` end of packet.
    #[must_use]
    pub fn pack(&self) -> u32 {
        u32::from(self.tag & 0xf)
            | (u32::from(self.interr) << 4)
            | (u32::from(self.decerr) << 5)
            | (u32::from(self.slverr) << 6)
            | (u32::from(self.okay) << 7)
            | ((self.bytes & MAX_DMA_BYTES) << 8)
            | (u32::from(self.end_of_packet) << 31)
    }

    #[must_use]
    pub fn unpack(bits: u32) -> Self {
        Self {
            tag: (bits & 0xf) as u8,
            interr: (bits >> 4) & 1 == 1,
            decerr: (bits >> 5) & 1 == 1,
            slverr: (bits >> 6) & 1 == 1,
            okay: (bits >> 7) & 1 == 1,
            bytes: (bits >> 8) & MAX_DMA_BYTES,
            end_of_packet: (bits >> 31) & 1 == 1,
        }
    }
}

impl fmt::Display for DmaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dma_sts[tag={} {} bytes={}{}]",
            self.tag,
            if self.okay { "ok" } else { "err" },
            self.bytes,
            if self.end_of_packet { " eop" } else { "" }
        )
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct DmaRead {
    entity: Arc<Entity>,
    memory: Arc<Memory>,
    width_bytes: usize,
    cmd: InPort<DmaCommand>,
    sts: Mutex<Option<OutPort<DmaStatus>>>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
}

impl DmaRead {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        memory: &Arc<Memory>,
        width_bytes: usize,
        cmd_depth: usize,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let cmd = InPort::with_capacity(&entity, "cmd", cmd_depth);
        let sts = OutPort::new(&entity, "sts");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Arc::new(Self {
            entity,
            memory: memory.clone(),
            width_bytes,
            cmd,
            sts: Mutex::new(Some(sts)),
            tx: Mutex::new(Some(tx)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<DmaCommand>> {
        self.cmd.state()
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<DmaStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for DmaRead {
    async fn run(&self) -> SimResult {
        let sts = take_option!(self.sts)?;
        let tx = take_option!(self.tx)?;

        loop {
            let cmd = self.cmd.get().await?;
            debug!(self.entity ; "read {}", cmd);

            let len = cmd.length as usize;
            let mut status = DmaStatus {
                tag: cmd.tag,
                okay: true,
                ..DmaStatus::default()
            };

            let words = match self.memory.read(cmd.address, len) {
                Ok(bytes) => {
                    status.bytes = cmd.length;
                    StreamWord::frame(&bytes, self.width_bytes, 0)
                }
                Err(e) => {
                    warn!(self.entity ; "{}: {}", cmd, e);
                    status.okay = false;
                    status.decerr = true;
                    let num_words = len.div_ceil(self.width_bytes).max(1);
                    (0..num_words)
                        .map(|i| {
                            let mut word = StreamWord::empty(self.width_bytes);
                            word.last = i + 1 == num_words;
                            word
                        })
                        .collect()
                }
            };

            for word in words {
                tx.put(word).await?;
            }
            sts.put(status).await?;
        }
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct DmaWrite {
    entity: Arc<Entity>,
    memory: Arc<Memory>,
    cmd: InPort<DmaCommand>,
    rx: InPort<StreamWord>,
    sts: Mutex<Option<OutPort<DmaStatus>>>,
}

impl DmaWrite {
    #[must_use]
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        memory: &Arc<Memory>,
        cmd_depth: usize,
    ) -> Arc<Self> {
        let entity = Arc::new(Entity::new(parent, name));
        let cmd = InPort::with_capacity(&entity, "cmd", cmd_depth);
        let rx = InPort::new(&entity, "rx");
        let sts = OutPort::new(&entity, "sts");
        let rc_self = Arc::new(Self {
            entity,
            memory: memory.clone(),
            cmd,
            rx,
            sts: Mutex::new(Some(sts)),
        });
        engine.register(rc_self.clone());
        rc_self
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<DmaCommand>> {
        self.cmd.state()
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<DmaStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }
}

#[async_trait]
impl Runnable for DmaWrite {
    async fn run(&self) -> SimResult {
        let sts = take_option!(self.sts)?;

        loop {
            let cmd = self.cmd.get().await?;
            debug!(self.entity ; "write {}", cmd);

            let mut status = DmaStatus {
                tag: cmd.tag,
                okay: true,
                ..DmaStatus::default()
            };
            let mut written: u32 = 0;
            while written < cmd.length {
                let word = self.rx.get().await?;
                let bytes: Vec<u8> = word.valid_bytes().collect();
                let stored = match cmd.address.checked_add(u64::from(written)) {
                    Some(address) => self.memory.write(address, &bytes),
                    None => sim_error!(format!("{:#x}+{:#x} overflows", cmd.address, written)),
                };
                if let Err(e) = stored {
                    if status.okay {
                        warn!(self.entity ; "{}: {}", cmd, e);
                    }
                    status.okay = false;
                    status.decerr = true;
                }
                written = written.saturating_add(bytes.len() as u32);

                if word.last {
                    status.end_of_packet = true;
                    break;
                }
            }

            status.bytes = written;
            debug!(self.entity ; "{}", status);
            sts.put(status).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_layout() {
        let cmd = DmaCommand::new(0x1234_5678_9abc, 0x40, 5).unwrap();
        let bits = cmd.pack();
        assert_eq!(bits & 0x7f_ffff, 0x40);
        assert_eq!((bits >> 23) & 1, 1);
        assert_eq!((bits >> 30) & 1, 1);
        assert_eq!((bits >> 32) as u64, 0x1234_5678_9abc);
        assert_eq!((bits >> 96) & 0xf, 5);
        assert_eq!(DmaCommand::unpack(bits), cmd);
    }

    #[test]
    fn oversized_command_is_rejected() {
        assert!(DmaCommand::new(0, MAX_DMA_BYTES + 1, 0).is_err());
    }

    #[test]
    fn status_layout() {
        let status = DmaStatus {
            tag: 3,
            okay: true,
            bytes: 100,
            end_of_packet: true,
            ..DmaStatus::default()
        };
        let bits = status.pack();
        assert_eq!(bits, 3 | (1 << 7) | (100 << 8) | (1 << 31));
        assert_eq!(DmaStatus::unpack(bits), status);

        let decerr = DmaStatus {
            decerr: true,
            ..DmaStatus::default()
        };
        assert_eq!(decerr.pack(), 1 << 5);
    }
}
