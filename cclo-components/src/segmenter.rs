// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! A stream segmenter.
//!
//! The segmenter forwards one job per [`SegmenterCmd`]. While forwarding, it
//! sets `dest` on every word and limits each outgoing framed message to
//! `max_frame_words` words by marking `last` at frame boundaries.
//!
//! A command either names the exact number of words to forward, in which case
//! the `last` flags of the input are ignored, or forwards up to and including
//! the next input word marked `last`.
//!
//! # Ports
//!
//! This component has:
//!  - Two [input ports](cclo_engine::port::InPort): `cmd`, `rx`
//!  - Two [output ports](cclo_engine::port::OutPort): `sts`, `tx`

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::sim_error;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, lock, trace};

use crate::types::StreamWord;
use crate::{connect_tx, take_option};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmenterCmd {
    /// Destination given to every forwarded word.
    pub dest: u64,

    /// Number of words to forward, or `None` to forward one input message.
    pub num_words: Option<u64>,

    /// Whether to report completion on the status port.
    pub emit_status: bool,
}

impl fmt::Display for SegmenterCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.num_words {
            Some(n) => write!(f, "seg_cmd[dest={} words={}]", self.dest, n),
            None => write!(f, "seg_cmd[dest={} message]", self.dest),
        }
    }
}

/// Completion report of one segmenter job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmenterStatus {
    /// Number of jobs completed so far, including this one.
    pub completed: u32,

    /// Words forwarded by this job.
    pub words: u64,
}

impl fmt::Display for SegmenterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg_sts[#{} words={}]", self.completed, self.words)
    }
}

#[derive(EntityGet, EntityDisplay)]
pub struct Segmenter {
    entity: Arc<Entity>,
    max_frame_words: u64,
    completed: Mutex<u32>,
    cmd: InPort<SegmenterCmd>,
    rx: InPort<StreamWord>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
    sts: Mutex<Option<OutPort<SegmenterStatus>>>,
}

impl Segmenter {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        max_frame_words: u64,
    ) -> Result<Arc<Self>, SimError> {
        if max_frame_words == 0 {
            return sim_error!(format!(
                "{parent}::{name}: maximum frame size must be at least one word"
            ));
        }

        let entity = Arc::new(Entity::new(parent, name));
        let cmd = InPort::new(&entity, "cmd");
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let sts = OutPort::new(&entity, "sts");
        let segmenter = Arc::new(Self {
            entity,
            max_frame_words,
            completed: Mutex::new(0),
            cmd,
            rx,
            tx: Mutex::new(Some(tx)),
            sts: Mutex::new(Some(sts)),
        });
        engine.register(segmenter.clone());
        Ok(segmenter)
    }

    /// Number of jobs completed so far.
    #[must_use]
    pub fn completed(&self) -> u32 {
        *lock(&self.completed)
    }

    #[must_use]
    pub fn port_cmd(&self) -> Arc<PortState<SegmenterCmd>> {
        self.cmd.state()
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }

    pub fn connect_port_sts(&self, port_state: Arc<PortState<SegmenterStatus>>) {
        connect_tx!(self.sts, connect ; port_state);
    }

    async fn forward(&self, cmd: &SegmenterCmd, tx: &OutPort<StreamWord>) -> Result<u64, SimError> {
        let mut words = 0;
        let mut in_frame = 0;
        loop {
            let mut word = self.rx.get().await?;
            words += 1;
            in_frame += 1;

            let done = match cmd.num_words {
                Some(n) => words >= n,
                None => word.last,
            };
            word.last = done || in_frame == self.max_frame_words;
            if word.last {
                in_frame = 0;
            }
            word.dest = cmd.dest;
            trace!(self.entity ; "forward {}", word);
            tx.put(word).await?;

            if done {
                return Ok(words);
            }
        }
    }
}

#[async_trait]
impl Runnable for Segmenter {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx)?;
        let sts = take_option!(self.sts)?;
        loop {
            let cmd = self.cmd.get().await?;
            debug!(self.entity ; "start {}", cmd);
            let words = if cmd.num_words == Some(0) {
                0
            } else {
                self.forward(&cmd, &tx).await?
            };
            let completed = {
                let mut completed = lock(&self.completed);
                *completed = completed.wrapping_add(1);
                *completed
            };
            if cmd.emit_status {
                sts.put(SegmenterStatus { completed, words }).await?;
            }
        }
    }
}
