// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Stream width conversion.
//!
//! A [`WidthConverter`] adapts a stream of `in_bytes` wide words to a stream
//! of `out_bytes` wide words. The chain of stages is planned once when the
//! converter is created:
//!
//!  - equal widths pass words through
//!  - an output that is a multiple of the input is one up stage
//!  - an input that is a multiple of the output is one down stage
//!  - any other pair goes up to the least common multiple of the two widths
//!    and then down, through an intermediate channel
//!
//! A frame ends at a word marked `last` or at a short word. Neither stage
//! kind ever extends a frame past that point: up conversion stops packing and
//! down conversion stops slicing there, and the resulting word is marked
//! `last`.
//!
//! # Ports
//!
//! This component has:
//!  - One [input port](cclo_engine::port::InPort): `rx`
//!  - One [output port](cclo_engine::port::OutPort): `tx`

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cclo_engine::engine::Engine;
use cclo_engine::port::{InPort, OutPort, PortState};
use cclo_engine::sim_error;
use cclo_engine::traits::Runnable;
use cclo_engine::types::{SimError, SimResult};
use cclo_model_builder::{EntityDisplay, EntityGet};
use cclo_track::entity::Entity;
use cclo_track::{debug, trace};
use futures::future::try_join_all;

use crate::types::StreamWord;
use crate::{connect_tx, take_option};

/// One step of a conversion chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Pass { bytes: usize },
    Up { in_bytes: usize, out_bytes: usize },
    Down { in_bytes: usize, out_bytes: usize },
}

impl Stage {
    fn in_bytes(&self) -> usize {
        match *self {
            Stage::Pass { bytes } => bytes,
            Stage::Up { in_bytes, .. } | Stage::Down { in_bytes, .. } => in_bytes,
        }
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Compute the stages needed to convert `in_bytes` words to `out_bytes`
/// words.
pub fn plan_conversion(in_bytes: usize, out_bytes: usize) -> Result<Vec<Stage>, SimError> {
    if in_bytes == 0 || out_bytes == 0 {
        return sim_error!(format!(
            "invalid width conversion {in_bytes}B => {out_bytes}B"
        ));
    }

    let plan = if in_bytes == out_bytes {
        vec![Stage::Pass { bytes: in_bytes }]
    } else if out_bytes % in_bytes == 0 {
        vec![Stage::Up {
            in_bytes,
            out_bytes,
        }]
    } else if in_bytes % out_bytes == 0 {
        vec![Stage::Down {
            in_bytes,
            out_bytes,
        }]
    } else {
        let lcm = in_bytes / gcd(in_bytes, out_bytes) * out_bytes;
        vec![
            Stage::Up {
                in_bytes,
                out_bytes: lcm,
            },
            Stage::Down {
                in_bytes: lcm,
                out_bytes,
            },
        ]
    };
    Ok(plan)
}

#[derive(EntityGet, EntityDisplay)]
pub struct WidthConverter {
    entity: Arc<Entity>,
    stages: Vec<Stage>,
    rx: InPort<StreamWord>,
    links_rx: Vec<InPort<StreamWord>>,
    links_tx: Mutex<Option<Vec<OutPort<StreamWord>>>>,
    tx: Mutex<Option<OutPort<StreamWord>>>,
}

impl WidthConverter {
    pub fn new_and_register(
        engine: &Engine,
        parent: &Arc<Entity>,
        name: &str,
        in_bytes: usize,
        out_bytes: usize,
    ) -> Result<Arc<Self>, SimError> {
        let stages = plan_conversion(in_bytes, out_bytes)?;
        let entity = Arc::new(Entity::new(parent, name));
        debug!(entity ; "{}B => {}B using {:?}", in_bytes, out_bytes, stages);

        let mut links_rx = Vec::new();
        let mut links_tx = Vec::new();
        for i in 1..stages.len() {
            let link_rx = InPort::new(&entity, &format!("link{i}_rx"));
            let mut link_tx = OutPort::new(&entity, &format!("link{i}_tx"));
            link_tx.connect(link_rx.state());
            links_rx.push(link_rx);
            links_tx.push(link_tx);
        }

        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let converter = Arc::new(Self {
            entity,
            stages,
            rx,
            links_rx,
            links_tx: Mutex::new(Some(links_tx)),
            tx: Mutex::new(Some(tx)),
        });
        engine.register(converter.clone());
        Ok(converter)
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn port_rx(&self) -> Arc<PortState<StreamWord>> {
        self.rx.state()
    }

    pub fn connect_port_tx(&self, port_state: Arc<PortState<StreamWord>>) {
        connect_tx!(self.tx, connect ; port_state);
    }

    async fn run_stage(
        &self,
        stage: Stage,
        rx: &InPort<StreamWord>,
        tx: &OutPort<StreamWord>,
    ) -> SimResult {
        loop {
            let word = self.get_checked(stage, rx).await?;
            match stage {
                Stage::Pass { .. } => tx.put(word).await?,
                Stage::Up { out_bytes, .. } => self.up(stage, word, out_bytes, rx, tx).await?,
                Stage::Down { out_bytes, .. } => down(word, out_bytes, tx).await?,
            }
        }
    }

    async fn get_checked(
        &self,
        stage: Stage,
        rx: &InPort<StreamWord>,
    ) -> Result<StreamWord, SimError> {
        let word = rx.get().await?;
        if word.width_bytes() != stage.in_bytes() {
            return sim_error!(format!(
                "{}: received {}B word, expected {}B",
                self.entity,
                word.width_bytes(),
                stage.in_bytes()
            ));
        }
        Ok(word)
    }

    async fn up(
        &self,
        stage: Stage,
        first: StreamWord,
        out_bytes: usize,
        rx: &InPort<StreamWord>,
        tx: &OutPort<StreamWord>,
    ) -> SimResult {
        let in_bytes = first.width_bytes();
        let ratio = out_bytes / in_bytes;
        let mut out = StreamWord::empty(out_bytes);
        out.dest = first.dest;

        let mut word = first;
        let mut slice = 0;
        loop {
            let range = slice * in_bytes..(slice + 1) * in_bytes;
            out.data[range.clone()].copy_from_slice(&word.data);
            out.keep[range].copy_from_slice(&word.keep);
            slice += 1;

            if word.last || word.is_short() {
                out.last = true;
                break;
            }
            if slice == ratio {
                break;
            }
            word = self.get_checked(stage, rx).await?;
        }

        trace!(self.entity ; "packed {} words into {}", slice, out);
        tx.put(out).await
    }
}

async fn down(word: StreamWord, out_bytes: usize, tx: &OutPort<StreamWord>) -> SimResult {
    let ratio = word.width_bytes() / out_bytes;
    let ends_frame = word.last || word.is_short();
    let num_slices = if ends_frame {
        word.num_valid().div_ceil(out_bytes).max(1)
    } else {
        ratio
    };

    for slice in 0..num_slices {
        let range = slice * out_bytes..(slice + 1) * out_bytes;
        let out = StreamWord {
            data: word.data[range.clone()].to_vec(),
            keep: word.keep[range].to_vec(),
            last: ends_frame && slice + 1 == num_slices,
            dest: word.dest,
        };
        tx.put(out).await?;
    }
    Ok(())
}

#[async_trait]
impl Runnable for WidthConverter {
    async fn run(&self) -> SimResult {
        let mut outputs = take_option!(self.links_tx)?;
        outputs.push(take_option!(self.tx)?);
        let inputs = std::iter::once(&self.rx).chain(self.links_rx.iter());

        try_join_all(
            self.stages
                .iter()
                .zip(inputs)
                .zip(outputs.iter())
                .map(|((stage, rx), tx)| self.run_stage(*stage, rx, tx)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plans() {
        assert_eq!(
            plan_conversion(8, 8).unwrap(),
            vec![Stage::Pass { bytes: 8 }]
        );
        assert_eq!(
            plan_conversion(8, 32).unwrap(),
            vec![Stage::Up {
                in_bytes: 8,
                out_bytes: 32
            }]
        );
        assert_eq!(
            plan_conversion(64, 16).unwrap(),
            vec![Stage::Down {
                in_bytes: 64,
                out_bytes: 16
            }]
        );
        assert_eq!(
            plan_conversion(24, 16).unwrap(),
            vec![
                Stage::Up {
                    in_bytes: 24,
                    out_bytes: 48
                },
                Stage::Down {
                    in_bytes: 48,
                    out_bytes: 16
                }
            ]
        );
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(plan_conversion(0, 8).is_err());
        assert!(plan_conversion(8, 0).is_err());
    }
}
