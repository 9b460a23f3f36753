// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The stream word carried by every datapath channel.

use std::fmt;

use cclo_engine::traits::{Framed, Routable};

/// A generator of values for a [`Source`](crate::source::Source).
pub type DataGenerator<T> = Box<dyn Iterator<Item = T> + Send>;

/// One beat of an AXI-Stream style interface.
///
/// The width of a word is the length of `data` in bytes. `keep` has one
/// entry per byte; kept bytes are contiguous from byte 0 in every well formed
/// word.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamWord {
    pub data: Vec<u8>,
    pub keep: Vec<bool>,
    pub last: bool,
    pub dest: u64,
}

impl StreamWord {
    /// A word of `width_bytes` with no valid bytes.
    #[must_use]
    pub fn empty(width_bytes: usize) -> Self {
        Self {
            data: vec![0; width_bytes],
            keep: vec![false; width_bytes],
            last: false,
            dest: 0,
        }
    }

    /// Build a word holding `bytes` padded to `width_bytes`.
    ///
    /// Any bytes beyond the width are ignored.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], width_bytes: usize, last: bool, dest: u64) -> Self {
        let mut word = Self::empty(width_bytes);
        let num_valid = bytes.len().min(width_bytes);
        word.data[..num_valid].copy_from_slice(&bytes[..num_valid]);
        word.keep[..num_valid].fill(true);
        word.last = last;
        word.dest = dest;
        word
    }

    /// Split a byte sequence into a framed message of `width_bytes` words.
    ///
    /// An empty sequence becomes a single empty word marked `last`.
    #[must_use]
    pub fn frame(bytes: &[u8], width_bytes: usize, dest: u64) -> Vec<Self> {
        if bytes.is_empty() {
            return vec![Self::from_bytes(&[], width_bytes, true, dest)];
        }
        let num_words = bytes.len().div_ceil(width_bytes);
        bytes
            .chunks(width_bytes)
            .enumerate()
            .map(|(i, chunk)| Self::from_bytes(chunk, width_bytes, i + 1 == num_words, dest))
            .collect()
    }

    #[must_use]
    pub fn width_bytes(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn num_valid(&self) -> usize {
        self.keep.iter().filter(|k| **k).count()
    }

    /// The kept bytes in order.
    pub fn valid_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.data
            .iter()
            .zip(self.keep.iter())
            .filter_map(|(d, k)| k.then_some(*d))
    }

    /// A word is short when its top byte is not kept, meaning the producer
    /// ended the frame inside this word.
    #[must_use]
    pub fn is_short(&self) -> bool {
        !self.keep.last().copied().unwrap_or(false)
    }

    #[must_use]
    pub fn with_dest(mut self, dest: u64) -> Self {
        self.dest = dest;
        self
    }
}

impl fmt::Display for StreamWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "word[{}/{}B dest={}{}]",
            self.num_valid(),
            self.width_bytes(),
            self.dest,
            if self.last { " last" } else { "" }
        )
    }
}

impl Routable for StreamWord {
    fn dest(&self) -> u64 {
        self.dest
    }
}

impl Framed for StreamWord {
    fn is_last(&self) -> bool {
        self.last
    }
}

/// Collect the kept bytes of a sequence of words.
pub fn message_bytes<'a>(words: impl IntoIterator<Item = &'a StreamWord>) -> Vec<u8> {
    words.into_iter().flat_map(StreamWord::valid_bytes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_marks_only_the_final_word() {
        let bytes: Vec<u8> = (0..100).collect();
        let words = StreamWord::frame(&bytes, 32, 5);
        assert_eq!(words.len(), 4);
        assert_eq!(words.iter().filter(|w| w.last).count(), 1);
        assert!(words[3].last);
        assert_eq!(words[3].num_valid(), 4);
        assert!(words[3].is_short());
        assert!(!words[0].is_short());
        assert!(words.iter().all(|w| w.dest == 5));
        assert_eq!(message_bytes(&words), bytes);
    }

    #[test]
    fn empty_frame() {
        let words = StreamWord::frame(&[], 8, 0);
        assert_eq!(words.len(), 1);
        assert!(words[0].last);
        assert_eq!(words[0].num_valid(), 0);
    }
}
