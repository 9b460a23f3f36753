// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The header carried at the start of every network packet.

use std::fmt;

use cclo_components::types::StreamWord;
use cclo_engine::sim_error;
use cclo_engine::types::SimError;

/// Size of the header in bytes.
pub const HEADER_BYTES: usize = 24;

/// Matches any tag when seeking a received buffer.
pub const TAG_ANY: u32 = u32::MAX;

/// Six little-endian `u32` fields at the start of a word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EthHeader {
    /// Payload bytes.
    pub count: u32,
    pub tag: u32,

    /// Sending rank.
    pub src: u32,

    /// Sequence number of the packet between `src` and `dst`.
    pub seqn: u32,
    pub strm: u32,

    /// Receiving rank.
    pub dst: u32,
}

impl EthHeader {
    fn fields(&self) -> [u32; 6] {
        [
            self.count, self.tag, self.src, self.seqn, self.strm, self.dst,
        ]
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_BYTES] {
        let mut bytes = [0; HEADER_BYTES];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip(self.fields()) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SimError> {
        if bytes.len() < HEADER_BYTES {
            return sim_error!(format!(
                "header needs {HEADER_BYTES} bytes, got {}",
                bytes.len()
            ));
        }
        let field = |i: usize| {
            let mut le = [0; 4];
            le.copy_from_slice(&bytes[i * 4..(i + 1) * 4]);
            u32::from_le_bytes(le)
        };
        Ok(Self {
            count: field(0),
            tag: field(1),
            src: field(2),
            seqn: field(3),
            strm: field(4),
            dst: field(5),
        })
    }

    /// The header as the first word of a packet headed for `dest`.
    #[must_use]
    pub fn to_word(&self, width_bytes: usize, dest: u64) -> StreamWord {
        StreamWord::from_bytes(&self.to_bytes(), width_bytes, false, dest)
    }

    pub fn from_word(word: &StreamWord) -> Result<Self, SimError> {
        let bytes: Vec<u8> = word.valid_bytes().collect();
        Self::from_bytes(&bytes)
    }

    /// Whether a seek for `src`, `tag` and `seqn` matches this header.
    #[must_use]
    pub fn matches(&self, src: u32, tag: u32, seqn: u32) -> bool {
        self.src == src && self.seqn == seqn && (tag == TAG_ANY || self.tag == tag)
    }
}

impl fmt::Display for EthHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eth[{}=>{} seqn={} tag={} count={}]",
            self.src, self.dst, self.seqn, self.tag, self.count
        )
    }
}

/// A request to send `header.count` bytes from the datapath as packets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketCmd {
    pub header: EthHeader,

    /// Connection to send on. Unused by connectionless transports.
    pub session: u32,
}

impl fmt::Display for PacketCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pkt_cmd[{} session={}]", self.header, self.session)
    }
}

/// Reported once per packet sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketStatus {
    pub seqn: u32,
    pub bytes: u32,
    pub ok: bool,
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pkt_sts[seqn={} {}B {}]",
            self.seqn,
            self.bytes,
            if self.ok { "ok" } else { "failed" }
        )
    }
}

/// Check that a datapath can carry the header in one word.
pub fn check_header_fits(width_bytes: usize) -> Result<(), SimError> {
    if width_bytes < HEADER_BYTES {
        return sim_error!(format!(
            "a {width_bytes}B datapath cannot carry a {HEADER_BYTES}B packet header"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_in_word() {
        let header = EthHeader {
            count: 64,
            tag: 9,
            src: 1,
            seqn: 3,
            strm: 0,
            dst: 2,
        };
        let word = header.to_word(32, 2);
        assert_eq!(word.num_valid(), HEADER_BYTES);
        assert_eq!(&word.data[..4], &64u32.to_le_bytes());
        assert_eq!(EthHeader::from_word(&word).unwrap(), header);
    }

    #[test]
    fn matching() {
        let header = EthHeader {
            tag: 9,
            src: 1,
            seqn: 3,
            ..EthHeader::default()
        };
        assert!(header.matches(1, 9, 3));
        assert!(header.matches(1, TAG_ANY, 3));
        assert!(!header.matches(1, 8, 3));
        assert!(!header.matches(0, 9, 3));
        assert!(!header.matches(1, 9, 4));
    }

    #[test]
    fn narrow_datapath() {
        assert!(check_header_fits(16).is_err());
        assert!(check_header_fits(24).is_ok());
        assert!(EthHeader::from_word(&StreamWord::empty(32)).is_err());
    }
}
