// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The topology file.

use byte_unit::Byte;
use cclo_engine::types::SimError;
use serde::{Deserialize, Serialize, de};
use serde_yaml::Value;

/// Parse a byte quantity given either as an integer or as a string.
///
/// Strings may be hexadecimal, optionally with underscores, or carry units:
///  0x10000
///  0x1_0000
///  64B
///  4K, 4KB, 4KiB
pub fn parse_byte_str<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: de::Deserializer<'de>,
{
    // Go through a generic `Value` so that plain integers are accepted
    let value: Value = Deserialize::deserialize(deserializer)?;
    if let Some(number) = value.as_u64() {
        return Ok(number);
    }

    let Some(s) = value.as_str() else {
        return Err(de::Error::custom(format!(
            "'{value:?}': expected an integer or a string"
        )));
    };

    let lowercase = s.to_lowercase();
    if let Some(hex) = lowercase.strip_prefix("0x") {
        u64::from_str_radix(&hex.replace('_', ""), 16)
            .map_err(|e| de::Error::custom(format!("Unable to parse {s} as hex string: {e}")))
    } else {
        let ignore_case = false;
        let num_bytes = Byte::parse_str(s, ignore_case)
            .map_err(|e| de::Error::custom(format!("Unable to parse {s} as Byte string: {e}")))?;
        Ok(num_bytes.as_u64())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

fn default_datapath_bytes() -> usize {
    64
}

fn default_max_packet_bytes() -> u64 {
    1024
}

fn default_max_frame_words() -> usize {
    16
}

fn default_channel_depth() -> usize {
    64
}

fn default_cmd_channel_depth() -> usize {
    16
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    #[serde(default)]
    pub transport: Transport,

    #[serde(default = "default_datapath_bytes")]
    pub datapath_bytes: usize,

    /// Width of the external kernel interface, the datapath width if unset.
    pub kernel_bytes: Option<usize>,

    /// Added to every byte passing through the external kernel.
    #[serde(default)]
    pub kernel_increment: u8,

    #[serde(
        default = "default_max_packet_bytes",
        deserialize_with = "parse_byte_str"
    )]
    pub max_packet_bytes: u64,

    #[serde(default = "default_max_frame_words")]
    pub max_frame_words: usize,

    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,

    #[serde(default = "default_channel_depth")]
    pub eth_channel_depth: usize,

    #[serde(default = "default_cmd_channel_depth")]
    pub cmd_channel_depth: usize,

    /// How long the network must stay quiescent before a run ends.
    #[serde(default)]
    pub drain_ms: u64,

    pub ranks: Vec<RankConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankConfig {
    pub ip: String,

    #[serde(deserialize_with = "parse_byte_str")]
    pub memory_bytes: u64,

    pub rx_buffers: RxBufferConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RxBufferConfig {
    pub count: u32,

    #[serde(deserialize_with = "parse_byte_str")]
    pub bytes: u64,

    #[serde(deserialize_with = "parse_byte_str")]
    pub base_address: u64,
}

impl SystemConfig {
    pub fn from_yaml(system_config: &str) -> Result<Self, SimError> {
        serde_yaml::from_str(system_config)
            .map_err(|e| SimError(format!("serde_yaml::from_str failed: {e}")))
    }

    #[must_use]
    pub fn kernel_bytes(&self) -> usize {
        self.kernel_bytes.unwrap_or(self.datapath_bytes)
    }

    /// Largest payload of one network packet.
    #[must_use]
    pub fn packet_bytes(&self) -> u64 {
        let frame_bytes = (self.max_frame_words * self.datapath_bytes) as u64;
        frame_bytes.min(self.max_packet_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Sizes {
        #[serde(deserialize_with = "parse_byte_str")]
        a: u64,
        #[serde(deserialize_with = "parse_byte_str")]
        b: u64,
        #[serde(deserialize_with = "parse_byte_str")]
        c: u64,
    }

    #[test]
    fn byte_strings() {
        let sizes: Sizes = serde_yaml::from_str("a: 100\nb: 0x1_0000\nc: 4KiB\n").unwrap();
        assert_eq!(sizes.a, 100);
        assert_eq!(sizes.b, 0x1_0000);
        assert_eq!(sizes.c, 4096);
        assert!(serde_yaml::from_str::<Sizes>("a: [1]\nb: 0\nc: 0\n").is_err());
    }

    #[test]
    fn defaults() {
        let config: SystemConfig = serde_yaml::from_str(
            "
ranks:
  - ip: 10.0.0.1
    memory_bytes: 1MiB
    rx_buffers: { count: 4, bytes: 1KiB, base_address: 0x8_0000 }
",
        )
        .unwrap();
        assert_eq!(config.transport, Transport::Udp);
        assert_eq!(config.kernel_bytes(), 64);
        assert_eq!(config.packet_bytes(), 1024);
        assert_eq!(config.ranks[0].memory_bytes, 1 << 20);
        assert_eq!(config.ranks[0].rx_buffers.base_address, 0x8_0000);
    }
}
