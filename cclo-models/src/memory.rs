// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! The device memory store.
//!
//! A flat byte array shared by the DMA engines of one rank. Accesses are
//! bounds checked and report an error rather than panicking.

use std::sync::Mutex;

use cclo_engine::sim_error;
use cclo_engine::types::{SimError, SimResult};
use cclo_track::lock;

pub struct Memory {
    bytes: Mutex<Vec<u8>>,
}

impl Memory {
    #[must_use]
    pub fn new(size_bytes: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![0; size_bytes]),
        }
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        lock(&self.bytes).len()
    }

    fn check_range(size: usize, address: u64, len: usize) -> Result<usize, SimError> {
        let start = usize::try_from(address)
            .map_err(|_| SimError(format!("address {address:#x} out of range")))?;
        match start.checked_add(len) {
            Some(end) if end <= size => Ok(start),
            _ => sim_error!(format!(
                "access {address:#x}+{len} outside memory of {size} bytes"
            )),
        }
    }

    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, SimError> {
        let bytes = lock(&self.bytes);
        let start = Self::check_range(bytes.len(), address, len)?;
        Ok(bytes[start..start + len].to_vec())
    }

    pub fn write(&self, address: u64, data: &[u8]) -> SimResult {
        let mut bytes = lock(&self.bytes);
        let start = Self::check_range(bytes.len(), address, data.len())?;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds() {
        let memory = Memory::new(16);
        memory.write(12, &[1, 2, 3, 4]).unwrap();
        assert_eq!(memory.read(12, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(memory.write(13, &[0; 4]).is_err());
        assert!(memory.read(u64::MAX, 1).is_err());
        assert_eq!(memory.read(16, 0).unwrap(), Vec::<u8>::new());
    }
}
