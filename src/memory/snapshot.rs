//! Sparse memory image
//!
//! A snapshot holds copies of selected ranges of a process. Walking a
//! snapshot behaves exactly like walking the live process at the moment the
//! ranges were captured. Synthetic images built with the write helpers are
//! how the walkers are tested.

use super::view::MemoryView;
use crate::core::types::{Address, WalkError, WalkResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    regions: Vec<RegionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionRecord {
    base: String,
    /// hex-encoded bytes
    data: String,
}

/// Non-overlapping regions keyed by base address
#[derive(Debug, Clone, Default)]
pub struct SnapshotMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl SnapshotMemory {
    pub fn new() -> Self {
        SnapshotMemory::default()
    }

    /// Adds a region; it must not overlap an existing one
    pub fn map(&mut self, base: Address, data: Vec<u8>) -> WalkResult<()> {
        if data.is_empty() {
            return Err(WalkError::InvalidSnapshot(format!("empty region at {}", base)));
        }
        let start = base.as_u64();
        let end = start
            .checked_add(data.len() as u64)
            .ok_or_else(|| WalkError::InvalidSnapshot(format!("region at {} wraps", base)))?;

        let overlaps_previous = self
            .regions
            .range(..=start)
            .next_back()
            .map_or(false, |(&b, d)| b + d.len() as u64 > start);
        let overlaps_next = self
            .regions
            .range(start..)
            .next()
            .map_or(false, |(&b, _)| b < end);
        if overlaps_previous || overlaps_next {
            return Err(WalkError::InvalidSnapshot(format!(
                "region {}..{} overlaps an existing region",
                base,
                Address::new(end)
            )));
        }

        self.regions.insert(start, data);
        Ok(())
    }

    /// Adds a zero-filled region
    pub fn map_zeroed(&mut self, base: Address, len: usize) -> WalkResult<()> {
        self.map(base, vec![0u8; len])
    }

    /// Copies `len` bytes at `base` out of another view
    pub fn capture(&mut self, view: &dyn MemoryView, base: Address, len: usize) -> WalkResult<()> {
        let data = view.read_vec(base, len)?;
        debug!(%base, len, "captured region");
        self.map(base, data)
    }

    fn locate(&self, address: Address, len: usize) -> Option<(u64, usize)> {
        let (&base, data) = self.regions.range(..=address.as_u64()).next_back()?;
        let start = (address.as_u64() - base) as usize;
        let end = start.checked_add(len)?;
        (end <= data.len()).then_some((base, start))
    }

    /// Overwrites bytes inside one mapped region
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> WalkResult<()> {
        let (base, start) = self.locate(address, bytes.len()).ok_or_else(|| {
            WalkError::InvalidSnapshot(format!(
                "write of {} bytes at {} is outside mapped regions",
                bytes.len(),
                address
            ))
        })?;
        if let Some(data) = self.regions.get_mut(&base) {
            data[start..start + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    pub fn write_u32(&mut self, address: Address, value: u32) -> WalkResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, address: Address, value: u64) -> WalkResult<()> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Stores a pointer of the given width
    pub fn write_address(&mut self, address: Address, value: Address, width: u64) -> WalkResult<()> {
        match width {
            4 => self.write_u32(address, value.as_u64() as u32),
            8 => self.write_u64(address, value.as_u64()),
            _ => Err(WalkError::UnsupportedOperation(format!(
                "{}-byte pointers",
                width
            ))),
        }
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Sum of all region sizes
    pub fn total_size(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    pub fn regions(&self) -> impl Iterator<Item = (Address, &[u8])> {
        self.regions
            .iter()
            .map(|(&base, data)| (Address::new(base), data.as_slice()))
    }

    /// Parses a snapshot from TOML text
    pub fn from_toml_str(contents: &str) -> WalkResult<Self> {
        let file: SnapshotFile = toml::from_str(contents)?;
        let mut snapshot = SnapshotMemory::new();
        for region in file.regions {
            let base = Address::from_str(&region.base)?;
            snapshot.map(base, hex::decode(region.data.trim())?)?;
        }
        Ok(snapshot)
    }

    pub fn to_toml_string(&self) -> WalkResult<String> {
        let file = SnapshotFile {
            regions: self
                .regions()
                .map(|(base, data)| RegionRecord {
                    base: base.to_string(),
                    data: hex::encode(data),
                })
                .collect(),
        };
        Ok(toml::to_string(&file)?)
    }

    /// Loads a snapshot file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> WalkResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Writes this snapshot to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> WalkResult<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

impl MemoryView for SnapshotMemory {
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
        let (base, start) = self
            .locate(address, buffer.len())
            .ok_or_else(|| WalkError::read_failed(address, buffer.len(), "not in snapshot"))?;
        let data = &self.regions[&base];
        buffer.copy_from_slice(&data[start..start + buffer.len()]);
        Ok(())
    }
}
