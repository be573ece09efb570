//! Memory access module for reading foreign process memory
//!
//! This module provides the read-only primitives every walker builds on:
//! - [`MemoryView`]: raw little-endian reads by address
//! - [`SnapshotMemory`]: sparse captured or synthetic images
//! - [`Target`]: typed reads, member access and casts for one session

pub mod snapshot;
pub mod target;
pub mod view;

pub use snapshot::SnapshotMemory;
pub use target::{Target, DEFAULT_MAX_STRING_LEN};
pub use view::MemoryView;
