//! memwalk: walks intrusive containers inside the memory of a stopped
//! process
//!
//! The walkers rebuild list order, ordered-set order, hash bucket
//! membership, allocator pool trees and slab free lists from raw reads
//! alone. They need a [`MemoryView`] over the target (a live process or a
//! snapshot) and a [`TypeSource`] describing its struct layouts, bundled as
//! a [`Target`].

pub mod config;
pub mod core;
pub mod memory;
pub mod process;
pub mod symbols;
pub mod walk;

// Re-export main types from core module
pub use core::types::{
    Address, FieldDescriptor, HookOffset, TypeDescriptor, TypeKind, TypedValue, WalkContext,
    WalkError, WalkResult,
};

pub use memory::{MemoryView, SnapshotMemory, Target};
pub use process::ProcessMemory;
pub use symbols::{TypeRegistry, TypeSource};

// Re-export core directly for full access
pub use core::{AUTHORS, VERSION};
