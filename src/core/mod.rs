//! Core module containing fundamental types for memwalk
//!
//! This module provides the foundational building blocks used throughout
//! the walkers, including address handling, type layouts, hook offsets,
//! and error types.

pub mod types;

// Re-export commonly used types for convenience
pub use types::{Address, HookOffset, TypeDescriptor, TypedValue, WalkError, WalkResult};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
