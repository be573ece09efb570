//! Core type definitions for memwalk
//!
//! This module contains the fundamental types shared by every walker:
//! foreign addresses, type layouts, typed values, hook offsets and errors.

mod address;
mod error;
mod hook;
mod layout;

// Re-export all public types
pub use address::Address;
pub use error::{WalkContext, WalkError, WalkResult};
pub use hook::HookOffset;
pub use layout::{FieldDescriptor, TypeDescriptor, TypeKind, TypedValue};
