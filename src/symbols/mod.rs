//! Symbol and type lookup
//!
//! The walkers only need two capabilities from whatever knows the target's
//! debug information: look up a type layout by name and look up a named
//! global. [`TypeSource`] is that seam; [`TypeRegistry`] implements it from
//! a TOML layout file.

mod expr;
mod registry;

pub use expr::{parse_expression, Expression, Primary, Step};
pub use registry::{LayoutFile, StructLayout, SymbolLayout, TypeRegistry};

use crate::core::types::{TypeDescriptor, TypedValue, WalkResult};
use std::sync::Arc;

/// Type and symbol knowledge about the inspected process
pub trait TypeSource {
    /// Looks up a type by name, including `T*` and `T[N]` forms
    fn lookup_type(&self, name: &str) -> WalkResult<Arc<TypeDescriptor>>;

    /// Looks up a named global object
    fn lookup_symbol(&self, name: &str) -> WalkResult<TypedValue>;

    /// Size of a pointer in the inspected process
    fn pointer_width(&self) -> u64;
}
