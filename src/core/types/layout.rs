//! Static type descriptors and typed foreign values

use super::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A field inside a struct layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub offset: u64,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Shape of a type as seen by the walker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Integer { signed: bool },
    Pointer { target: String },
    Array { element: String, len: usize },
    Struct { fields: Vec<FieldDescriptor> },
}

/// Layout of one type in the inspected process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub size: u64,
    pub kind: TypeKind,
    /// Element type for container types
    pub element: Option<String>,
    /// Default member hook field of `element` for container types
    pub hook: Option<String>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, size: u64, kind: TypeKind) -> Self {
        TypeDescriptor {
            name: name.into(),
            size,
            kind,
            element: None,
            hook: None,
        }
    }

    /// Looks up a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        match &self.kind {
            TypeKind::Struct { fields } => fields.iter().find(|f| f.name == name),
            _ => None,
        }
    }

    /// Capability probe: does this layout carry the named field
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.kind, TypeKind::Integer { .. })
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An object of a known type at a foreign address.
///
/// Pointer-typed values denote the slot holding the pointer, not its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedValue {
    pub address: Address,
    pub ty: Arc<TypeDescriptor>,
}

impl TypedValue {
    pub fn new(address: Address, ty: Arc<TypeDescriptor>) -> Self {
        TypedValue { address, ty }
    }

    pub fn type_name(&self) -> &str {
        &self.ty.name
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} *) {}", self.ty.name, self.address)
    }
}
