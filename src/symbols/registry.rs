//! Type registry loaded from layout files
//!
//! A layout file describes the structs of the inspected program and the
//! globals worth starting from:
//!
//! ```toml
//! pointer_width = 8
//!
//! [[types]]
//! name = "pool"
//! size = 96
//! fields = [
//!     { name = "siblings", offset = 0, type = "ListHook" },
//!     { name = "children", offset = 16, type = "PoolList" },
//! ]
//!
//! [[symbols]]
//! name = "recycler"
//! address = "0x55d0c0ffe000"
//! type = "PoolRecycler"
//! ```

use super::TypeSource;
use crate::core::types::{
    Address, FieldDescriptor, TypeDescriptor, TypeKind, TypedValue, WalkError, WalkResult,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// On-disk layout description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutFile {
    #[serde(default = "default_pointer_width")]
    pub pointer_width: u64,
    #[serde(default)]
    pub types: Vec<StructLayout>,
    #[serde(default)]
    pub symbols: Vec<SymbolLayout>,
}

/// One struct in a layout file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<String>,
}

/// One global in a layout file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolLayout {
    pub name: String,
    pub address: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

fn default_pointer_width() -> u64 {
    8
}

#[derive(Debug, Clone)]
struct Symbol {
    address: Address,
    type_name: String,
}

/// In-memory [`TypeSource`]
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    pointer_width: u64,
    types: HashMap<String, Arc<TypeDescriptor>>,
    symbols: HashMap<String, Symbol>,
}

impl TypeRegistry {
    /// Creates an empty registry for a target with the given pointer size
    pub fn new(pointer_width: u64) -> Self {
        TypeRegistry {
            pointer_width,
            types: HashMap::new(),
            symbols: HashMap::new(),
        }
    }

    /// Builds a registry from a parsed layout file.
    ///
    /// Every field type must resolve once all structs are known.
    pub fn from_layout(layout: LayoutFile) -> WalkResult<Self> {
        if !matches!(layout.pointer_width, 4 | 8) {
            return Err(WalkError::InvalidType(format!(
                "unsupported pointer width {}",
                layout.pointer_width
            )));
        }

        let mut registry = TypeRegistry::new(layout.pointer_width);
        for s in layout.types {
            let mut ty = TypeDescriptor::new(s.name, s.size, TypeKind::Struct { fields: s.fields });
            ty.element = s.element;
            ty.hook = s.hook;
            registry.define(ty);
        }

        for ty in registry.types.values() {
            if let TypeKind::Struct { fields } = &ty.kind {
                for field in fields {
                    registry.lookup_type(&field.type_name).map_err(|_| {
                        WalkError::InvalidType(format!(
                            "field '{}' of '{}' has unknown type '{}'",
                            field.name, ty.name, field.type_name
                        ))
                    })?;
                }
            }
        }

        for s in layout.symbols {
            let address = Address::from_str(&s.address)?;
            registry.define_symbol(s.name, address, s.type_name);
        }

        debug!(
            types = registry.types.len(),
            symbols = registry.symbols.len(),
            "loaded layout"
        );
        Ok(registry)
    }

    /// Parses a layout from TOML text
    pub fn from_toml_str(contents: &str) -> WalkResult<Self> {
        let layout: LayoutFile = toml::from_str(contents)?;
        Self::from_layout(layout)
    }

    /// Loads a layout file from disk
    pub fn load<P: AsRef<Path>>(path: P) -> WalkResult<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Adds or replaces a type
    pub fn define(&mut self, ty: TypeDescriptor) {
        self.types.insert(ty.name.clone(), Arc::new(ty));
    }

    /// Adds or replaces a global
    pub fn define_symbol(
        &mut self,
        name: impl Into<String>,
        address: Address,
        type_name: impl Into<String>,
    ) {
        self.symbols.insert(
            name.into(),
            Symbol {
                address,
                type_name: type_name.into(),
            },
        );
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    fn builtin(name: &str) -> Option<TypeDescriptor> {
        let (size, signed) = match name {
            "u8" | "uint8_t" | "char" | "bool" => (1, false),
            "i8" | "int8_t" => (1, true),
            "u16" | "uint16_t" => (2, false),
            "i16" | "int16_t" => (2, true),
            "u32" | "uint32_t" | "unsigned" => (4, false),
            "i32" | "int32_t" | "int" => (4, true),
            "u64" | "uint64_t" => (8, false),
            "i64" | "int64_t" => (8, true),
            "void" => return Some(TypeDescriptor::new("void", 1, TypeKind::Void)),
            _ => return None,
        };
        Some(TypeDescriptor::new(name, size, TypeKind::Integer { signed }))
    }
}

/// Strips qualifiers the host debugger would print but layouts never carry
fn normalize(name: &str) -> &str {
    let name = name.trim();
    ["const ", "struct ", "class "]
        .iter()
        .fold(name, |n, prefix| n.strip_prefix(prefix).unwrap_or(n))
        .trim()
}

impl TypeSource for TypeRegistry {
    fn lookup_type(&self, name: &str) -> WalkResult<Arc<TypeDescriptor>> {
        let name = normalize(name);

        if let Some(target) = name.strip_suffix('*') {
            let target = normalize(target);
            if target.is_empty() {
                return Err(WalkError::InvalidType(name.to_string()));
            }
            // the pointee must exist, even if nothing dereferences it yet
            self.lookup_type(target)?;
            return Ok(Arc::new(TypeDescriptor::new(
                format!("{}*", target),
                self.pointer_width,
                TypeKind::Pointer {
                    target: target.to_string(),
                },
            )));
        }

        if let Some(open) = name.rfind('[') {
            let len = name[open..]
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .and_then(|s| s.trim().parse::<usize>().ok())
                .ok_or_else(|| WalkError::InvalidType(name.to_string()))?;
            let element = self.lookup_type(&name[..open])?;
            return Ok(Arc::new(TypeDescriptor::new(
                name,
                element.size * len as u64,
                TypeKind::Array {
                    element: element.name.clone(),
                    len,
                },
            )));
        }

        if name == "usize" || name == "size_t" {
            return Ok(Arc::new(TypeDescriptor::new(
                name,
                self.pointer_width,
                TypeKind::Integer { signed: false },
            )));
        }

        if let Some(ty) = self.types.get(name) {
            return Ok(Arc::clone(ty));
        }

        Self::builtin(name)
            .map(Arc::new)
            .ok_or_else(|| WalkError::InvalidType(name.to_string()))
    }

    fn lookup_symbol(&self, name: &str) -> WalkResult<TypedValue> {
        let symbol = self
            .symbols
            .get(name.trim())
            .ok_or_else(|| WalkError::UnresolvedSymbol(name.to_string()))?;
        let ty = self.lookup_type(&symbol.type_name)?;
        Ok(TypedValue::new(symbol.address, ty))
    }

    fn pointer_width(&self) -> u64 {
        self.pointer_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = r#"
        pointer_width = 8

        [[types]]
        name = "ListHook"
        size = 16
        fields = [
            { name = "next_", offset = 0, type = "ListHook*" },
            { name = "prev_", offset = 8, type = "ListHook*" },
        ]

        [[types]]
        name = "Slot"
        size = 4
        fields = [{ name = "next", offset = 0, type = "u32" }]

        [[types]]
        name = "PoolList"
        size = 24
        element = "pool"
        hook = "siblings"
        fields = [{ name = "head", offset = 0, type = "ListHook" }]

        [[types]]
        name = "pool"
        size = 32
        fields = [
            { name = "siblings", offset = 0, type = "ListHook" },
            { name = "name", offset = 16, type = "char*" },
            { name = "slots", offset = 24, type = "Slot[2]" },
        ]

        [[symbols]]
        name = "root_pool"
        address = "0x7f0000001000"
        type = "pool"
    "#;

    #[test]
    fn test_load_layout() {
        let registry = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        assert_eq!(registry.type_count(), 4);
        assert_eq!(registry.pointer_width(), 8);

        let pool = registry.lookup_type("struct pool").unwrap();
        assert_eq!(pool.size, 32);
        assert_eq!(pool.field("name").unwrap().offset, 16);

        let list = registry.lookup_type("PoolList").unwrap();
        assert_eq!(list.element.as_deref(), Some("pool"));
        assert_eq!(list.hook.as_deref(), Some("siblings"));
    }

    #[test]
    fn test_pointer_and_array_types() {
        let registry = TypeRegistry::from_toml_str(LAYOUT).unwrap();

        let ptr = registry.lookup_type("ListHook *").unwrap();
        assert_eq!(ptr.size, 8);
        assert_eq!(
            ptr.kind,
            TypeKind::Pointer {
                target: "ListHook".to_string()
            }
        );

        let array = registry.lookup_type("Slot[2]").unwrap();
        assert_eq!(array.size, 8);

        let nested = registry.lookup_type("char**").unwrap();
        assert_eq!(nested.name, "char**");
    }

    #[test]
    fn test_builtins() {
        let registry = TypeRegistry::new(4);
        assert_eq!(registry.lookup_type("u32").unwrap().size, 4);
        assert_eq!(registry.lookup_type("size_t").unwrap().size, 4);
        assert_eq!(registry.lookup_type("void*").unwrap().size, 4);
        assert!(matches!(
            registry.lookup_type("i64").unwrap().kind,
            TypeKind::Integer { signed: true }
        ));
    }

    #[test]
    fn test_unknown_type_and_symbol() {
        let registry = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        assert!(matches!(
            registry.lookup_type("SliceArea"),
            Err(WalkError::InvalidType(_))
        ));
        assert!(matches!(
            registry.lookup_symbol("recycler"),
            Err(WalkError::UnresolvedSymbol(_))
        ));
    }

    #[test]
    fn test_symbol_lookup() {
        let registry = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let root = registry.lookup_symbol("root_pool").unwrap();
        assert_eq!(root.address, Address::new(0x7f0000001000));
        assert_eq!(root.type_name(), "pool");
    }

    #[test]
    fn test_field_with_unknown_type_rejected() {
        let layout = r#"
            [[types]]
            name = "broken"
            size = 8
            fields = [{ name = "x", offset = 0, type = "Missing" }]
        "#;
        let err = TypeRegistry::from_toml_str(layout).unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn test_bad_pointer_width_rejected() {
        assert!(TypeRegistry::from_toml_str("pointer_width = 3").is_err());
    }
}
