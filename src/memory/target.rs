//! Typed access to an inspected process
//!
//! [`Target`] pairs a [`MemoryView`] with a [`TypeSource`] and is passed
//! explicitly to every walker. Nothing here caches memory contents.

use super::view::MemoryView;
use crate::core::types::{
    Address, TypeDescriptor, TypeKind, TypedValue, WalkContext, WalkError, WalkResult,
};
use crate::symbols::{parse_expression, Primary, Step, TypeSource};
use std::sync::Arc;

/// Longest C string read from the target unless configured otherwise
pub const DEFAULT_MAX_STRING_LEN: usize = 256;

/// One inspection session over a stopped process
#[derive(Clone, Copy)]
pub struct Target<'a> {
    memory: &'a dyn MemoryView,
    types: &'a dyn TypeSource,
    max_string_len: usize,
}

impl<'a> Target<'a> {
    pub fn new(memory: &'a dyn MemoryView, types: &'a dyn TypeSource) -> Self {
        Target {
            memory,
            types,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }

    /// Bounds [`Target::read_c_string`]
    pub fn with_max_string_len(mut self, max_string_len: usize) -> Self {
        self.max_string_len = max_string_len;
        self
    }

    pub fn memory(&self) -> &'a dyn MemoryView {
        self.memory
    }

    pub fn types(&self) -> &'a dyn TypeSource {
        self.types
    }

    pub fn pointer_width(&self) -> u64 {
        self.types.pointer_width()
    }

    pub fn lookup_type(&self, name: &str) -> WalkResult<Arc<TypeDescriptor>> {
        self.types.lookup_type(name)
    }

    /// An object of the named type at `address`
    pub fn read(&self, address: Address, type_name: &str) -> WalkResult<TypedValue> {
        Ok(TypedValue::new(address, self.lookup_type(type_name)?))
    }

    /// Reinterprets a value as another type without touching its address
    pub fn cast(&self, value: &TypedValue, type_name: &str) -> WalkResult<TypedValue> {
        self.read(value.address, type_name)
    }

    pub fn is_null(&self, address: Address) -> bool {
        address.is_null()
    }

    /// Reads a pointer-sized word at `address`
    pub fn read_address(&self, address: Address) -> WalkResult<Address> {
        self.memory
            .read_uint(address, self.pointer_width())
            .map(Address::new)
    }

    /// Reads the address stored in a pointer-typed value
    pub fn pointer_value(&self, pointer: &TypedValue) -> WalkResult<Address> {
        if !pointer.ty.is_pointer() {
            return Err(WalkError::type_mismatch(
                format!("value {}", pointer),
                "pointer",
                pointer.type_name(),
            ));
        }
        self.read_address(pointer.address)
    }

    /// Follows a pointer-typed value to the object it points at
    pub fn deref(&self, pointer: &TypedValue) -> WalkResult<TypedValue> {
        let target_type = match &pointer.ty.kind {
            TypeKind::Pointer { target } => target.clone(),
            _ => {
                return Err(WalkError::type_mismatch(
                    format!("dereference of {}", pointer),
                    "pointer",
                    pointer.type_name(),
                ))
            }
        };
        let address = self.pointer_value(pointer)?;
        self.read(address, &target_type)
    }

    /// Layout a member access on `value` would use, without reading memory
    pub fn object_type(&self, value: &TypedValue) -> WalkResult<Arc<TypeDescriptor>> {
        match &value.ty.kind {
            TypeKind::Pointer { target } => self.lookup_type(target),
            _ => Ok(Arc::clone(&value.ty)),
        }
    }

    /// The object itself, following one pointer if `value` holds one
    pub fn object(&self, value: &TypedValue) -> WalkResult<TypedValue> {
        if value.ty.is_pointer() {
            self.deref(value)
        } else {
            Ok(value.clone())
        }
    }

    /// Capability probe: does `value` (or what it points at) carry `name`
    pub fn has_field(&self, value: &TypedValue, name: &str) -> bool {
        self.object_type(value)
            .map(|ty| ty.has_field(name))
            .unwrap_or(false)
    }

    /// Member access; pointers are dereferenced first
    pub fn field(&self, value: &TypedValue, name: &str) -> WalkResult<TypedValue> {
        let object = self.object(value)?;
        let field = object
            .ty
            .field(name)
            .ok_or_else(|| WalkError::no_such_field(object.type_name(), name))?;
        let ty = self.lookup_type(&field.type_name)?;
        Ok(TypedValue::new(object.address.add(field.offset), ty))
    }

    pub fn field_address(&self, value: &TypedValue, name: &str) -> WalkResult<Address> {
        self.field(value, name).map(|f| f.address)
    }

    /// Element `index` of an array or of the array a pointer points into.
    ///
    /// Not bounds checked: trailing arrays are commonly declared with a
    /// placeholder length.
    pub fn index(&self, value: &TypedValue, index: u64) -> WalkResult<TypedValue> {
        let (base, element) = match &value.ty.kind {
            TypeKind::Array { element, .. } => (value.address, element.clone()),
            TypeKind::Pointer { target } => (self.pointer_value(value)?, target.clone()),
            _ => {
                return Err(WalkError::type_mismatch(
                    format!("index into {}", value),
                    "array or pointer",
                    value.type_name(),
                ))
            }
        };
        let ty = self.lookup_type(&element)?;
        let address = base.add(ty.size.wrapping_mul(index));
        Ok(TypedValue::new(address, ty))
    }

    /// Reads an integer or pointer value as unsigned
    pub fn read_uint(&self, value: &TypedValue) -> WalkResult<u64> {
        match value.ty.kind {
            TypeKind::Integer { .. } | TypeKind::Pointer { .. } => {
                self.memory.read_uint(value.address, value.ty.size)
            }
            _ => Err(WalkError::type_mismatch(
                format!("value {}", value),
                "integer",
                value.type_name(),
            )),
        }
    }

    /// Reads an integer value, sign-extending signed types
    pub fn read_int(&self, value: &TypedValue) -> WalkResult<i64> {
        let raw = self.read_uint(value)?;
        let bits = value.ty.size * 8;
        match value.ty.kind {
            TypeKind::Integer { signed: true } if bits < 64 => {
                let shift = 64 - bits;
                Ok(((raw << shift) as i64) >> shift)
            }
            _ => Ok(raw as i64),
        }
    }

    /// Reads the NUL-terminated string a `char*` value points at; `None` for
    /// a null pointer.
    pub fn read_c_string(&self, pointer: &TypedValue) -> WalkResult<Option<String>> {
        let start = self.pointer_value(pointer)?;
        if start.is_null() {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        let mut cursor = start;
        while bytes.len() < self.max_string_len {
            // stay inside one 64-byte line so a read never crosses into an
            // unmapped page
            let line = 64 - (cursor.as_u64() % 64) as usize;
            let len = line.min(self.max_string_len - bytes.len());
            let chunk = match self.memory.read_vec(cursor, len) {
                Ok(chunk) => chunk,
                Err(err) => {
                    // fall back to single bytes up to the fault
                    let byte = self
                        .memory
                        .read_u8(cursor)
                        .map_err(|_| err)
                        .walk_context(|| format!("reading string at {}", start))?;
                    if byte == 0 {
                        break;
                    }
                    bytes.push(byte);
                    cursor = cursor.add(1);
                    continue;
                }
            };
            match chunk.iter().position(|&b| b == 0) {
                Some(end) => {
                    bytes.extend_from_slice(&chunk[..end]);
                    break;
                }
                None => bytes.extend_from_slice(&chunk),
            }
            cursor = cursor.add(len as u64);
        }

        Ok(Some(String::from_utf8(bytes)?))
    }

    /// Evaluates an expression such as `recycler.pools.list`
    pub fn resolve(&self, expression: &str) -> WalkResult<TypedValue> {
        let parsed = parse_expression(expression)?;
        let mut value = match parsed.primary {
            Primary::Symbol(name) => self.types.lookup_symbol(&name)?,
            Primary::Cast { type_name, address } => self.read(address, &type_name)?,
        };
        for step in parsed.steps {
            value = match step {
                Step::Field(name) => self.field(&value, &name),
                Step::Index(i) => self.index(&value, i),
            }
            .walk_context(|| format!("evaluating '{}'", expression))?;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SnapshotMemory;
    use crate::symbols::TypeRegistry;

    const LAYOUT: &str = r#"
        [[types]]
        name = "Slot"
        size = 4
        fields = [{ name = "next", offset = 0, type = "u32" }]

        [[types]]
        name = "Area"
        size = 32
        fields = [
            { name = "name", offset = 0, type = "char*" },
            { name = "delta", offset = 8, type = "i16" },
            { name = "peer", offset = 16, type = "Area*" },
            { name = "slots", offset = 24, type = "Slot[1]" },
        ]

        [[symbols]]
        name = "first_area"
        address = "0x1000"
        type = "Area"
    "#;

    fn image() -> SnapshotMemory {
        let mut mem = SnapshotMemory::new();
        mem.map_zeroed(Address::new(0x1000), 0x40).unwrap();
        mem.map_zeroed(Address::new(0x2000), 0x40).unwrap();
        mem.map(Address::new(0x3000), b"arena\0junk".to_vec()).unwrap();

        mem.write_u64(Address::new(0x1000), 0x3000).unwrap();
        mem.write_bytes(Address::new(0x1008), &(-3i16).to_le_bytes()).unwrap();
        mem.write_u64(Address::new(0x1010), 0x2000).unwrap();
        mem.write_u32(Address::new(0x1018), 7).unwrap();
        mem.write_u32(Address::new(0x101C), 9).unwrap();
        mem.write_u64(Address::new(0x2008), 42).unwrap();
        mem
    }

    #[test]
    fn test_field_and_deref() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        let area = target.read(Address::new(0x1000), "Area").unwrap();
        let peer = target.field(&area, "peer").unwrap();
        assert_eq!(peer.type_name(), "Area*");
        assert_eq!(target.pointer_value(&peer).unwrap(), Address::new(0x2000));

        // member access through a pointer dereferences it
        let peer_delta = target.field(&peer, "delta").unwrap();
        assert_eq!(peer_delta.address, Address::new(0x2008));
        assert_eq!(target.read_int(&peer_delta).unwrap(), 42);

        let delta = target.field(&area, "delta").unwrap();
        assert_eq!(target.read_int(&delta).unwrap(), -3);
    }

    #[test]
    fn test_flexible_array_index() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        let area = target.read(Address::new(0x1000), "Area").unwrap();
        let slots = target.field(&area, "slots").unwrap();
        let second = target.index(&slots, 1).unwrap();
        let next = target.field(&second, "next").unwrap();
        assert_eq!(target.read_uint(&next).unwrap(), 9);
    }

    #[test]
    fn test_c_string() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        let name = target.resolve("first_area.name").unwrap();
        assert_eq!(target.read_c_string(&name).unwrap().as_deref(), Some("arena"));

        let short = target.with_max_string_len(3);
        assert_eq!(short.read_c_string(&name).unwrap().as_deref(), Some("are"));

        // the peer's name pointer is null
        let peer_name = target.resolve("first_area.peer.name").unwrap();
        assert_eq!(target.read_c_string(&peer_name).unwrap(), None);
    }

    #[test]
    fn test_probe_and_cast() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        let area = target.resolve("first_area").unwrap();
        let peer = target.field(&area, "peer").unwrap();
        assert!(target.has_field(&area, "slots"));
        assert!(target.has_field(&peer, "slots"));
        assert!(!target.has_field(&area, "areas"));

        let slot = target.cast(&area, "Slot").unwrap();
        assert_eq!(slot.address, area.address);
        assert_eq!(slot.type_name(), "Slot");
    }

    #[test]
    fn test_resolve_cast_expression() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        let value = target.resolve("(struct Area *)0x2000").unwrap();
        assert_eq!(value.address, Address::new(0x2000));
        assert_eq!(value.type_name(), "Area");
    }

    #[test]
    fn test_resolve_errors() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        assert!(matches!(
            target.resolve("recycler"),
            Err(WalkError::UnresolvedSymbol(_))
        ));
        let err = target.resolve("first_area.bogus").unwrap_err();
        assert!(matches!(err.root_cause(), WalkError::NoSuchField { .. }));
        assert!(target.resolve("(Nope)0x10").is_err());
    }

    #[test]
    fn test_read_failures_surface() {
        let mem = image();
        let types = TypeRegistry::from_toml_str(LAYOUT).unwrap();
        let target = Target::new(&mem, &types);

        // 0x2000's peer pointer is null, so following it fails
        let err = target.resolve("first_area.peer.peer.peer.delta").unwrap_err();
        assert!(matches!(err.root_cause(), WalkError::ReadFailed { .. }));

        let area = target.resolve("first_area").unwrap();
        assert!(target.read_uint(&area).is_err());
        assert!(target.deref(&area).is_err());
    }
}
