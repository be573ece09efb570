//! Member hook offsets: node address <-> owning record address

use super::address::Address;
use super::error::{WalkError, WalkResult};
use super::layout::TypeDescriptor;
use serde::{Deserialize, Serialize};

/// Byte distance from an owning record's start to its embedded hook.
///
/// Owner recovery is `owner = node - offset`. Nothing is bounds checked; a
/// wrong offset yields a wrong address that only shows up when the caller
/// reads garbage from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HookOffset(u64);

impl HookOffset {
    /// The hook is the record's first field
    pub const NONE: HookOffset = HookOffset(0);

    pub const fn new(offset: u64) -> Self {
        HookOffset(offset)
    }

    /// Offset of `field` inside `owner`
    pub fn of_field(owner: &TypeDescriptor, field: &str) -> WalkResult<Self> {
        owner
            .field(field)
            .map(|f| HookOffset(f.offset))
            .ok_or_else(|| WalkError::no_such_field(&owner.name, field))
    }

    /// Resolves an optional member hook name, zero when absent
    pub fn for_member(owner: &TypeDescriptor, member_hook: Option<&str>) -> WalkResult<Self> {
        match member_hook {
            Some(field) => Self::of_field(owner, field),
            None => Ok(HookOffset::NONE),
        }
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Owner address for a node embedded at this offset
    pub const fn owner_of(&self, node: Address) -> Address {
        node.sub(self.0)
    }

    /// Node address inside an owner
    pub const fn node_of(&self, owner: Address) -> Address {
        owner.add(self.0)
    }
}
