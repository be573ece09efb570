//! Foreign memory address wrapper with hex parsing and byte arithmetic

use super::error::WalkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque location in the inspected process.
///
/// Never dereferenced directly; all reads go through a
/// [`MemoryView`](crate::memory::MemoryView).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    /// Creates a new address from a raw value
    pub const fn new(value: u64) -> Self {
        Address(value)
    }

    /// Creates a null address (0x0)
    pub const fn null() -> Self {
        Address(0)
    }

    /// Checks if the bit pattern is zero.
    ///
    /// This says nothing about whether the address is readable.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the address is aligned to the specified boundary
    pub const fn is_aligned(&self, alignment: u64) -> bool {
        alignment != 0 && self.0 % alignment == 0
    }

    /// Moves the address by a signed byte offset, wrapping like the target's
    /// own pointer arithmetic would.
    pub const fn offset(&self, offset: i64) -> Self {
        Address(self.0.wrapping_add(offset as u64))
    }

    /// Adds an unsigned byte count
    pub const fn add(&self, bytes: u64) -> Self {
        Address(self.0.wrapping_add(bytes))
    }

    /// Subtracts an unsigned byte count
    pub const fn sub(&self, bytes: u64) -> Self {
        Address(self.0.wrapping_sub(bytes))
    }

    /// Byte distance from `base` to this address, if it lies at or above it
    pub const fn distance_from(&self, base: Address) -> Option<u64> {
        self.0.checked_sub(base.0)
    }

    /// Returns the raw value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for Address {
    type Err = WalkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u64::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix('$') {
            u64::from_str_radix(hex, 16)
        } else if s.chars().any(|c| c.is_ascii_alphabetic()) {
            u64::from_str_radix(s, 16)
        } else {
            s.parse::<u64>()
        };

        value
            .map(Address::new)
            .map_err(|_| WalkError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address::new(value)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address::new(value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        assert_eq!(Address::from_str("0x1000").unwrap(), Address::new(0x1000));
        assert_eq!(Address::from_str("0X1000").unwrap(), Address::new(0x1000));
        assert_eq!(Address::from_str("$1000").unwrap(), Address::new(0x1000));
        assert_eq!(
            Address::from_str("DEADBEEF").unwrap(),
            Address::new(0xDEADBEEF)
        );
        assert_eq!(Address::from_str("4096").unwrap(), Address::new(4096));
        assert!(Address::from_str("0xZZ").is_err());
        assert!(Address::from_str("").is_err());
    }

    #[test]
    fn test_address_arithmetic() {
        let addr = Address::new(0x1000);
        assert_eq!(addr.offset(0x10), Address::new(0x1010));
        assert_eq!(addr.offset(-0x10), Address::new(0x0FF0));
        assert_eq!(addr.add(8), Address::new(0x1008));
        assert_eq!(addr.sub(8), Address::new(0x0FF8));
        assert_eq!(Address::new(0x1018).distance_from(addr), Some(0x18));
        assert_eq!(Address::new(0x0800).distance_from(addr), None);
    }

    #[test]
    fn test_null_is_bit_pattern_only() {
        assert!(Address::null().is_null());
        assert!(!Address::new(1).is_null());
        assert!(Address::new(0x1000).is_aligned(16));
        assert!(!Address::new(0x1004).is_aligned(8));
    }

    #[test]
    fn test_address_display() {
        let addr = Address::new(0xDEADBEEF);
        assert_eq!(format!("{}", addr), "0xdeadbeef");
        assert_eq!(format!("{:x}", addr), "0x00000000deadbeef");
        assert_eq!(format!("{:X}", addr), "0x00000000DEADBEEF");
    }
}
