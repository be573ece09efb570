//! Raw read access to foreign memory

use crate::core::types::{Address, WalkError, WalkResult};

/// Read-only byte access to the inspected process.
///
/// Implementations must not cache: the target may be inspected at different
/// points of its execution between calls.
pub trait MemoryView {
    /// Fills `buffer` with the bytes at `address`, or fails without partial
    /// results.
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()>;

    /// Reads `len` bytes into a new vector
    fn read_vec(&self, address: Address, len: usize) -> WalkResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_bytes(address, &mut buffer)?;
        Ok(buffer)
    }

    fn read_u8(&self, address: Address) -> WalkResult<u8> {
        let mut buffer = [0u8; 1];
        self.read_bytes(address, &mut buffer)?;
        Ok(buffer[0])
    }

    fn read_u16(&self, address: Address) -> WalkResult<u16> {
        let mut buffer = [0u8; 2];
        self.read_bytes(address, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    fn read_u32(&self, address: Address) -> WalkResult<u32> {
        let mut buffer = [0u8; 4];
        self.read_bytes(address, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    fn read_u64(&self, address: Address) -> WalkResult<u64> {
        let mut buffer = [0u8; 8];
        self.read_bytes(address, &mut buffer)?;
        Ok(u64::from_le_bytes(buffer))
    }

    /// Reads an unsigned little-endian integer of 1, 2, 4 or 8 bytes
    fn read_uint(&self, address: Address, size: u64) -> WalkResult<u64> {
        match size {
            1 => self.read_u8(address).map(u64::from),
            2 => self.read_u16(address).map(u64::from),
            4 => self.read_u32(address).map(u64::from),
            8 => self.read_u64(address),
            _ => Err(WalkError::UnsupportedOperation(format!(
                "{}-byte integer at {}",
                size, address
            ))),
        }
    }
}

impl<T: MemoryView + ?Sized> MemoryView for Box<T> {
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
        (**self).read_bytes(address, buffer)
    }
}
