//! Linux cross-process reads through `process_vm_readv`

use crate::core::types::{Address, WalkError, WalkResult};
use std::io;

/// Reads exactly `buffer.len()` bytes from `pid` at `address`.
///
/// Needs the same permission as ptrace-attaching, but does not attach.
pub fn read_process_memory(pid: u32, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
    if buffer.is_empty() {
        return Ok(());
    }

    let local = libc::iovec {
        iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
        iov_len: buffer.len(),
    };
    let remote = libc::iovec {
        iov_base: address.as_u64() as usize as *mut libc::c_void,
        iov_len: buffer.len(),
    };

    let result = unsafe { libc::process_vm_readv(pid as libc::pid_t, &local, 1, &remote, 1, 0) };

    if result < 0 {
        return Err(WalkError::read_failed(
            address,
            buffer.len(),
            io::Error::last_os_error().to_string(),
        ));
    }
    if result as usize != buffer.len() {
        return Err(WalkError::read_failed(
            address,
            buffer.len(),
            format!("short read of {} bytes", result),
        ));
    }
    Ok(())
}
