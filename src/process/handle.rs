//! Windows process handle with RAII semantics

use crate::core::types::{Address, WalkError, WalkResult};
use std::fmt;
use std::ptr;
use winapi::shared::minwindef::{FALSE, LPCVOID, LPVOID};
use winapi::um::handleapi::CloseHandle;
use winapi::um::memoryapi::ReadProcessMemory;
use winapi::um::processthreadsapi::OpenProcess;
use winapi::um::winnt::{HANDLE, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ};

/// Read-only handle to another process
pub struct ProcessHandle {
    handle: HANDLE,
    pid: u32,
}

impl ProcessHandle {
    /// Opens a process for querying and reading memory only
    pub fn open_for_read(pid: u32) -> WalkResult<Self> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, FALSE, pid) };
        if handle.is_null() {
            return Err(WalkError::IoError(std::io::Error::last_os_error()));
        }
        Ok(ProcessHandle { handle, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Reads exactly `buffer.len()` bytes or fails
    pub fn read_memory(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
        let mut bytes_read = 0;

        let result = unsafe {
            ReadProcessMemory(
                self.handle,
                address.as_u64() as usize as LPCVOID,
                buffer.as_mut_ptr() as LPVOID,
                buffer.len(),
                &mut bytes_read,
            )
        };

        if result == FALSE {
            return Err(WalkError::read_failed(
                address,
                buffer.len(),
                std::io::Error::last_os_error().to_string(),
            ));
        }
        if bytes_read != buffer.len() {
            return Err(WalkError::read_failed(
                address,
                buffer.len(),
                format!("short read of {} bytes", bytes_read),
            ));
        }
        Ok(())
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            // Ignore errors on cleanup
            unsafe {
                CloseHandle(self.handle);
            }
            self.handle = ptr::null_mut();
        }
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("valid", &!self.handle.is_null())
            .finish()
    }
}
