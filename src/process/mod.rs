//! Live process access
//!
//! Reads memory of another, already stopped process. Nothing here attaches
//! to, pauses, resumes or writes to the target; stopping it (SIGSTOP, a
//! debugger breakpoint) is the caller's business.

#[cfg(windows)]
mod handle;
#[cfg(target_os = "linux")]
mod vm;

#[cfg(windows)]
pub use handle::ProcessHandle;

use crate::core::types::{Address, WalkResult};
use crate::memory::MemoryView;
use tracing::debug;

/// [`MemoryView`] over a live process
#[derive(Debug)]
pub struct ProcessMemory {
    pid: u32,
    #[cfg(windows)]
    handle: ProcessHandle,
}

impl ProcessMemory {
    /// Opens `pid` for reading
    pub fn open(pid: u32) -> WalkResult<Self> {
        debug!(pid, "opening process memory");

        #[cfg(target_os = "linux")]
        {
            std::fs::metadata(format!("/proc/{}", pid))?;
            Ok(ProcessMemory { pid })
        }

        #[cfg(windows)]
        {
            let handle = ProcessHandle::open_for_read(pid)?;
            Ok(ProcessMemory { pid, handle })
        }

        #[cfg(not(any(target_os = "linux", windows)))]
        {
            Err(crate::core::types::WalkError::UnsupportedOperation(format!(
                "reading live process {} on this platform",
                pid
            )))
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl MemoryView for ProcessMemory {
    #[cfg(target_os = "linux")]
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
        vm::read_process_memory(self.pid, address, buffer)
    }

    #[cfg(windows)]
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
        self.handle.read_memory(address, buffer)
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    fn read_bytes(&self, address: Address, buffer: &mut [u8]) -> WalkResult<()> {
        Err(crate::core::types::WalkError::read_failed(
            address,
            buffer.len(),
            "live process reads are not supported on this platform",
        ))
    }
}
