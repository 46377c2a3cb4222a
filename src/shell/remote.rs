//! Owned handles into another process's address space.
//!
//! One capture or restore call owns its process handle and remote buffers
//! exclusively and must release them on every exit path, so both are modeled
//! as values that clean up on drop.

use core::ffi::c_void;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
};

use super::ShellError;

/// Open handle on the shell process with the minimum rights needed for
/// remote allocation and batched memory transfers.
pub struct RemoteProcess {
    handle: HANDLE,
    pid: u32,
}

impl RemoteProcess {
    pub fn open(pid: u32) -> Result<Self, ShellError> {
        let handle = unsafe {
            OpenProcess(
                PROCESS_VM_OPERATION | PROCESS_VM_READ | PROCESS_VM_WRITE,
                false,
                pid,
            )
        }
        .map_err(|_| ShellError::ProcessAccess(pid))?;
        Ok(Self { handle, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Allocate `len` committed read-write bytes in the target process.
    pub fn alloc(&self, len: usize) -> Result<RemoteBuffer<'_>, ShellError> {
        let addr = unsafe {
            VirtualAllocEx(self.handle, None, len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE)
        };
        if addr.is_null() {
            return Err(ShellError::Memory(format!(
                "allocation of {len} bytes in process {} failed",
                self.pid
            )));
        }
        Ok(RemoteBuffer {
            process: self,
            addr,
            len,
        })
    }
}

impl Drop for RemoteProcess {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

/// Memory allocated inside the target process, freed on drop.
pub struct RemoteBuffer<'p> {
    process: &'p RemoteProcess,
    addr: *mut c_void,
    len: usize,
}

impl RemoteBuffer<'_> {
    /// Base address inside the target process, for building message LPARAMs.
    pub fn addr(&self) -> usize {
        self.addr as usize
    }

    /// Write `bytes` at the start of the buffer in one batched transfer.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ShellError> {
        debug_assert!(bytes.len() <= self.len);
        unsafe {
            WriteProcessMemory(
                self.process.handle,
                self.addr,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                None,
            )
        }
        .map_err(|e| ShellError::Memory(format!("remote write failed: {e}")))
    }

    /// Read the whole buffer back in one batched transfer.
    pub fn read_all(&self) -> Result<Vec<u8>, ShellError> {
        let mut buf = vec![0u8; self.len];
        unsafe {
            ReadProcessMemory(
                self.process.handle,
                self.addr,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                None,
            )
        }
        .map_err(|e| ShellError::Memory(format!("remote read failed: {e}")))?;
        Ok(buf)
    }
}

impl Drop for RemoteBuffer<'_> {
    fn drop(&mut self) {
        unsafe {
            let _ = VirtualFreeEx(self.process.handle, self.addr, 0, MEM_RELEASE);
        }
    }
}
