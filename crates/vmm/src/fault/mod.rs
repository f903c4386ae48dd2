//! Page fault handling.
//!
//! The trap front end decodes the faulting linear address and the error code, then calls
//! [`VirtualMemoryManager::handle_page_fault`]. Faults on present pages are write-protect
//! faults and go to the copy-on-write handler; everything else is a not-present fault for
//! the demand pager.

mod cow;
mod demand;

use core::fmt;

use crate::{
    VirtualAddress, VirtualMemoryManager, physical_memory_manager::AllocError,
    storage::{IoError, Storage},
};

/// Signals a fault can deliver to the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Segv,
}

impl Signal {
    /// Returns the signal number.
    pub const fn number(self) -> u8 {
        match self {
            Self::Segv => 11,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Segv => write!(f, "SIGSEGV"),
        }
    }
}

/// The two kinds of page fault the memory manager resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    NotPresent,
    WriteProtect,
}

impl FaultKind {
    /// Classifies a page fault from the error code the CPU pushed: bit 0 is set when the page
    /// was present, which makes it a protection fault.
    pub const fn from_error_code(code: u32) -> Self {
        if code & 1 != 0 {
            Self::WriteProtect
        } else {
            Self::NotPresent
        }
    }
}

/// Errors that terminate the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No page could be found to resolve the fault.
    OutOfMemory,
    /// The address lies outside the process address space.
    InvalidAddress(VirtualAddress),
    /// Reading the page from its backing store failed.
    Io(IoError),
}

impl FaultError {
    /// Returns the signal the faulting process is killed with.
    pub const fn signal(&self) -> Signal {
        Signal::Segv
    }
}

impl From<AllocError> for FaultError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidAddress(address) => write!(f, "invalid address {address}"),
            Self::Io(err) => write!(f, "paging I/O failed: {err}"),
        }
    }
}

impl<S: Storage> VirtualMemoryManager<S> {
    /// Resolves a page fault in the current address space.
    ///
    /// `Ok` means the faulting instruction can be restarted.
    pub fn handle_page_fault(
        &mut self,
        kind: FaultKind,
        address: VirtualAddress,
    ) -> Result<(), FaultError> {
        let result = match kind {
            FaultKind::NotPresent => self.handle_not_present_fault(address),
            FaultKind::WriteProtect => self.handle_write_protect_fault(address),
        };
        if let Err(err) = result {
            log::warn!(
                "address space {}: {:?} fault at {address}: {err}, sending {}",
                self.current(),
                kind,
                err.signal()
            );
        }
        result
    }
}
