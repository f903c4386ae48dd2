//! A lock around the memory manager for use from trap handlers.
//!
//! All memory management runs on one CPU, but a fault handler and the code it interrupted
//! must never both hold the manager. Every access therefore masks interrupts and then takes
//! a spin lock.

use spin::Mutex;

use crate::{
    VirtualAddress, VirtualMemoryManager, arch,
    fault::{FaultError, FaultKind},
    storage::Storage,
};

/// A [`VirtualMemoryManager`] that can live in a `static` and be installed at boot.
pub struct LockedVmm<S: Storage> {
    inner: Mutex<Option<VirtualMemoryManager<S>>>,
}

impl<S: Storage> LockedVmm<S> {
    /// Creates an empty lock. Call [`install`](Self::install) before using it.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Installs the manager, returning the one it replaces.
    pub fn install(&self, vmm: VirtualMemoryManager<S>) -> Option<VirtualMemoryManager<S>> {
        arch::without_interrupts(|| self.inner.lock().replace(vmm))
    }

    /// Removes the installed manager.
    pub fn take(&self) -> Option<VirtualMemoryManager<S>> {
        arch::without_interrupts(|| self.inner.lock().take())
    }

    pub fn is_installed(&self) -> bool {
        arch::without_interrupts(|| self.inner.lock().is_some())
    }

    /// Runs `f` on the manager with interrupts masked.
    ///
    /// # Panics
    /// Panics if no manager is installed.
    pub fn with<R>(&self, f: impl FnOnce(&mut VirtualMemoryManager<S>) -> R) -> R {
        arch::without_interrupts(|| {
            let mut guard = self.inner.lock();
            let Some(vmm) = guard.as_mut() else {
                panic!("virtual memory manager used before it was installed");
            };
            f(vmm)
        })
    }

    /// Entry point for the page fault trap: decodes `error_code` and resolves the fault at
    /// `address`.
    pub fn handle_page_fault(
        &self,
        error_code: u32,
        address: VirtualAddress,
    ) -> Result<(), FaultError> {
        let kind = FaultKind::from_error_code(error_code);
        self.with(|vmm| vmm.handle_page_fault(kind, address))
    }
}

impl<S: Storage> Default for LockedVmm<S> {
    fn default() -> Self {
        Self::new()
    }
}
