//! Kernel access to user memory.
//!
//! These routines walk the current address space the way the MMU would: a missing page
//! raises a not-present fault, a write to a read-only page raises a write-protect fault, and
//! the access is retried once the fault is resolved. Successful accesses set the accessed
//! bit, and writes set the dirty bit, just as the hardware does.

use crate::{
    FrameNumber, VirtualAddress, VirtualMemoryManager,
    arch::PAGE_SIZE,
    config::TASK_SIZE,
    fault::FaultError,
    page_table::PteState,
    storage::Storage,
};

/// Attempts at resolving one page before giving up. Each retry means reclaim evicted the
/// page again before it could be used.
const MAX_FAULT_RETRIES: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

impl<S: Storage> VirtualMemoryManager<S> {
    /// Copies `buffer.len()` bytes from `address` in the current address space.
    pub fn read_user(
        &mut self,
        address: VirtualAddress,
        buffer: &mut [u8],
    ) -> Result<(), FaultError> {
        let mut done = 0;
        while done < buffer.len() {
            let at = address + done;
            let offset = at.page_offset();
            let len = (PAGE_SIZE - offset).min(buffer.len() - done);
            let frame = self.resolve(at, Access::Read)?;
            buffer[done..done + len]
                .copy_from_slice(&self.pmm.frame(frame).bytes()[offset..offset + len]);
            done += len;
        }
        Ok(())
    }

    /// Copies `data` to `address` in the current address space.
    pub fn write_user(&mut self, address: VirtualAddress, data: &[u8]) -> Result<(), FaultError> {
        let mut done = 0;
        while done < data.len() {
            let at = address + done;
            let offset = at.page_offset();
            let len = (PAGE_SIZE - offset).min(data.len() - done);
            let frame = self.resolve(at, Access::Write)?;
            self.pmm.frame_mut(frame).bytes_mut()[offset..offset + len]
                .copy_from_slice(&data[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// Translates `address`, faulting pages in as needed, and returns the backing frame.
    fn resolve(
        &mut self,
        address: VirtualAddress,
        access: Access,
    ) -> Result<FrameNumber, FaultError> {
        if address.as_usize() >= TASK_SIZE {
            return Err(FaultError::InvalidAddress(address));
        }
        let id = self.spaces.current();
        let page = address.align_down(PAGE_SIZE);

        for _ in 0..MAX_FAULT_RETRIES {
            let entry = self.entry(id, page);
            match entry.map(|entry| (entry, entry.state())) {
                Some((mut entry, PteState::Resident { frame, mut flags })) => {
                    if access == Access::Write && !flags.is_writable() {
                        self.handle_write_protect_fault(address)?;
                        continue;
                    }
                    flags.set_accessed(true);
                    if access == Access::Write {
                        flags.set_dirty(true);
                    }
                    entry.set_flags(flags);
                    self.directory(id).set_entry(&mut self.pmm, page, entry);
                    return Ok(frame);
                }
                _ => self.handle_not_present_fault(address)?,
            }
        }
        log::warn!("giving up on {address} after {MAX_FAULT_RETRIES} faults");
        Err(FaultError::OutOfMemory)
    }
}
