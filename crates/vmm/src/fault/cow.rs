//! Copy-on-write.

use crate::{
    VirtualAddress, VirtualMemoryManager,
    address_space::SpaceId,
    arch::{PAGE_SIZE, PageFlags},
    config::TASK_SIZE,
    page_table::{PageEntry, PteState},
    storage::Storage,
};

use super::FaultError;

impl<S: Storage> VirtualMemoryManager<S> {
    /// Resolves a write to a present, read-only page of the current address space.
    ///
    /// # Panics
    /// Panics if the kernel address space is active: the kernel never write-faults on its own
    /// memory.
    pub fn handle_write_protect_fault(
        &mut self,
        address: VirtualAddress,
    ) -> Result<(), FaultError> {
        let id = self.spaces.current();
        if id.is_kernel() {
            panic!("kernel memory write-protect fault at {address}");
        }
        if address.as_usize() >= TASK_SIZE {
            return Err(FaultError::InvalidAddress(address));
        }
        self.unshare_page(id, address.align_down(PAGE_SIZE))
    }

    /// Makes the page at `address` of the current address space writable ahead of a kernel
    /// write into user memory, breaking copy-on-write sharing if needed.
    pub fn write_verify(&mut self, address: VirtualAddress) -> Result<(), FaultError> {
        if address.as_usize() >= TASK_SIZE {
            return Err(FaultError::InvalidAddress(address));
        }
        let id = self.spaces.current();
        let page = address.align_down(PAGE_SIZE);
        match self.entry(id, page).map(PageEntry::state) {
            Some(PteState::Resident { flags, .. }) if !flags.is_writable() => {
                self.unshare_page(id, page)
            }
            _ => Ok(()),
        }
    }

    /// Gives `id` a writable page at `page`: in place when it is the only user, otherwise by
    /// copying it to a fresh frame.
    fn unshare_page(&mut self, id: SpaceId, page: VirtualAddress) -> Result<(), FaultError> {
        let directory = self.directory(id);
        let Some(entry) = directory.entry(&self.pmm, page) else {
            return Ok(());
        };
        let PteState::Resident { frame, mut flags } = entry.state() else {
            return Ok(());
        };
        if flags.is_writable() {
            return Ok(());
        }

        if self.pmm.reference_count(frame) == Some(1) {
            flags.set_writable(true);
            let mut entry = entry;
            entry.set_flags(flags);
            directory.set_entry(&mut self.pmm, page, entry);
            self.spaces.invalidate(id, page);
            return Ok(());
        }

        let copy = self.allocate_page()?;
        if directory.entry(&self.pmm, page) != Some(entry) {
            // Reclaim rewrote the entry while we allocated; the access is retried.
            self.pmm.free(copy);
            return Ok(());
        }
        self.pmm.copy_frame(frame, copy);
        self.pmm.free(frame);
        directory.set_entry(
            &mut self.pmm,
            page,
            PageEntry::resident(copy, PageFlags::user_page()),
        );
        self.spaces.invalidate(id, page);
        log::trace!("address space {id}: copied {frame} to {copy} for {page}");
        Ok(())
    }
}
