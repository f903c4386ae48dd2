//! Mapping, unmapping and copying address spaces.

use crate::{
    FrameNumber, VirtualAddress, VirtualMemoryManager,
    address_space::SpaceId,
    arch::{PAGE_SIZE, PageFlags},
    config::{DIRECTORY_ENTRIES, ENTRIES_PER_TABLE, KERNEL_COPY_ENTRIES, TABLE_SPAN, TASK_SIZE},
    page_table::{PageEntry, PteState},
    physical_memory_manager::AllocError,
    storage::Storage,
};

/// Returns the directory slots covered by `length` bytes starting at the 4 MiB aligned
/// `address`.
fn covered_tables(address: VirtualAddress, length: usize) -> core::ops::Range<usize> {
    let first = address.directory_index();
    let last = first + length.div_ceil(TABLE_SPAN);
    assert!(
        last <= DIRECTORY_ENTRIES,
        "range {address}+{length:#x} is beyond the end of the address space"
    );
    first..last
}

impl<S: Storage> VirtualMemoryManager<S> {
    /// Returns the page table covering `address` in `id`, allocating it if needed.
    pub(crate) fn ensure_table(
        &mut self,
        id: SpaceId,
        address: VirtualAddress,
    ) -> Result<FrameNumber, AllocError> {
        let directory = self.directory(id);
        let index = address.directory_index();
        if let Some(table) = directory.table(&self.pmm, index) {
            return Ok(table);
        }
        // Eviction never touches directory entries, so the slot is still empty afterwards.
        let table = self.allocate_page()?;
        directory.install_table(&mut self.pmm, index, table);
        Ok(table)
    }

    /// Maps `frame` at the page-aligned `address` of `id` with `flags`.
    ///
    /// The page table is allocated on demand. The frame should be exclusively owned; anything
    /// else is logged but still mapped.
    ///
    /// # Panics
    /// Panics if `address` is unaligned or outside the address space, or if the entry is not
    /// absent.
    pub fn map(
        &mut self,
        id: SpaceId,
        frame: FrameNumber,
        address: VirtualAddress,
        flags: PageFlags,
    ) -> Result<(), AllocError> {
        assert!(
            address.is_aligned(PAGE_SIZE),
            "cannot map unaligned address {address}"
        );
        assert!(
            address.as_usize() < TASK_SIZE,
            "cannot map {address} outside the address space"
        );
        if !self.pmm.is_managed(frame) {
            log::warn!("trying to put page {frame} at {address}");
        } else if self.pmm.reference_count(frame) != Some(1) {
            log::warn!("mem_map disagrees with {frame} at {address}");
        }

        self.ensure_table(id, address)?;
        let directory = self.directory(id);
        if let Some(existing) = directory.entry(&self.pmm, address) {
            assert!(
                existing.is_absent(),
                "{address} in address space {id} is already mapped: {existing:?}"
            );
        }
        directory.set_entry(&mut self.pmm, address, PageEntry::resident(frame, flags));
        self.spaces.invalidate(id, address);
        Ok(())
    }

    /// Maps `frame` writable and already dirty, as for pages built by the kernel on behalf of
    /// the process.
    pub fn put_dirty_page(
        &mut self,
        id: SpaceId,
        frame: FrameNumber,
        address: VirtualAddress,
    ) -> Result<(), AllocError> {
        let mut flags = PageFlags::user_page();
        flags.set_dirty(true);
        self.map(id, frame, address, flags)
    }

    /// Releases every page and swap slot in `length` bytes from `address`, then frees the
    /// page tables covering the range.
    ///
    /// # Panics
    /// Panics for the kernel address space, or if `address` is not 4 MiB aligned.
    pub fn unmap_range(&mut self, id: SpaceId, address: VirtualAddress, length: usize) {
        assert!(!id.is_kernel(), "trying to free up swapper memory space");
        assert!(
            address.is_aligned(TABLE_SPAN),
            "unmap_range called with wrong alignment: {address}"
        );
        let directory = self.directory(id);
        for index in covered_tables(address, length) {
            let Some(table) = directory.remove_table(&mut self.pmm, index) else {
                continue;
            };
            for entry_index in 0..ENTRIES_PER_TABLE {
                match self.pmm.table(table).entry(entry_index).state() {
                    PteState::Absent => {}
                    PteState::Swapped(slot) => self.swap.release(slot),
                    PteState::Resident { frame, .. } => self.pmm.free(frame),
                }
            }
            self.pmm.free(table);
        }
        self.spaces.invalidate_all(id);
    }

    /// Copies the page tables of `src` covering `length` bytes into `dst`, sharing every page
    /// copy-on-write.
    ///
    /// Resident pages become read-only in both spaces and gain a reference; pages below the
    /// kernel floor stay writable in `src` and are not counted. Swapped entries are copied
    /// as-is and their slot gains a reference. Copying from the kernel address space copies
    /// only the kernel footprint of each table.
    ///
    /// On failure `dst` is left partially built and the caller must tear it down.
    ///
    /// # Panics
    /// Panics if `dst` already has a page table in the range.
    pub fn copy_address_space(
        &mut self,
        src: SpaceId,
        dst: SpaceId,
        length: usize,
    ) -> Result<(), AllocError> {
        assert_ne!(src, dst, "cannot copy an address space onto itself");
        let source = self.directory(src);
        let destination = self.directory(dst);
        let limit = if src.is_kernel() {
            KERNEL_COPY_ENTRIES
        } else {
            ENTRIES_PER_TABLE
        };

        for index in covered_tables(VirtualAddress::new(0), length) {
            assert!(
                destination.table(&self.pmm, index).is_none(),
                "copy_address_space: page table {index} already exists in address space {dst}"
            );
            if source.table(&self.pmm, index).is_none() {
                continue;
            }
            let to_table = self.allocate_page()?;
            destination.install_table(&mut self.pmm, index, to_table);
            let Some(from_table) = source.table(&self.pmm, index) else {
                continue;
            };

            for entry_index in 0..limit {
                let entry = self.pmm.table(from_table).entry(entry_index);
                match entry.state() {
                    PteState::Absent => {}
                    PteState::Swapped(slot) => {
                        self.swap.duplicate(slot);
                        self.pmm.table_mut(to_table).set_entry(entry_index, entry);
                    }
                    PteState::Resident { frame, .. } => {
                        let shared = entry.write_protected();
                        self.pmm.table_mut(to_table).set_entry(entry_index, shared);
                        if self.pmm.is_managed(frame) {
                            self.pmm.table_mut(from_table).set_entry(entry_index, shared);
                            self.pmm.share(frame);
                        }
                    }
                }
            }
        }
        self.spaces.invalidate_all(src);
        Ok(())
    }
}
