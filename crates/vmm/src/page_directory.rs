//! Two-level page table walk.
//!
//! This module provides the `PageDirectory` type, a handle to the root frame of one address
//! space. Both levels live in frames owned by the [`PhysicalMemoryManager`], so every
//! operation borrows the allocator to reach them through the bounds-checked [`PageTable`]
//! view.

use crate::{
    FrameNumber, PhysicalMemoryManager, VirtualAddress,
    arch::PageFlags,
    config::DIRECTORY_ENTRIES,
    page_table::{PageEntry, PageTable},
};

/// The root of a two-level page table hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDirectory {
    root: FrameNumber,
}

impl PageDirectory {
    /// Wraps a zeroed frame as an empty page directory.
    pub const fn new(root: FrameNumber) -> Self {
        Self { root }
    }

    /// Returns the frame holding the directory.
    pub fn root(&self) -> FrameNumber {
        self.root
    }

    fn check_index(index: usize) {
        assert!(
            index < DIRECTORY_ENTRIES,
            "directory index {index} is beyond the end of the address space"
        );
    }

    fn directory<'a>(&self, pmm: &'a PhysicalMemoryManager) -> &'a PageTable {
        pmm.table(self.root)
    }

    /// Returns the page table frame for directory slot `index`, if one is installed.
    pub fn table(&self, pmm: &PhysicalMemoryManager, index: usize) -> Option<FrameNumber> {
        Self::check_index(index);
        self.directory(pmm).entry(index).frame()
    }

    /// Installs `table` at directory slot `index`.
    ///
    /// # Panics
    /// Panics if a table is already installed there.
    pub fn install_table(&self, pmm: &mut PhysicalMemoryManager, index: usize, table: FrameNumber) {
        Self::check_index(index);
        let directory = pmm.table_mut(self.root);
        assert!(
            directory.entry(index).is_absent(),
            "page table {index} already exists"
        );
        directory.set_entry(index, PageEntry::resident(table, PageFlags::user_page()));
    }

    /// Removes the table at directory slot `index` and returns its frame.
    pub fn remove_table(
        &self,
        pmm: &mut PhysicalMemoryManager,
        index: usize,
    ) -> Option<FrameNumber> {
        let table = self.table(pmm, index)?;
        pmm.table_mut(self.root).set_entry(index, PageEntry::EMPTY);
        Some(table)
    }

    /// Returns the page table entry for `address`, or `None` if its table is missing.
    pub fn entry(&self, pmm: &PhysicalMemoryManager, address: VirtualAddress) -> Option<PageEntry> {
        let table = self.table(pmm, address.directory_index())?;
        Some(pmm.table(table).entry(address.table_index()))
    }

    /// Replaces the page table entry for `address`.
    ///
    /// # Panics
    /// Panics if the covering page table has not been installed.
    pub fn set_entry(
        &self,
        pmm: &mut PhysicalMemoryManager,
        address: VirtualAddress,
        entry: PageEntry,
    ) {
        let Some(table) = self.table(pmm, address.directory_index()) else {
            panic!("no page table covers {address}");
        };
        pmm.table_mut(table).set_entry(address.table_index(), entry);
    }

    /// Iterates over `(index, table frame)` for every installed page table.
    pub fn tables<'a>(
        self,
        pmm: &'a PhysicalMemoryManager,
    ) -> impl Iterator<Item = (usize, FrameNumber)> + 'a {
        self.directory(pmm)
            .entries(DIRECTORY_ENTRIES)
            .filter_map(|(index, entry)| entry.frame().map(|frame| (index, frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical_memory::PhysicalMemory;

    fn setup() -> (PhysicalMemoryManager, PageDirectory) {
        let mut pmm = PhysicalMemoryManager::new(PhysicalMemory::emulated(16), FrameNumber::new(4));
        let root = pmm.allocate().unwrap();
        (pmm, PageDirectory::new(root))
    }

    #[test]
    fn missing_table_has_no_entry() {
        let (pmm, dir) = setup();
        assert_eq!(dir.entry(&pmm, VirtualAddress::new(0x1000)), None);
        assert_eq!(dir.tables(&pmm).count(), 0);
    }

    #[test]
    fn entries_resolve_through_installed_table() {
        let (mut pmm, dir) = setup();
        let table = pmm.allocate().unwrap();
        dir.install_table(&mut pmm, 1, table);

        let address = VirtualAddress::from_indices(1, 7);
        let entry = PageEntry::resident(FrameNumber::new(2), PageFlags::user_page());
        dir.set_entry(&mut pmm, address, entry);

        assert_eq!(dir.entry(&pmm, address), Some(entry));
        assert_eq!(
            dir.entry(&pmm, VirtualAddress::from_indices(1, 8)),
            Some(PageEntry::EMPTY)
        );
        assert_eq!(pmm.table(table).entry(7), entry);
        assert_eq!(dir.tables(&pmm).collect::<Vec<_>>(), vec![(1, table)]);
    }

    #[test]
    fn remove_table_clears_directory_slot() {
        let (mut pmm, dir) = setup();
        let table = pmm.allocate().unwrap();
        dir.install_table(&mut pmm, 3, table);
        assert_eq!(dir.remove_table(&mut pmm, 3), Some(table));
        assert_eq!(dir.table(&pmm, 3), None);
        assert_eq!(dir.remove_table(&mut pmm, 3), None);
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn installing_over_a_table_panics() {
        let (mut pmm, dir) = setup();
        let table = pmm.allocate().unwrap();
        dir.install_table(&mut pmm, 0, table);
        dir.install_table(&mut pmm, 0, table);
    }

    #[test]
    #[should_panic(expected = "no page table covers")]
    fn setting_entry_without_table_panics() {
        let (mut pmm, dir) = setup();
        dir.set_entry(&mut pmm, VirtualAddress::new(0), PageEntry::EMPTY);
    }

    #[test]
    #[should_panic(expected = "beyond the end of the address space")]
    fn address_past_task_size_panics() {
        let (pmm, dir) = setup();
        dir.table(&pmm, DIRECTORY_ENTRIES);
    }
}
