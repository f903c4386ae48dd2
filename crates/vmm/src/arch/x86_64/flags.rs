//! Page table entry flags for x86_64 architecture.

use x86_64::structures::paging::PageTableFlags;

/// Page table entry flags for x86_64.
///
/// This wraps the x86_64 crate's page table entry flags, providing a minimal interface for
/// the bits the memory manager reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// Mask of every bit this type understands.
    pub const MASK: u32 = (PageTableFlags::PRESENT.bits()
        | PageTableFlags::WRITABLE.bits()
        | PageTableFlags::USER_ACCESSIBLE.bits()
        | PageTableFlags::ACCESSED.bits()
        | PageTableFlags::DIRTY.bits()) as u32;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Present, writable and user-accessible: the flags of a freshly mapped user page.
    pub const fn user_page() -> Self {
        Self(PageTableFlags::from_bits_truncate(
            PageTableFlags::PRESENT.bits()
                | PageTableFlags::WRITABLE.bits()
                | PageTableFlags::USER_ACCESSIBLE.bits(),
        ))
    }

    /// Creates page flags from raw entry bits, ignoring bits outside [`Self::MASK`].
    pub const fn from_raw(raw: u32) -> Self {
        Self(PageTableFlags::from_bits_truncate((raw & Self::MASK) as u64))
    }

    /// Returns the raw bits of these flags.
    pub const fn to_raw(self) -> u32 {
        self.0.bits() as u32
    }

    pub fn is_present(self) -> bool {
        self.0.contains(PageTableFlags::PRESENT)
    }

    pub fn set_present(&mut self, present: bool) {
        self.0.set(PageTableFlags::PRESENT, present);
    }

    pub fn is_writable(self) -> bool {
        self.0.contains(PageTableFlags::WRITABLE)
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.0.set(PageTableFlags::WRITABLE, writable);
    }

    pub fn is_user(self) -> bool {
        self.0.contains(PageTableFlags::USER_ACCESSIBLE)
    }

    pub fn set_user(&mut self, user: bool) {
        self.0.set(PageTableFlags::USER_ACCESSIBLE, user);
    }

    pub fn is_accessed(self) -> bool {
        self.0.contains(PageTableFlags::ACCESSED)
    }

    pub fn set_accessed(&mut self, accessed: bool) {
        self.0.set(PageTableFlags::ACCESSED, accessed);
    }

    /// Returns whether the page has been written since it was mapped.
    pub fn is_dirty(self) -> bool {
        self.0.contains(PageTableFlags::DIRTY)
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.0.set(PageTableFlags::DIRTY, dirty);
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}
