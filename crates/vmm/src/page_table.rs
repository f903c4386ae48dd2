//! Page table entries and the page table view over a frame.
//!
//! Entries use the 32-bit two-level format: a resident entry holds a frame number in bits
//! 12-31 plus flags in the low bits, a swapped entry holds a swap slot number shifted left by
//! one so that the present bit stays clear, and an absent entry is zero.

use crate::{
    FrameNumber,
    arch::{PAGE_SHIFT, PageFlags},
    config::ENTRIES_PER_TABLE,
    physical_memory::PageFrame,
    swap::SwapSlot,
};

/// A single page table (or page directory) entry.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

/// The three states a page table entry can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteState {
    /// Never touched, or unmapped.
    Absent,
    /// Evicted to the swap slot.
    Swapped(SwapSlot),
    /// Backed by a physical frame.
    Resident { frame: FrameNumber, flags: PageFlags },
}

impl PageEntry {
    /// Frame address bits (12-31).
    const FRAME_MASK: u32 = 0xFFFF_F000;

    /// The absent entry.
    pub const EMPTY: Self = Self(0);

    /// Creates a resident entry mapping `frame` with `flags`.
    ///
    /// The present bit is always set.
    ///
    /// # Panics
    /// Panics if the frame does not fit in the 20-bit frame field.
    pub fn resident(frame: FrameNumber, flags: PageFlags) -> Self {
        let raw_frame = u32::try_from(frame.as_usize() << PAGE_SHIFT)
            .ok()
            .filter(|bits| bits >> PAGE_SHIFT == frame.as_usize() as u32);
        let Some(frame_bits) = raw_frame else {
            panic!("frame {frame} does not fit in a page table entry");
        };
        let mut flags = flags;
        flags.set_present(true);
        Self(frame_bits | flags.to_raw())
    }

    /// Creates a swapped entry referring to `slot`.
    pub fn swapped(slot: SwapSlot) -> Self {
        Self(slot.as_u32() << 1)
    }

    /// Decodes the entry into its state.
    pub fn state(self) -> PteState {
        if self.0 == 0 {
            PteState::Absent
        } else if self.is_present() {
            PteState::Resident {
                frame: self.frame_unchecked(),
                flags: self.flags(),
            }
        } else {
            PteState::Swapped(SwapSlot::new(self.0 >> 1))
        }
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Returns whether the entry is all zero.
    pub fn is_absent(self) -> bool {
        self.0 == 0
    }

    /// Returns the mapped frame if the entry is resident.
    pub fn frame(self) -> Option<FrameNumber> {
        self.is_present().then(|| self.frame_unchecked())
    }

    fn frame_unchecked(self) -> FrameNumber {
        FrameNumber::new(((self.0 & Self::FRAME_MASK) >> PAGE_SHIFT) as usize)
    }

    /// Returns the flag bits of the entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0)
    }

    /// Replaces the flags of a resident entry, preserving the frame.
    ///
    /// # Panics
    /// Panics if the entry is not resident: flags of swapped entries are slot bits.
    pub fn set_flags(&mut self, flags: PageFlags) {
        assert!(self.is_present(), "cannot set flags on a non-resident entry");
        self.0 = (self.0 & Self::FRAME_MASK) | flags.to_raw();
    }

    /// Returns a copy of this resident entry with the writable bit cleared.
    pub fn write_protected(self) -> Self {
        let mut entry = self;
        let mut flags = entry.flags();
        flags.set_writable(false);
        entry.set_flags(flags);
        entry
    }

    /// Returns the raw bits of the entry.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Creates an entry from raw bits.
    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }
}

impl core::fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.state() {
            PteState::Absent => write!(f, "PageEntry(absent)"),
            PteState::Swapped(slot) => write!(f, "PageEntry(swapped {slot})"),
            PteState::Resident { frame, flags } => {
                write!(f, "PageEntry({frame} flags={:#x})", flags.to_raw())
            }
        }
    }
}

/// A page table: 1024 entries stored in one physical frame.
///
/// Page directories share the format; their entries map page table frames.
#[repr(transparent)]
pub struct PageTable(PageFrame);

impl PageTable {
    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry(&self, index: usize) -> PageEntry {
        let bytes = &self.0.bytes()[Self::byte_range(index)];
        PageEntry(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Replaces the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn set_entry(&mut self, index: usize, entry: PageEntry) {
        self.0.bytes_mut()[Self::byte_range(index)].copy_from_slice(&entry.0.to_ne_bytes());
    }

    fn byte_range(index: usize) -> core::ops::Range<usize> {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        let start = index * core::mem::size_of::<u32>();
        start..start + core::mem::size_of::<u32>()
    }

    /// Iterates over `(index, entry)` pairs of the first `limit` entries.
    pub fn entries(&self, limit: usize) -> impl Iterator<Item = (usize, PageEntry)> + '_ {
        (0..limit.min(ENTRIES_PER_TABLE)).map(|index| (index, self.entry(index)))
    }

    /// Returns the number of entries in a page table.
    pub const fn len(&self) -> usize {
        ENTRIES_PER_TABLE
    }

    /// Returns whether every entry is absent.
    pub fn is_empty(&self) -> bool {
        self.0.bytes().iter().all(|&b| b == 0)
    }

    /// Sets every entry to absent.
    pub fn clear(&mut self) {
        self.0.zero();
    }
}
