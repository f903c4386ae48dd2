//! Swap space management.
//!
//! The swap device is an array of page-sized slots. Slot zero holds a bitmap of free slots
//! (bit set = free) with the `SWAP-SPACE` signature in its last ten bytes; every other slot
//! holds one evicted page. Each slot in use carries a reference count so that copying an
//! address space can share a swapped entry instead of reading it back first.
//!
//! Eviction walks every page table of every process address space in round-robin order,
//! resuming where the previous sweep stopped.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use crate::{
    FrameNumber, PhysicalMemoryManager, VirtualAddress,
    address_space::{AddressSpaces, SpaceId},
    arch::PAGE_SIZE,
    config::{BLOCKS_PER_PAGE, DIRECTORY_ENTRIES, ENTRIES_PER_TABLE},
    page_table::{PageEntry, PteState},
    physical_memory::PageFrame,
    storage::{IoError, Storage},
};

/// Number of slots the bitmap page can describe.
pub const SWAP_BITS: usize = PAGE_SIZE * 8;

/// Signature stored at the end of the bitmap slot.
pub const SWAP_SIGNATURE: &[u8; 10] = b"SWAP-SPACE";

/// Byte offset of the signature within the bitmap slot.
pub const SIGNATURE_OFFSET: usize = PAGE_SIZE - SWAP_SIGNATURE.len();

/// Smallest usable swap device, in blocks.
const MIN_SWAP_BLOCKS: usize = 100;

/// A slot number on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(u32);

impl SwapSlot {
    /// The slot holding the bitmap.
    pub const BITMAP: Self = Self(0);

    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Reasons a swap device is rejected at initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    NoDevice,
    TooSmall { blocks: usize },
    MissingSignature,
    BadBitmap,
    NoFreeSlots,
    Io(IoError),
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no swap device"),
            Self::TooSmall { blocks } => write!(f, "swap device too small ({blocks} blocks)"),
            Self::MissingSignature => write!(f, "unable to find swap-space signature"),
            Self::BadBitmap => write!(f, "bad swap-space bit-map"),
            Self::NoFreeSlots => write!(f, "swap device has no free pages"),
            Self::Io(err) => write!(f, "unable to read swap bit-map: {err}"),
        }
    }
}

/// Free and total swap slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapStatus {
    pub enabled: bool,
    pub free: usize,
    pub total: usize,
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.enabled {
            write!(f, "Swap: {} free pages of {}", self.free, self.total)
        } else {
            write!(f, "Swap: disabled")
        }
    }
}

/// The loaded swap bitmap plus per-slot reference counts.
struct SwapArea {
    bitmap: Box<PageFrame>,
    slots: usize,
    usable: usize,
    references: Vec<u16>,
}

impl SwapArea {
    fn bit(&self, slot: usize) -> bool {
        self.bitmap.bytes()[slot >> 3] & (1 << (slot & 7)) != 0
    }

    fn set_bit(&mut self, slot: usize, free: bool) {
        let byte = &mut self.bitmap.bytes_mut()[slot >> 3];
        if free {
            *byte |= 1 << (slot & 7);
        } else {
            *byte &= !(1 << (slot & 7));
        }
    }
}

/// Outcome of looking at one page table entry during a sweep.
enum Eviction {
    /// The frame went back to the free pool.
    Evicted,
    /// The mapping was dropped but another address space still holds the frame.
    Unmapped,
    Skipped,
}

/// Owner of the swap bitmap and the eviction cursor.
pub struct SwapManager {
    area: Option<SwapArea>,
    cursor: usize,
}

impl SwapManager {
    /// Creates a manager with swapping disabled. Clean pages can still be reclaimed.
    pub const fn disabled() -> Self {
        Self {
            area: None,
            cursor: 0,
        }
    }

    /// Loads and validates the bitmap of the swap device.
    ///
    /// Failures are logged and leave swapping disabled.
    pub fn init<S: Storage>(storage: &mut S) -> Self {
        match Self::load(storage) {
            Ok(area) => {
                log::info!(
                    "swap device ok: {} pages ({} bytes) swap-space",
                    area.usable,
                    area.usable * PAGE_SIZE
                );
                Self {
                    area: Some(area),
                    cursor: 0,
                }
            }
            Err(SwapError::NoDevice) => {
                log::info!("no swap device, dirty pages stay resident");
                Self::disabled()
            }
            Err(err) => {
                log::warn!("{err}");
                Self::disabled()
            }
        }
    }

    fn load<S: Storage>(storage: &mut S) -> Result<SwapArea, SwapError> {
        let pages = storage.swap_device_pages();
        if pages == 0 {
            return Err(SwapError::NoDevice);
        }
        let blocks = pages * BLOCKS_PER_PAGE;
        if blocks < MIN_SWAP_BLOCKS {
            return Err(SwapError::TooSmall { blocks });
        }
        let slots = pages.min(SWAP_BITS);

        let mut bitmap = Box::new(PageFrame::zeroed());
        storage
            .read_swap_slot(SwapSlot::BITMAP, &mut bitmap)
            .map_err(SwapError::Io)?;
        if &bitmap.bytes()[SIGNATURE_OFFSET..] != SWAP_SIGNATURE {
            return Err(SwapError::MissingSignature);
        }
        bitmap.bytes_mut()[SIGNATURE_OFFSET..].fill(0);

        let mut area = SwapArea {
            bitmap,
            slots,
            usable: 0,
            references: Vec::new(),
        };
        if area.bit(0) || (slots..SWAP_BITS).any(|slot| area.bit(slot)) {
            return Err(SwapError::BadBitmap);
        }
        area.usable = (1..slots).filter(|&slot| area.bit(slot)).count();
        if area.usable == 0 {
            return Err(SwapError::NoFreeSlots);
        }
        area.references.resize(slots, 0);
        Ok(area)
    }

    /// Returns whether a swap device is in use.
    pub fn is_enabled(&self) -> bool {
        self.area.is_some()
    }

    /// Returns the free and total slot counts.
    pub fn status(&self) -> SwapStatus {
        match &self.area {
            Some(area) => SwapStatus {
                enabled: true,
                free: (1..area.slots).filter(|&slot| area.bit(slot)).count(),
                total: area.usable,
            },
            None => SwapStatus {
                enabled: false,
                free: 0,
                total: 0,
            },
        }
    }

    /// Returns whether `slot` is marked free in the bitmap.
    pub fn is_free(&self, slot: SwapSlot) -> bool {
        self.area
            .as_ref()
            .is_some_and(|area| slot.as_usize() < area.slots && area.bit(slot.as_usize()))
    }

    /// Returns the number of references held on `slot`.
    pub fn reference_count(&self, slot: SwapSlot) -> u16 {
        self.area
            .as_ref()
            .and_then(|area| area.references.get(slot.as_usize()).copied())
            .unwrap_or(0)
    }

    /// Takes the lowest free slot, with one reference.
    pub fn allocate_slot(&mut self) -> Option<SwapSlot> {
        let area = self.area.as_mut()?;
        let slot = (1..area.slots).find(|&slot| area.bit(slot))?;
        area.set_bit(slot, false);
        area.references[slot] = 1;
        Some(SwapSlot(slot as u32))
    }

    fn checked_slot<'a>(
        area: Option<&'a mut SwapArea>,
        slot: SwapSlot,
    ) -> (&'a mut SwapArea, usize) {
        let Some(area) = area else {
            panic!("swap {slot} referenced without a swap device");
        };
        let index = slot.as_usize();
        assert!(index != 0, "no swap page in swap slot 0");
        assert!(index < area.slots, "swap {slot} is beyond the swap device");
        assert!(!area.bit(index), "swap-space bad: {slot} is already free");
        (area, index)
    }

    /// Adds a reference to a slot in use.
    ///
    /// # Panics
    /// Panics if the slot is zero, out of range or free.
    pub fn duplicate(&mut self, slot: SwapSlot) {
        let (area, index) = Self::checked_slot(self.area.as_mut(), slot);
        let count = &mut area.references[index];
        *count = count
            .checked_add(1)
            .unwrap_or_else(|| panic!("reference count overflow on swap {slot}"));
    }

    /// Drops a reference to `slot`, marking it free when none remain.
    ///
    /// # Panics
    /// Panics if the slot is zero, out of range or already free.
    pub fn release(&mut self, slot: SwapSlot) {
        let (area, index) = Self::checked_slot(self.area.as_mut(), slot);
        area.references[index] -= 1;
        if area.references[index] == 0 {
            area.set_bit(index, true);
        }
    }

    /// Reads `slot` into `page` and drops the caller's reference to it.
    ///
    /// On an I/O error the reference is kept and the entry stays swapped.
    ///
    /// # Panics
    /// Panics if the slot is zero, out of range or free.
    pub fn read_in<S: Storage>(
        &mut self,
        storage: &mut S,
        slot: SwapSlot,
        page: &mut PageFrame,
    ) -> Result<(), IoError> {
        Self::checked_slot(self.area.as_mut(), slot);
        storage.read_swap_slot(slot, page)?;
        self.release(slot);
        Ok(())
    }

    /// Evicts one page from some process address space.
    ///
    /// Resumes the sweep at the cursor and gives up after one full pass over every process
    /// page table slot. Returns whether a frame was released. Clean pages another address
    /// space still maps are unmapped on the way without ending the sweep.
    pub fn swap_out<S: Storage>(
        &mut self,
        pmm: &mut PhysicalMemoryManager,
        spaces: &AddressSpaces,
        storage: &mut S,
    ) -> bool {
        let tables = spaces.capacity().saturating_sub(1) * DIRECTORY_ENTRIES;
        let positions = tables * ENTRIES_PER_TABLE;
        let mut remaining = positions;

        while remaining > 0 {
            let position = self.cursor % positions;
            let table_index = position / ENTRIES_PER_TABLE;
            let entry_index = position % ENTRIES_PER_TABLE;
            let space = SpaceId::new(1 + table_index / DIRECTORY_ENTRIES);
            let directory_index = table_index % DIRECTORY_ENTRIES;

            let table = spaces
                .directory(space)
                .and_then(|directory| directory.table(pmm, directory_index));
            let Some(table) = table else {
                let skip = ENTRIES_PER_TABLE - entry_index;
                self.cursor = (position + skip) % positions;
                remaining = remaining.saturating_sub(skip);
                continue;
            };

            self.cursor = (position + 1) % positions;
            remaining -= 1;
            let address = VirtualAddress::from_indices(directory_index, entry_index);
            match self.try_to_swap_out(pmm, storage, table, entry_index) {
                Eviction::Evicted => {
                    spaces.invalidate(space, address);
                    log::trace!("evicted page {address} of address space {space}");
                    return true;
                }
                Eviction::Unmapped => {
                    spaces.invalidate(space, address);
                    log::trace!("dropped shared page {address} of address space {space}");
                }
                Eviction::Skipped => {}
            }
        }

        log::warn!("out of swap memory");
        false
    }

    fn try_to_swap_out<S: Storage>(
        &mut self,
        pmm: &mut PhysicalMemoryManager,
        storage: &mut S,
        table: FrameNumber,
        index: usize,
    ) -> Eviction {
        let PteState::Resident { frame, flags } = pmm.table(table).entry(index).state() else {
            return Eviction::Skipped;
        };
        if !pmm.is_managed(frame) {
            return Eviction::Skipped;
        }

        if flags.is_dirty() {
            if pmm.reference_count(frame) != Some(1) {
                return Eviction::Skipped;
            }
            let Some(slot) = self.allocate_slot() else {
                return Eviction::Skipped;
            };
            if let Err(err) = storage.write_swap_slot(slot, pmm.frame(frame)) {
                log::error!("failed to write frame {frame} to swap {slot}: {err}");
                self.release(slot);
                return Eviction::Skipped;
            }
            pmm.table_mut(table).set_entry(index, PageEntry::swapped(slot));
        } else {
            pmm.table_mut(table).set_entry(index, PageEntry::EMPTY);
        }
        pmm.free(frame);
        if pmm.reference_count(frame) == Some(0) {
            Eviction::Evicted
        } else {
            Eviction::Unmapped
        }
    }
}
