//! In-memory block storage for tests and the simulator.
//!
//! Disks are flat arrays of blocks. Images are written contiguously onto a disk behind a
//! one-block executable header, and the swap area is a separate array of pages that can be
//! formatted the way `mkswap` would.

use alloc::{collections::BTreeMap, vec::Vec};

use crate::{
    arch::PAGE_SIZE,
    config::{BLOCK_SIZE, BLOCKS_PER_PAGE, IMAGE_HEADER_BLOCKS},
    image::{BlockNumber, DeviceId, ImageHandle},
    physical_memory::PageFrame,
    storage::{IoError, Storage},
    swap::{SIGNATURE_OFFSET, SWAP_BITS, SWAP_SIGNATURE, SwapSlot},
};

/// Magic number of a demand-paged executable header.
const ZMAGIC: u32 = 0o413;

struct Disk {
    data: Vec<u8>,
    next_free: u32,
}

impl Disk {
    fn block_count(&self) -> usize {
        self.data.len() / BLOCK_SIZE
    }

    fn block(&self, block: BlockNumber) -> Result<&[u8], IoError> {
        let index = block.0 as usize;
        if index >= self.block_count() {
            return Err(IoError::OutOfRange);
        }
        Ok(&self.data[index * BLOCK_SIZE..(index + 1) * BLOCK_SIZE])
    }
}

#[derive(Clone, Copy)]
struct Extent {
    first: BlockNumber,
    blocks: u32,
}

/// Storage backed by host memory.
#[derive(Default)]
pub struct MemoryStorage {
    disks: BTreeMap<DeviceId, Disk>,
    images: BTreeMap<ImageHandle, Extent>,
    swap: Vec<u8>,
    fail_reads: bool,
    fail_swap_writes: bool,
    block_reads: usize,
    swap_reads: usize,
    swap_writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a zeroed disk of `blocks` blocks as `device`.
    ///
    /// Block zero is the boot block and is never handed to an image.
    pub fn add_disk(&mut self, device: DeviceId, blocks: usize) {
        let mut data = Vec::new();
        data.resize(blocks * BLOCK_SIZE, 0);
        self.disks.insert(device, Disk { data, next_free: 1 });
    }

    /// Writes an executable image with the given body onto `device` and returns its handle.
    ///
    /// The body starts right after the header block, so body offset `n` is the byte the
    /// process sees at linear address `n`.
    pub fn add_image(
        &mut self,
        device: DeviceId,
        inode: u32,
        body: &[u8],
    ) -> Result<ImageHandle, IoError> {
        let disk = self.disks.get_mut(&device).ok_or(IoError::NoDevice)?;
        let blocks = (IMAGE_HEADER_BLOCKS + body.len().div_ceil(BLOCK_SIZE)) as u32;
        let first = disk.next_free;
        if (first + blocks) as usize > disk.block_count() {
            return Err(IoError::OutOfRange);
        }
        disk.next_free += blocks;

        let start = first as usize * BLOCK_SIZE;
        disk.data[start..start + 4].copy_from_slice(&ZMAGIC.to_le_bytes());
        let body_start = start + IMAGE_HEADER_BLOCKS * BLOCK_SIZE;
        disk.data[body_start..body_start + body.len()].copy_from_slice(body);

        let handle = ImageHandle::new(device, inode);
        self.images.insert(
            handle,
            Extent {
                first: BlockNumber(first),
                blocks,
            },
        );
        log::debug!("image {handle}: {blocks} blocks at block {first}");
        Ok(handle)
    }

    /// Replaces the swap area with `pages` zeroed pages. The area is unformatted.
    pub fn set_swap_area(&mut self, pages: usize) {
        self.swap.clear();
        self.swap.resize(pages * PAGE_SIZE, 0);
    }

    /// Writes a fresh swap bitmap and signature to slot zero.
    ///
    /// Slots `1..=usable_slots` are marked free; any further slots on the device are left
    /// marked in use, the way bad pages are.
    pub fn format_swap_area(&mut self, usable_slots: usize) {
        let pages = self.swap.len() / PAGE_SIZE;
        if pages == 0 {
            return;
        }
        let bitmap = &mut self.swap[..PAGE_SIZE];
        bitmap.fill(0);
        let last = usable_slots.min(pages - 1).min(SWAP_BITS - 1);
        for slot in 1..=last {
            bitmap[slot >> 3] |= 1 << (slot & 7);
        }
        bitmap[SIGNATURE_OFFSET..].copy_from_slice(SWAP_SIGNATURE);
    }

    /// Makes every block read fail.
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Makes every swap write fail.
    pub fn set_fail_swap_writes(&mut self, fail: bool) {
        self.fail_swap_writes = fail;
    }

    /// Number of page-sized block reads served.
    pub fn block_reads(&self) -> usize {
        self.block_reads
    }

    /// Number of swap slots read.
    pub fn swap_reads(&self) -> usize {
        self.swap_reads
    }

    /// Number of swap slots written.
    pub fn swap_writes(&self) -> usize {
        self.swap_writes
    }

    /// Returns the raw contents of a swap slot.
    pub fn swap_slot(&self, slot: SwapSlot) -> Option<&[u8]> {
        let start = slot.as_usize() * PAGE_SIZE;
        self.swap.get(start..start + PAGE_SIZE)
    }

    fn swap_range(&self, slot: SwapSlot) -> Result<core::ops::Range<usize>, IoError> {
        let start = slot.as_usize() * PAGE_SIZE;
        if start + PAGE_SIZE > self.swap.len() {
            return Err(IoError::OutOfRange);
        }
        Ok(start..start + PAGE_SIZE)
    }
}

impl Storage for MemoryStorage {
    fn map_file_offset_to_block(
        &mut self,
        image: ImageHandle,
        logical: u32,
    ) -> Option<BlockNumber> {
        let extent = self.images.get(&image)?;
        (logical < extent.blocks).then(|| BlockNumber(extent.first.0 + logical))
    }

    fn read_block_range(
        &mut self,
        device: DeviceId,
        blocks: [Option<BlockNumber>; BLOCKS_PER_PAGE],
        page: &mut PageFrame,
    ) -> Result<(), IoError> {
        if self.fail_reads {
            return Err(IoError::Device);
        }
        let disk = self.disks.get(&device).ok_or(IoError::NoDevice)?;
        for (quarter, block) in blocks.iter().enumerate() {
            let Some(block) = block else {
                continue;
            };
            let offset = quarter * BLOCK_SIZE;
            page.bytes_mut()[offset..offset + BLOCK_SIZE].copy_from_slice(disk.block(*block)?);
        }
        self.block_reads += 1;
        Ok(())
    }

    fn swap_device_pages(&self) -> usize {
        self.swap.len() / PAGE_SIZE
    }

    fn read_swap_slot(&mut self, slot: SwapSlot, page: &mut PageFrame) -> Result<(), IoError> {
        if self.fail_reads {
            return Err(IoError::Device);
        }
        let range = self.swap_range(slot)?;
        page.bytes_mut().copy_from_slice(&self.swap[range]);
        self.swap_reads += 1;
        Ok(())
    }

    fn write_swap_slot(&mut self, slot: SwapSlot, page: &PageFrame) -> Result<(), IoError> {
        if self.fail_swap_writes {
            return Err(IoError::Device);
        }
        let range = self.swap_range(slot)?;
        self.swap[range].copy_from_slice(page.bytes());
        self.swap_writes += 1;
        Ok(())
    }
}
