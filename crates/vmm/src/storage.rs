//! The block storage the memory manager pages against.
//!
//! The buffer cache and file system live outside this crate. The memory manager only needs
//! to translate image offsets into device blocks, read a page worth of blocks, and move whole
//! pages to and from the swap device.

use core::fmt;

use crate::{
    config::BLOCKS_PER_PAGE,
    image::{BlockNumber, DeviceId, ImageHandle},
    physical_memory::PageFrame,
    swap::SwapSlot,
};

/// Errors reported by the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The device does not exist.
    NoDevice,
    /// The block or slot lies past the end of the device.
    OutOfRange,
    /// The device failed the transfer.
    Device,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "no such device"),
            Self::OutOfRange => write!(f, "block out of range"),
            Self::Device => write!(f, "device I/O error"),
        }
    }
}

/// Block storage used for demand loading and swapping.
pub trait Storage {
    /// Maps a logical block of `image` to a device block, or `None` for a hole or a block
    /// past the end of the file.
    fn map_file_offset_to_block(&mut self, image: ImageHandle, logical: u32)
    -> Option<BlockNumber>;

    /// Reads one page worth of blocks from `device` into `page`.
    ///
    /// Each quarter of the page is filled from the corresponding block; `None` entries leave
    /// that quarter untouched.
    fn read_block_range(
        &mut self,
        device: DeviceId,
        blocks: [Option<BlockNumber>; BLOCKS_PER_PAGE],
        page: &mut PageFrame,
    ) -> Result<(), IoError>;

    /// Returns the size of the swap device in pages, or zero when there is none.
    fn swap_device_pages(&self) -> usize;

    /// Reads swap slot `slot` into `page`.
    fn read_swap_slot(&mut self, slot: SwapSlot, page: &mut PageFrame) -> Result<(), IoError>;

    /// Writes `page` to swap slot `slot`.
    fn write_swap_slot(&mut self, slot: SwapSlot, page: &PageFrame) -> Result<(), IoError>;
}
