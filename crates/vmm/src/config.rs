//! Layout constants and runtime configuration.

use crate::{
    FrameNumber,
    arch::{PAGE_SHIFT, PAGE_SIZE},
};

/// Number of entries in a page table (and in a page directory).
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes of linear address space covered by one page table: 4 MiB.
///
/// Range operations on address spaces must be aligned to this granularity.
pub const TABLE_SPAN: usize = ENTRIES_PER_TABLE * PAGE_SIZE;

/// Size of every address space: 64 MiB.
pub const TASK_SIZE: usize = 64 * 1024 * 1024;

/// Number of page directory entries an address space uses.
pub const DIRECTORY_ENTRIES: usize = TASK_SIZE / TABLE_SPAN;

/// Size of the region reserved for the shared library at the top of each address space.
pub const LIBRARY_SIZE: usize = 4 * 1024 * 1024;

/// Linear address where the shared library region starts.
pub const LIBRARY_OFFSET: usize = TASK_SIZE - LIBRARY_SIZE;

/// Entries copied out of each kernel page table when duplicating the kernel address space.
///
/// 160 pages cover the 640 KiB kernel/init footprint.
pub const KERNEL_COPY_ENTRIES: usize = 160;

/// Frames reachable through the 20-bit frame field of a page table entry: 4 GiB of memory.
pub const MAX_FRAMES: usize = 1 << (32 - PAGE_SHIFT);

/// Size of a file-system block.
pub const BLOCK_SIZE: usize = 1024;

/// File-system blocks per page.
pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_SIZE;

/// Blocks taken by the executable header at the start of an image.
pub const IMAGE_HEADER_BLOCKS: usize = 1;

/// Default maximum number of simultaneously live address spaces (including the kernel's).
pub const DEFAULT_MAX_ADDRESS_SPACES: usize = 64;

/// Runtime configuration of a [`VirtualMemoryManager`](crate::VirtualMemoryManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// First frame managed by the page allocator. Frames below it belong to the kernel: they
    /// are never allocated, never reference counted and freeing them is a no-op.
    pub kernel_floor: FrameNumber,
    /// Pages of kernel footprint identity-mapped into the kernel address space.
    pub kernel_footprint_pages: usize,
    /// Maximum number of live address spaces, the kernel's included.
    pub max_address_spaces: usize,
}

impl VmConfig {
    /// Creates a configuration with the kernel floor at `kernel_floor` and defaults elsewhere.
    pub const fn new(kernel_floor: FrameNumber) -> Self {
        Self {
            kernel_floor,
            kernel_footprint_pages: KERNEL_COPY_ENTRIES,
            max_address_spaces: DEFAULT_MAX_ADDRESS_SPACES,
        }
    }

    /// Overrides the number of identity-mapped kernel footprint pages.
    pub const fn with_kernel_footprint(mut self, pages: usize) -> Self {
        self.kernel_footprint_pages = pages;
        self
    }

    /// Overrides the maximum number of live address spaces.
    pub const fn with_max_address_spaces(mut self, count: usize) -> Self {
        self.max_address_spaces = count;
        self
    }
}
