#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Virtual Memory Manager (VMM)
//!
//! The virtual memory core of a small single-CPU Unix kernel. It provides:
//!
//! - A reference-counted page allocator over the frames above the kernel floor.
//! - Two-level 32-bit page tables, one directory per address space.
//! - Copy-on-write address space duplication and write-protect fault handling.
//! - Demand paging from executable and library images, with sharing of clean pages between
//!   processes running the same image.
//! - A swap device with a free-slot bitmap and round-robin eviction.
//! - Software emulation for testing in non-kernel environments.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod config;
mod fault;
mod frame;
mod image;
mod locked;
mod manager;
mod mapper;
#[cfg(any(test, feature = "software-emulation"))]
mod memory_storage;
mod numbers;
mod page_directory;
mod page_table;
mod physical_memory;
mod physical_memory_manager;
#[cfg(test)]
mod scenarios;
mod storage;
mod summary;
mod swap;
mod uaccess;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, AddressSpaces, SpaceId};
pub use config::{
    BLOCK_SIZE, BLOCKS_PER_PAGE, DEFAULT_MAX_ADDRESS_SPACES, DIRECTORY_ENTRIES,
    ENTRIES_PER_TABLE, IMAGE_HEADER_BLOCKS, KERNEL_COPY_ENTRIES, LIBRARY_OFFSET, LIBRARY_SIZE,
    MAX_FRAMES, TABLE_SPAN, TASK_SIZE, VmConfig,
};
pub use fault::{FaultError, FaultKind, Signal};
pub use frame::PageReferences;
pub use image::{Backing, BlockNumber, DeviceId, ImageHandle, ImageRole, ProcessLayout};
pub use locked::LockedVmm;
pub use manager::VirtualMemoryManager;
#[cfg(any(test, feature = "software-emulation"))]
pub use memory_storage::MemoryStorage;
pub use numbers::FrameNumber;
pub use page_directory::PageDirectory;
pub use page_table::{PageEntry, PageTable, PteState};
pub use physical_memory::{PageFrame, PhysicalMemory};
pub use physical_memory_manager::{AllocError, PhysicalMemoryManager};
pub use storage::{IoError, Storage};
pub use summary::{MemorySummary, SpaceUsage};
pub use swap::{SWAP_SIGNATURE, SwapError, SwapManager, SwapSlot, SwapStatus};

pub use arch::{PAGE_SHIFT, PAGE_SIZE, PageFlags};
