//! Physical page allocator.
//!
//! This module provides the page allocator for the virtual memory manager, based on the
//! classic Unix design: every frame between the kernel floor and the end of memory has a use
//! count in the [`PageReferences`] table, allocation searches that table for a free entry, and
//! a frame returns to the free pool only when its last reference is dropped.
//!
//! The allocator does not evict anything itself. Reclaiming memory under pressure is the job
//! of the swap subsystem, which the [`VirtualMemoryManager`](crate::VirtualMemoryManager)
//! runs when this allocator reports [`AllocError::OutOfMemory`].

use core::fmt;

use crate::{
    FrameNumber,
    frame::PageReferences,
    page_table::PageTable,
    physical_memory::{PageFrame, PhysicalMemory},
};

/// Errors that can occur during allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No free physical page, even after trying to reclaim one.
    OutOfMemory,
    /// Every address space slot is in use.
    AddressSpaceLimit,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::AddressSpaceLimit => write!(f, "too many address spaces"),
        }
    }
}

/// Physical page allocator over a block of physical memory.
///
/// Frames below the kernel floor belong to the kernel image: they are never handed out, are
/// not reference counted, and freeing them is silently ignored.
pub struct PhysicalMemoryManager {
    memory: PhysicalMemory,
    references: PageReferences,
}

impl PhysicalMemoryManager {
    /// Creates a new page allocator managing every frame of `memory` from `floor` upwards.
    ///
    /// # Panics
    /// Panics if `floor` lies beyond the end of `memory`.
    pub fn new(memory: PhysicalMemory, floor: FrameNumber) -> Self {
        let end = FrameNumber::new(memory.frame_count());
        let references = PageReferences::new(floor, end);
        log::debug!(
            "page allocator: {} frames managed above floor {}",
            references.len(),
            floor
        );
        Self { memory, references }
    }

    /// Allocates a single zero-filled frame with a use count of one.
    ///
    /// Searches from the top of memory downwards.
    pub fn allocate(&mut self) -> Result<FrameNumber, AllocError> {
        let frame = self.references.claim_free().ok_or(AllocError::OutOfMemory)?;
        self.memory.frame_mut(frame).zero();
        log::trace!("allocated frame {frame}");
        Ok(frame)
    }

    /// Drops one reference to `frame`, returning it to the free pool when none remain.
    ///
    /// # Panics
    /// Panics if `frame` is beyond the end of physical memory, or if it is already free.
    pub fn free(&mut self, frame: FrameNumber) {
        if frame < self.references.floor() {
            return;
        }
        if frame >= self.references.end() {
            panic!("trying to free nonexistent page {frame}");
        }
        if self.references.decrement(frame) == 0 {
            log::trace!("freed frame {frame}");
        }
    }

    /// Adds a reference to a managed frame.
    ///
    /// # Panics
    /// Panics if `frame` is unmanaged or free.
    pub fn share(&mut self, frame: FrameNumber) {
        self.references.increment(frame);
    }

    /// Returns the use count of `frame`, or `None` below the floor or past the end of memory.
    pub fn reference_count(&self, frame: FrameNumber) -> Option<u16> {
        self.references.count(frame)
    }

    /// Returns whether `frame` is handed out by this allocator.
    pub fn is_managed(&self, frame: FrameNumber) -> bool {
        self.references.is_managed(frame)
    }

    /// Returns the first managed frame.
    pub fn floor(&self) -> FrameNumber {
        self.references.floor()
    }

    /// Returns the page reference table.
    pub fn references(&self) -> &PageReferences {
        &self.references
    }

    /// Returns the number of managed frames.
    pub fn total_frames(&self) -> usize {
        self.references.len()
    }

    /// Returns the number of free frames.
    pub fn free_frames(&self) -> usize {
        self.references.free_count()
    }

    /// Returns the contents of `frame`.
    pub fn frame(&self, frame: FrameNumber) -> &PageFrame {
        self.memory.frame(frame)
    }

    /// Returns the contents of `frame` mutably.
    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut PageFrame {
        self.memory.frame_mut(frame)
    }

    /// Returns the page table stored in `frame`.
    pub fn table(&self, frame: FrameNumber) -> &PageTable {
        self.memory.table(frame)
    }

    /// Returns the page table stored in `frame` mutably.
    pub fn table_mut(&mut self, frame: FrameNumber) -> &mut PageTable {
        self.memory.table_mut(frame)
    }

    /// Copies the contents of `from` over `to`.
    pub fn copy_frame(&mut self, from: FrameNumber, to: FrameNumber) {
        self.memory.copy_frame(from, to);
    }
}
