//! Software emulation implementation for testing and development.
//!
//! This module provides an architecture that can run on any host. Page contents live in a
//! heap buffer, TLB maintenance is a no-op, and there are no interrupts to mask. The page
//! table format is the same 32-bit two-level format the hardware walks, so everything above
//! this layer behaves identically under emulation.

mod flags;

use alloc::vec::Vec;

pub use flags::PageFlags;

use crate::{PhysicalAddress, VirtualAddress, physical_memory::PageFrame};

/// Invalidates the TLB entry for `address`.
///
/// There is no TLB to maintain in software emulation.
#[inline]
pub fn flush_tlb(_address: VirtualAddress) {}

/// Invalidates the whole TLB.
#[inline]
pub fn flush_tlb_all() {}

/// Makes the page directory at `root` the active one.
///
/// # Safety
/// Always safe under emulation; the signature matches the hardware implementation.
#[inline]
pub unsafe fn activate(_root: PhysicalAddress) {}

/// Runs `f` with interrupts masked.
///
/// Software emulation never takes interrupts, so this simply calls `f`.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

/// Emulated physical memory for software simulation.
///
/// Every frame is a page-aligned [`PageFrame`], so frame `n` of the emulated machine is simply
/// `frames[n]`.
pub struct EmulatedMemory {
    frames: Vec<PageFrame>,
}

impl EmulatedMemory {
    /// Creates a new emulated memory region holding `frame_count` zeroed frames.
    pub fn new(frame_count: usize) -> Self {
        let mut frames = Vec::with_capacity(frame_count);
        frames.resize_with(frame_count, PageFrame::zeroed);
        Self { frames }
    }

    /// Returns the number of frames in the emulated memory.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the frame at `index`.
    ///
    /// # Panics
    /// Panics if `index` is past the end of emulated memory.
    pub fn frame(&self, index: usize) -> &PageFrame {
        &self.frames[index]
    }

    /// Returns the frame at `index` mutably.
    ///
    /// # Panics
    /// Panics if `index` is past the end of emulated memory.
    pub fn frame_mut(&mut self, index: usize) -> &mut PageFrame {
        &mut self.frames[index]
    }

    /// Copies frame `from` over frame `to`.
    pub fn copy_frame(&mut self, from: usize, to: usize) {
        assert_ne!(from, to, "cannot copy a frame onto itself");
        let (src, dst) = if from < to {
            let (low, high) = self.frames.split_at_mut(to);
            (&low[from], &mut high[0])
        } else {
            let (low, high) = self.frames.split_at_mut(from);
            (&high[0], &mut low[to])
        };
        dst.bytes_mut().copy_from_slice(src.bytes());
    }
}
