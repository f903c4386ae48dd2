//! Access to the contents of physical frames.
//!
//! The kernel reaches physical memory through the direct map; tests and the simulator use an
//! emulated buffer instead. Either way, frames are handed out as borrows of the
//! [`PhysicalMemory`] that owns them, so two mutable views of one frame cannot coexist.

use crate::{FrameNumber, arch::PAGE_SIZE, page_table::PageTable};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// The contents of one physical frame.
#[repr(C, align(4096))]
pub struct PageFrame([u8; PAGE_SIZE]);

impl PageFrame {
    /// Returns a zero-filled frame.
    pub const fn zeroed() -> Self {
        Self([0; PAGE_SIZE])
    }

    /// Returns the bytes of the frame.
    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.0
    }

    /// Returns the bytes of the frame mutably.
    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.0
    }

    /// Fills the frame with zeroes.
    pub fn zero(&mut self) {
        self.0.fill(0);
    }

    /// Views this frame as a page table.
    pub fn as_table(&self) -> &PageTable {
        // SAFETY: PageTable is a repr(transparent) wrapper around PageFrame.
        unsafe { &*(self as *const PageFrame as *const PageTable) }
    }

    /// Views this frame as a mutable page table.
    pub fn as_table_mut(&mut self) -> &mut PageTable {
        // SAFETY: PageTable is a repr(transparent) wrapper around PageFrame.
        unsafe { &mut *(self as *mut PageFrame as *mut PageTable) }
    }
}

/// Physical memory backing the frames the memory manager hands out.
///
/// This enum supports two modes:
/// - Hardware: frames are reached through the kernel's direct map
/// - Emulated: frames live in a host buffer (testing mode)
pub enum PhysicalMemory {
    /// Hardware memory reached through a direct-map offset.
    Hardware {
        direct_map_offset: usize,
        frame_count: usize,
    },
    /// Emulated memory backed by a host buffer.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

impl PhysicalMemory {
    /// Creates a hardware memory accessor.
    ///
    /// # Safety
    /// The caller must guarantee that every frame below `frame_count` is mapped, writable, at
    /// `direct_map_offset + frame * PAGE_SIZE` for as long as this value lives, and that no
    /// other code accesses frames it does not own through the direct map.
    pub const unsafe fn hardware(direct_map_offset: usize, frame_count: usize) -> Self {
        Self::Hardware {
            direct_map_offset,
            frame_count,
        }
    }

    /// Creates emulated memory of `frame_count` zeroed frames.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(frame_count: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(frame_count))
    }

    /// Returns the number of frames of physical memory.
    pub fn frame_count(&self) -> usize {
        match self {
            Self::Hardware { frame_count, .. } => *frame_count,
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.frame_count(),
        }
    }

    fn check(&self, frame: FrameNumber) {
        assert!(
            frame.as_usize() < self.frame_count(),
            "physical frame {frame} is beyond the end of memory"
        );
    }

    /// Returns the contents of `frame`.
    ///
    /// # Panics
    /// Panics if `frame` is beyond the end of physical memory.
    pub fn frame(&self, frame: FrameNumber) -> &PageFrame {
        self.check(frame);
        match self {
            Self::Hardware {
                direct_map_offset, ..
            } => {
                let ptr = (direct_map_offset + frame.start().as_usize()) as *const PageFrame;
                // SAFETY: Guaranteed mapped by the contract of `hardware`; shared access is
                // tied to the shared borrow of self.
                unsafe { &*ptr }
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.frame(frame.as_usize()),
        }
    }

    /// Returns the contents of `frame` mutably.
    ///
    /// # Panics
    /// Panics if `frame` is beyond the end of physical memory.
    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut PageFrame {
        self.check(frame);
        match self {
            Self::Hardware {
                direct_map_offset, ..
            } => {
                let ptr = (*direct_map_offset + frame.start().as_usize()) as *mut PageFrame;
                // SAFETY: Guaranteed mapped by the contract of `hardware`; exclusivity is tied
                // to the mutable borrow of self.
                unsafe { &mut *ptr }
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.frame_mut(frame.as_usize()),
        }
    }

    /// Returns the page table stored in `frame`.
    pub fn table(&self, frame: FrameNumber) -> &PageTable {
        self.frame(frame).as_table()
    }

    /// Returns the page table stored in `frame` mutably.
    pub fn table_mut(&mut self, frame: FrameNumber) -> &mut PageTable {
        self.frame_mut(frame).as_table_mut()
    }

    /// Copies the contents of `from` over `to`.
    ///
    /// # Panics
    /// Panics if either frame is out of range or if they are the same frame.
    pub fn copy_frame(&mut self, from: FrameNumber, to: FrameNumber) {
        self.check(from);
        self.check(to);
        assert_ne!(from, to, "cannot copy a frame onto itself");
        match self {
            Self::Hardware {
                direct_map_offset, ..
            } => {
                let src = (*direct_map_offset + from.start().as_usize()) as *const u8;
                let dst = (*direct_map_offset + to.start().as_usize()) as *mut u8;
                // SAFETY: Both frames are mapped and distinct, so the ranges do not overlap.
                unsafe { core::ptr::copy_nonoverlapping(src, dst, PAGE_SIZE) }
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(mem) => mem.copy_frame(from.as_usize(), to.as_usize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulated_frames_start_zeroed() {
        let memory = PhysicalMemory::emulated(4);
        assert_eq!(memory.frame_count(), 4);
        assert!(memory.frame(FrameNumber::new(3)).bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_frame_duplicates_content() {
        let mut memory = PhysicalMemory::emulated(4);
        memory.frame_mut(FrameNumber::new(1)).bytes_mut()[10] = 0xAB;
        memory.copy_frame(FrameNumber::new(1), FrameNumber::new(3));
        assert_eq!(memory.frame(FrameNumber::new(3)).bytes()[10], 0xAB);

        memory.frame_mut(FrameNumber::new(3)).bytes_mut()[0] = 0xCD;
        memory.copy_frame(FrameNumber::new(3), FrameNumber::new(0));
        assert_eq!(memory.frame(FrameNumber::new(0)).bytes()[0], 0xCD);
    }

    #[test]
    #[should_panic(expected = "beyond the end of memory")]
    fn out_of_range_frame_panics() {
        let memory = PhysicalMemory::emulated(2);
        memory.frame(FrameNumber::new(2));
    }

    #[test]
    fn frames_are_page_aligned() {
        let memory = PhysicalMemory::emulated(2);
        let ptr = memory.frame(FrameNumber::new(1)) as *const PageFrame as usize;
        assert_eq!(ptr % PAGE_SIZE, 0);
    }
}
