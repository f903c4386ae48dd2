//! Physical frame numbers.

use core::{
    fmt,
    ops::{Add, Sub},
};

use crate::{address::PhysicalAddress, arch};

/// A physical memory frame number.
///
/// Frame numbers index the page reference table and are stored in bits 12-31 of a resident
/// page table entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << arch::PAGE_SHIFT)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(address: PhysicalAddress) -> Self {
        address.frame_number()
    }
}

impl Add<usize> for FrameNumber {
    type Output = Self;

    #[inline]
    fn add(self, frames: usize) -> Self {
        Self(self.0 + frames)
    }
}

/// The distance in frames between two frame numbers.
impl Sub for FrameNumber {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: Self) -> usize {
        self.0 - rhs.0
    }
}
