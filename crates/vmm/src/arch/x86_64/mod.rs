//! x86_64 architecture-specific implementation.
//!
//! Provides TLB maintenance, page directory activation and interrupt masking on top of the
//! `x86_64` crate. Page tables use the 32-bit two-level entry format, whose low flag bits are
//! shared with the long-mode format the `x86_64` crate describes.

mod flags;

pub use flags::PageFlags;

use ::x86_64::{
    PhysAddr, VirtAddr,
    instructions::{interrupts, tlb},
    registers::control::{Cr3, Cr3Flags},
    structures::paging::PhysFrame,
};

use crate::{PhysicalAddress, VirtualAddress};

/// Invalidates the TLB entry for `address` on the current CPU.
#[inline]
pub fn flush_tlb(address: VirtualAddress) {
    tlb::flush(VirtAddr::new(address.as_usize() as u64));
}

/// Invalidates every non-global TLB entry on the current CPU.
#[inline]
pub fn flush_tlb_all() {
    tlb::flush_all();
}

/// Makes the page directory at `root` the active one by loading it into CR3.
///
/// # Safety
/// The caller must ensure:
/// - The directory correctly maps all memory that will be accessed
/// - The kernel is properly mapped
/// - The directory frame stays allocated while it is active
pub unsafe fn activate(root: PhysicalAddress) {
    let frame = PhysFrame::containing_address(PhysAddr::new(root.as_usize() as u64));
    // SAFETY: Caller must ensure the directory is valid
    unsafe {
        Cr3::write(frame, Cr3Flags::empty());
    }
}

/// Runs `f` with interrupts masked on the current CPU.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    interrupts::without_interrupts(f)
}
