//! Address types for physical and linear memory.
//!
//! This module provides architecture-independent wrappers around physical and virtual
//! (linear) addresses, with the helpers the two-level page table walk needs.

use core::{fmt, ops::Add};

use crate::{
    FrameNumber, arch,
    config::{ENTRIES_PER_TABLE, TABLE_SPAN},
};

/// Defines an address newtype with the alignment helpers the page table walk needs.
macro_rules! address_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub const fn new(address: usize) -> Self {
                Self(address)
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns whether the address is a multiple of the power of two `align`.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                debug_assert!(align.is_power_of_two());
                self.0 & (align - 1) == 0
            }

            /// Rounds the address down to a multiple of the power of two `align`.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                debug_assert!(align.is_power_of_two());
                Self(self.0 & !(align - 1))
            }

            /// Returns the byte offset within the page holding this address.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % arch::PAGE_SIZE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, bytes: usize) -> Self {
                Self(self.0 + bytes)
            }
        }
    };
}

address_type!(
    PhysicalAddress,
    "A physical memory address."
);

impl PhysicalAddress {
    /// Returns the frame containing this physical address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 >> arch::PAGE_SHIFT)
    }
}

address_type!(
    VirtualAddress,
    "A linear address inside an address space.\n\n\
     Linear addresses are relative to the owning address space, which starts at zero and\n\
     spans `TASK_SIZE` bytes."
);

impl VirtualAddress {
    /// Returns the page directory index covering this address.
    #[inline]
    pub const fn directory_index(self) -> usize {
        self.0 / TABLE_SPAN
    }

    /// Returns the index of this address's entry within its page table.
    #[inline]
    pub const fn table_index(self) -> usize {
        (self.0 >> arch::PAGE_SHIFT) % ENTRIES_PER_TABLE
    }

    /// Builds the page-aligned address for a directory and table index pair.
    #[inline]
    pub const fn from_indices(directory: usize, table: usize) -> Self {
        Self(directory * TABLE_SPAN + table * arch::PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn physical_address_names_its_frame() {
        let address = PhysicalAddress::new(arch::PAGE_SIZE * 7 + 12);
        assert_eq!(address.frame_number(), FrameNumber::new(7));
        assert!(PhysicalAddress::new(0x2000).is_aligned(arch::PAGE_SIZE));
        assert!(!address.is_aligned(arch::PAGE_SIZE));
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{}", VirtualAddress::new(0x1000)), "0x1000");
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x1000)),
            "PhysicalAddress(0x1000)"
        );
    }

    #[test]
    fn page_alignment() {
        let address = VirtualAddress::new(0x1234);
        assert_eq!(address.align_down(arch::PAGE_SIZE), VirtualAddress::new(0x1000));
        assert_eq!(address.page_offset(), 0x234);
        assert_eq!((address + 0xdcc).page_offset(), 0);
    }

    #[test]
    fn two_level_split() {
        // 4 MiB per directory entry, 4 KiB per table entry.
        let address = VirtualAddress::new(0x0080_3123);
        assert_eq!(address.directory_index(), 2);
        assert_eq!(address.table_index(), 3);
        assert_eq!(address.align_down(TABLE_SPAN), VirtualAddress::new(0x0080_0000));
    }

    #[test]
    fn from_indices_inverts_the_split() {
        let address = VirtualAddress::from_indices(5, 1023);
        assert_eq!(address.directory_index(), 5);
        assert_eq!(address.table_index(), 1023);
        assert_eq!(address.page_offset(), 0);
    }
}
