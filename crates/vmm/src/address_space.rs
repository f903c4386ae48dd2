//! Address space management.
//!
//! This module provides the arena of address spaces the memory manager works over. Each
//! address space owns a page directory and carries the image layout of the process running in
//! it. Slot zero always holds the kernel address space; process address spaces take the
//! other slots and are referred to by [`SpaceId`].

use alloc::vec::Vec;
use core::fmt;

use crate::{
    VirtualAddress, arch,
    image::{ImageHandle, ProcessLayout},
    page_directory::PageDirectory,
    physical_memory_manager::AllocError,
};

/// Identifies an address space in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(usize);

impl SpaceId {
    /// The kernel address space.
    pub const KERNEL: Self = Self(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub fn is_kernel(self) -> bool {
        self == Self::KERNEL
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An address space: a page directory plus the layout of the image running in it.
pub struct AddressSpace {
    directory: PageDirectory,
    layout: ProcessLayout,
}

impl AddressSpace {
    /// Creates an address space over an empty page directory.
    pub fn new(directory: PageDirectory) -> Self {
        Self {
            directory,
            layout: ProcessLayout::default(),
        }
    }

    /// Returns the page directory for this address space.
    pub fn directory(&self) -> PageDirectory {
        self.directory
    }

    pub fn layout(&self) -> &ProcessLayout {
        &self.layout
    }

    pub fn set_layout(&mut self, layout: ProcessLayout) {
        self.layout = layout;
    }
}

/// Every live address space, indexed by [`SpaceId`].
pub struct AddressSpaces {
    slots: Vec<Option<AddressSpace>>,
    current: SpaceId,
}

impl AddressSpaces {
    /// Creates an arena with room for `capacity` address spaces, the kernel's included.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(kernel: AddressSpace, capacity: usize) -> Self {
        assert!(capacity > 0, "the kernel address space needs a slot");
        let mut slots = Vec::with_capacity(capacity);
        slots.push(Some(kernel));
        slots.resize_with(capacity, || None);
        Self {
            slots,
            current: SpaceId::KERNEL,
        }
    }

    /// Returns the number of slots, the kernel's included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of live address spaces, the kernel's included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Stores `space` in the first free process slot.
    pub fn insert(&mut self, space: AddressSpace) -> Result<SpaceId, AllocError> {
        let index = self
            .slots
            .iter()
            .skip(1)
            .position(Option::is_none)
            .ok_or(AllocError::AddressSpaceLimit)?
            + 1;
        self.slots[index] = Some(space);
        Ok(SpaceId(index))
    }

    /// Removes a process address space from the arena.
    ///
    /// # Panics
    /// Panics when asked to remove the kernel address space.
    pub fn remove(&mut self, id: SpaceId) -> Option<AddressSpace> {
        assert!(!id.is_kernel(), "trying to free up swapper memory space");
        self.slots.get_mut(id.0)?.take()
    }

    pub fn get(&self, id: SpaceId) -> Option<&AddressSpace> {
        self.slots.get(id.0)?.as_ref()
    }

    pub fn get_mut(&mut self, id: SpaceId) -> Option<&mut AddressSpace> {
        self.slots.get_mut(id.0)?.as_mut()
    }

    /// Returns the page directory of a live address space.
    pub fn directory(&self, id: SpaceId) -> Option<PageDirectory> {
        self.get(id).map(AddressSpace::directory)
    }

    /// Iterates over every live address space in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SpaceId, &AddressSpace)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|space| (SpaceId(index), space)))
    }

    /// Returns the number of live address spaces whose layout references `image`.
    pub fn users_of(&self, image: ImageHandle) -> usize {
        self.iter()
            .filter(|(_, space)| space.layout().uses(image))
            .count()
    }

    /// Returns the address space the CPU is running in.
    pub fn current(&self) -> SpaceId {
        self.current
    }

    pub(crate) fn set_current(&mut self, id: SpaceId) {
        self.current = id;
    }

    /// Flushes the translation for `address` if `id` is the active address space.
    ///
    /// Inactive address spaces have nothing cached.
    pub fn invalidate(&self, id: SpaceId, address: VirtualAddress) {
        if id == self.current {
            arch::flush_tlb(address);
        }
    }

    /// Flushes every translation if `id` is the active address space.
    pub fn invalidate_all(&self, id: SpaceId) {
        if id == self.current {
            arch::flush_tlb_all();
        }
    }

    /// Returns whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }
}
