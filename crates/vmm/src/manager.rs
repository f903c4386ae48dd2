//! The virtual memory manager.
//!
//! [`VirtualMemoryManager`] ties the page allocator, the address space arena, the swap
//! manager and the backing storage together. Page table mapping lives in `mapper`, fault
//! resolution in `fault` and user memory access in `uaccess`; each adds its own `impl` block.

use crate::{
    FrameNumber, PhysicalMemoryManager, VirtualAddress,
    address_space::{AddressSpace, AddressSpaces, SpaceId},
    arch::{self, PAGE_SIZE, PageFlags},
    config::{MAX_FRAMES, TASK_SIZE, VmConfig},
    image::ProcessLayout,
    page_directory::PageDirectory,
    page_table::PageEntry,
    physical_memory::PhysicalMemory,
    physical_memory_manager::AllocError,
    storage::Storage,
    summary::MemorySummary,
    swap::{SwapManager, SwapStatus},
};

/// Virtual memory manager for a single CPU.
pub struct VirtualMemoryManager<S: Storage> {
    pub(crate) pmm: PhysicalMemoryManager,
    pub(crate) spaces: AddressSpaces,
    pub(crate) swap: SwapManager,
    pub(crate) storage: S,
    config: VmConfig,
}

impl<S: Storage> VirtualMemoryManager<S> {
    /// Creates a manager over `memory`, builds the kernel address space and loads the swap
    /// bitmap from `storage`.
    ///
    /// The kernel address space identity-maps the first `kernel_footprint_pages` frames.
    ///
    /// # Panics
    /// Panics if memory holds more frames than a page table entry can address, or if the
    /// kernel footprint reaches past the kernel floor or out of the address space.
    pub fn new(
        memory: PhysicalMemory,
        mut storage: S,
        config: VmConfig,
    ) -> Result<Self, AllocError> {
        assert!(
            memory.frame_count() <= MAX_FRAMES,
            "{} frames of memory exceed the {MAX_FRAMES} a page table entry can address",
            memory.frame_count()
        );
        assert!(
            config.kernel_footprint_pages <= config.kernel_floor.as_usize(),
            "kernel footprint must lie below the kernel floor"
        );
        assert!(
            config.kernel_footprint_pages * PAGE_SIZE <= TASK_SIZE,
            "kernel footprint does not fit in an address space"
        );

        let mut pmm = PhysicalMemoryManager::new(memory, config.kernel_floor);
        let directory = PageDirectory::new(pmm.allocate()?);
        for page in 0..config.kernel_footprint_pages {
            let address = VirtualAddress::new(page * PAGE_SIZE);
            let index = address.directory_index();
            if directory.table(&pmm, index).is_none() {
                let table = pmm.allocate()?;
                directory.install_table(&mut pmm, index, table);
            }
            let entry = PageEntry::resident(FrameNumber::new(page), PageFlags::user_page());
            directory.set_entry(&mut pmm, address, entry);
        }

        let spaces = AddressSpaces::new(AddressSpace::new(directory), config.max_address_spaces);
        let swap = SwapManager::init(&mut storage);
        log::info!(
            "virtual memory: {} of {} pages free, {} address spaces",
            pmm.free_frames(),
            pmm.total_frames(),
            config.max_address_spaces
        );

        Ok(Self {
            pmm,
            spaces,
            swap,
            storage,
            config,
        })
    }

    /// Returns the configuration the manager was built with.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Returns the page allocator.
    pub fn physical(&self) -> &PhysicalMemoryManager {
        &self.pmm
    }

    /// Returns the address space arena.
    pub fn spaces(&self) -> &AddressSpaces {
        &self.spaces
    }

    /// Returns the swap manager.
    pub fn swap(&self) -> &SwapManager {
        &self.swap
    }

    /// Returns the backing storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the backing storage mutably.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Returns the active address space.
    pub fn current(&self) -> SpaceId {
        self.spaces.current()
    }

    /// Returns the page directory of `id`.
    ///
    /// # Panics
    /// Panics if `id` is not a live address space.
    pub(crate) fn directory(&self, id: SpaceId) -> PageDirectory {
        let Some(directory) = self.spaces.directory(id) else {
            panic!("no address space {id}");
        };
        directory
    }

    /// Returns the page table entry for `address` in `id`, or `None` if no table covers it.
    pub fn entry(&self, id: SpaceId, address: VirtualAddress) -> Option<PageEntry> {
        self.directory(id).entry(&self.pmm, address)
    }

    /// Allocates a zero-filled page, evicting one page to swap first if memory is exhausted.
    pub fn allocate_page(&mut self) -> Result<FrameNumber, AllocError> {
        if let Ok(frame) = self.pmm.allocate() {
            return Ok(frame);
        }
        if self.swap.swap_out(&mut self.pmm, &self.spaces, &mut self.storage) {
            if let Ok(frame) = self.pmm.allocate() {
                return Ok(frame);
            }
        }
        log::warn!("out of memory");
        Err(AllocError::OutOfMemory)
    }

    /// Drops one reference to `frame`.
    ///
    /// # Panics
    /// Panics on a double free or a frame past the end of memory.
    pub fn free_page(&mut self, frame: FrameNumber) {
        self.pmm.free(frame);
    }

    /// Evicts one page from some process address space. Returns whether a page was freed.
    pub fn swap_out(&mut self) -> bool {
        self.swap
            .swap_out(&mut self.pmm, &self.spaces, &mut self.storage)
    }

    /// Creates an empty process address space.
    pub fn create_address_space(&mut self) -> Result<SpaceId, AllocError> {
        if self.spaces.is_full() {
            return Err(AllocError::AddressSpaceLimit);
        }
        let root = self.allocate_page()?;
        let id = self.spaces.insert(AddressSpace::new(PageDirectory::new(root)))?;
        log::debug!("created address space {id} with directory at frame {root}");
        Ok(id)
    }

    /// Creates a copy-on-write duplicate of `parent`, layout included.
    ///
    /// A partially copied child is torn down before the error is returned.
    pub fn fork(&mut self, parent: SpaceId) -> Result<SpaceId, AllocError> {
        let layout = *self.layout(parent);
        let child = self.create_address_space()?;
        self.set_layout(child, layout);
        if let Err(err) = self.copy_address_space(parent, child, TASK_SIZE) {
            log::warn!("fork of address space {parent} failed: {err}");
            self.destroy_address_space(child);
            return Err(err);
        }
        log::debug!("forked address space {parent} into {child}");
        Ok(child)
    }

    /// Unmaps everything in `id`, frees its directory and releases its slot.
    ///
    /// If `id` was active, the kernel address space becomes active.
    ///
    /// # Panics
    /// Panics when asked to destroy the kernel address space.
    pub fn destroy_address_space(&mut self, id: SpaceId) {
        if self.spaces.current() == id {
            self.switch_to(SpaceId::KERNEL);
        }
        self.unmap_range(id, VirtualAddress::new(0), TASK_SIZE);
        let Some(space) = self.spaces.remove(id) else {
            panic!("no address space {id}");
        };
        self.pmm.free(space.directory().root());
        log::debug!("destroyed address space {id}");
    }

    /// Makes `id` the active address space.
    ///
    /// # Panics
    /// Panics if `id` is not a live address space.
    pub fn switch_to(&mut self, id: SpaceId) {
        let root = self.directory(id).root();
        self.spaces.set_current(id);
        // SAFETY: The root frame holds a page directory owned by this manager and is only
        // freed after the address space stops being current.
        unsafe { arch::activate(root.start()) };
    }

    /// Returns the image layout of `id`.
    pub fn layout(&self, id: SpaceId) -> &ProcessLayout {
        let Some(space) = self.spaces.get(id) else {
            panic!("no address space {id}");
        };
        space.layout()
    }

    /// Replaces the image layout of `id`.
    pub fn set_layout(&mut self, id: SpaceId, layout: ProcessLayout) {
        let Some(space) = self.spaces.get_mut(id) else {
            panic!("no address space {id}");
        };
        space.set_layout(layout);
    }

    /// Collects page usage for the whole system.
    pub fn memory_summary(&self) -> MemorySummary {
        MemorySummary::collect(&self.pmm, &self.spaces)
    }

    /// Returns the free and total swap slots.
    pub fn swap_status(&self) -> SwapStatus {
        self.swap.status()
    }
}
