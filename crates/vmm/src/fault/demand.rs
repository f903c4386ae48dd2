//! Demand paging.
//!
//! A not-present fault is resolved, in order, by reading the page back from swap, sharing a
//! clean copy another process already has of the same image page, loading it from the
//! image, or handing out a zero-filled page.

use crate::{
    FrameNumber, VirtualAddress, VirtualMemoryManager,
    address_space::SpaceId,
    arch::{PAGE_SIZE, PageFlags},
    config::{BLOCKS_PER_PAGE, TASK_SIZE},
    image::{Backing, ImageHandle, ImageRole},
    page_table::{PageEntry, PteState},
    storage::Storage,
    swap::SwapSlot,
};

use super::FaultError;

impl<S: Storage> VirtualMemoryManager<S> {
    /// Resolves an access to a not-present page of the current address space.
    ///
    /// # Panics
    /// Panics if the kernel address space is active.
    pub fn handle_not_present_fault(&mut self, address: VirtualAddress) -> Result<(), FaultError> {
        let id = self.spaces.current();
        if id.is_kernel() {
            panic!("not-present page fault at {address} in the kernel address space");
        }
        if address.as_usize() >= TASK_SIZE {
            return Err(FaultError::InvalidAddress(address));
        }
        let page = address.align_down(PAGE_SIZE);

        match self.entry(id, page).map(PageEntry::state) {
            Some(PteState::Swapped(slot)) => return self.swap_in(id, page, slot),
            Some(PteState::Resident { .. }) => return Ok(()),
            _ => {}
        }

        let layout = *self.layout(id);
        match layout.classify(page) {
            Backing::Anonymous => self.get_empty_page(id, page),
            Backing::Image {
                image,
                role,
                first_block,
            } => {
                if self.share_page(id, page, image, role)? {
                    return Ok(());
                }
                self.load_page(id, page, image, first_block, layout.end_data)
            }
        }
    }

    /// Reads the page at `page` back from swap `slot`.
    ///
    /// The page comes back dirty: its slot is released, so memory holds the only copy.
    fn swap_in(
        &mut self,
        id: SpaceId,
        page: VirtualAddress,
        slot: SwapSlot,
    ) -> Result<(), FaultError> {
        let frame = self.allocate_page()?;
        if self.entry(id, page) != Some(PageEntry::swapped(slot)) {
            self.pmm.free(frame);
            return Ok(());
        }
        if let Err(err) = self
            .swap
            .read_in(&mut self.storage, slot, self.pmm.frame_mut(frame))
        {
            log::error!("failed to read swap {slot} for {page}: {err}");
            self.pmm.free(frame);
            return Err(FaultError::Io(err));
        }
        let mut flags = PageFlags::user_page();
        flags.set_dirty(true);
        self.directory(id)
            .set_entry(&mut self.pmm, page, PageEntry::resident(frame, flags));
        self.spaces.invalidate(id, page);
        log::trace!("address space {id}: swapped in {page} from {slot}");
        Ok(())
    }

    fn get_empty_page(&mut self, id: SpaceId, page: VirtualAddress) -> Result<(), FaultError> {
        let frame = self.allocate_page()?;
        self.install_page(id, page, frame)
    }

    fn install_page(
        &mut self,
        id: SpaceId,
        page: VirtualAddress,
        frame: FrameNumber,
    ) -> Result<(), FaultError> {
        if let Err(err) = self.map(id, frame, page, PageFlags::user_page()) {
            self.pmm.free(frame);
            return Err(err.into());
        }
        Ok(())
    }

    /// Tries to map a clean page of `image` that another address space already has at
    /// `page`. Returns whether a page was shared.
    fn share_page(
        &mut self,
        id: SpaceId,
        page: VirtualAddress,
        image: ImageHandle,
        role: ImageRole,
    ) -> Result<bool, FaultError> {
        if self.spaces.users_of(image) < 2 {
            return Ok(false);
        }
        // Allocating our table may evict the very page we would share, so do it first.
        self.ensure_table(id, page)?;

        for index in (1..self.spaces.capacity()).rev() {
            let other = SpaceId::new(index);
            if other == id {
                continue;
            }
            let uses_image = self
                .spaces
                .get(other)
                .is_some_and(|space| space.layout().image(role) == Some(image));
            if uses_image && self.try_to_share(id, other, page) {
                log::trace!("address space {id}: shared {page} of image {image} with {other}");
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn try_to_share(&mut self, id: SpaceId, other: SpaceId, page: VirtualAddress) -> bool {
        let source = self.directory(other);
        let Some(entry) = source.entry(&self.pmm, page) else {
            return false;
        };
        let PteState::Resident { frame, flags } = entry.state() else {
            return false;
        };
        if flags.is_dirty() || !self.pmm.is_managed(frame) {
            return false;
        }

        let target = self.directory(id);
        if target.entry(&self.pmm, page).is_some_and(PageEntry::is_present) {
            panic!("try_to_share: {page} already exists in address space {id}");
        }
        let shared = entry.write_protected();
        source.set_entry(&mut self.pmm, page, shared);
        target.set_entry(&mut self.pmm, page, shared);
        self.pmm.share(frame);
        self.spaces.invalidate(other, page);
        self.spaces.invalidate(id, page);
        true
    }

    /// Reads the page at `page` from `image`, zeroing anything past `end_data`.
    fn load_page(
        &mut self,
        id: SpaceId,
        page: VirtualAddress,
        image: ImageHandle,
        first_block: u32,
        end_data: usize,
    ) -> Result<(), FaultError> {
        let frame = self.allocate_page()?;
        let storage = &mut self.storage;
        let blocks: [_; BLOCKS_PER_PAGE] = core::array::from_fn(|i| {
            storage.map_file_offset_to_block(image, first_block + i as u32)
        });
        let read = storage.read_block_range(image.device, blocks, self.pmm.frame_mut(frame));
        if let Err(err) = read {
            log::error!("failed to load {page} from image {image}: {err}");
            self.pmm.free(frame);
            return Err(FaultError::Io(err));
        }

        let tail = (page.as_usize() + PAGE_SIZE).saturating_sub(end_data);
        if (1..PAGE_SIZE).contains(&tail) {
            self.pmm.frame_mut(frame).bytes_mut()[PAGE_SIZE - tail..].fill(0);
        }
        self.install_page(id, page, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LIBRARY_OFFSET, VmConfig},
        image::{DeviceId, ProcessLayout},
        memory_storage::MemoryStorage,
        physical_memory::PhysicalMemory,
    };

    const DISK: DeviceId = DeviceId(0x301);

    fn body() -> Vec<u8> {
        (0..3 * PAGE_SIZE).map(|i| (i % 251) as u8 + 1).collect()
    }

    fn setup() -> (VirtualMemoryManager<MemoryStorage>, ImageHandle) {
        let mut storage = MemoryStorage::new();
        storage.add_disk(DISK, 256);
        let image = storage.add_image(DISK, 12, &body()).unwrap();
        let config = VmConfig::new(FrameNumber::new(8))
            .with_kernel_footprint(4)
            .with_max_address_spaces(4);
        let vmm = VirtualMemoryManager::new(PhysicalMemory::emulated(64), storage, config).unwrap();
        (vmm, image)
    }

    fn process(vmm: &mut VirtualMemoryManager<MemoryStorage>, image: ImageHandle) -> SpaceId {
        let id = vmm.create_address_space().unwrap();
        vmm.set_layout(
            id,
            ProcessLayout {
                end_code: PAGE_SIZE,
                end_data: 2 * PAGE_SIZE + 100,
                brk: 3 * PAGE_SIZE,
                start_stack: TASK_SIZE - PAGE_SIZE,
                executable: Some(image),
                library: None,
            },
        );
        id
    }

    fn page_bytes(
        vmm: &VirtualMemoryManager<MemoryStorage>,
        id: SpaceId,
        address: usize,
    ) -> Vec<u8> {
        let frame = vmm.entry(id, VirtualAddress::new(address)).unwrap().frame().unwrap();
        vmm.pmm.frame(frame).bytes().to_vec()
    }

    #[test]
    fn anonymous_fault_maps_zero_page() {
        let (mut vmm, image) = setup();
        let id = process(&mut vmm, image);
        vmm.switch_to(id);
        vmm.handle_not_present_fault(VirtualAddress::new(0x0080_0010))
            .unwrap();
        let entry = vmm.entry(id, VirtualAddress::new(0x0080_0000)).unwrap();
        assert!(entry.flags().is_writable());
        assert!(page_bytes(&vmm, id, 0x0080_0000).iter().all(|&b| b == 0));
        assert_eq!(vmm.storage().block_reads(), 0);
    }

    #[test]
    fn executable_page_is_loaded_from_image() {
        let (mut vmm, image) = setup();
        let id = process(&mut vmm, image);
        vmm.switch_to(id);
        vmm.handle_not_present_fault(VirtualAddress::new(PAGE_SIZE + 5))
            .unwrap();
        assert_eq!(page_bytes(&vmm, id, PAGE_SIZE), &body()[PAGE_SIZE..2 * PAGE_SIZE]);
        assert!(vmm.entry(id, VirtualAddress::new(PAGE_SIZE)).unwrap().flags().is_writable());
    }

    #[test]
    fn tail_past_end_data_is_zeroed() {
        let (mut vmm, image) = setup();
        let id = process(&mut vmm, image);
        vmm.switch_to(id);
        vmm.handle_not_present_fault(VirtualAddress::new(2 * PAGE_SIZE))
            .unwrap();
        let bytes = page_bytes(&vmm, id, 2 * PAGE_SIZE);
        assert_eq!(&bytes[..100], &body()[2 * PAGE_SIZE..2 * PAGE_SIZE + 100]);
        assert!(bytes[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unrelated_processes_get_distinct_identical_pages() {
        let (mut vmm, image) = setup();
        let copy = vmm
            .storage_mut()
            .add_image(DISK, 13, &body())
            .unwrap();
        let a = process(&mut vmm, image);
        let b = process(&mut vmm, copy);
        for id in [a, b] {
            vmm.switch_to(id);
            vmm.handle_not_present_fault(VirtualAddress::new(0)).unwrap();
        }

        let ea = vmm.entry(a, VirtualAddress::new(0)).unwrap();
        let eb = vmm.entry(b, VirtualAddress::new(0)).unwrap();
        assert_ne!(ea.frame(), eb.frame());
        assert_eq!(page_bytes(&vmm, a, 0), page_bytes(&vmm, b, 0));
        assert_eq!(vmm.storage().block_reads(), 2);
    }

    #[test]
    fn second_user_shares_clean_page() {
        let (mut vmm, image) = setup();
        let a = process(&mut vmm, image);
        let b = process(&mut vmm, image);
        vmm.switch_to(a);
        vmm.handle_not_present_fault(VirtualAddress::new(0)).unwrap();
        vmm.switch_to(b);
        vmm.handle_not_present_fault(VirtualAddress::new(0)).unwrap();

        let ea = vmm.entry(a, VirtualAddress::new(0)).unwrap();
        let eb = vmm.entry(b, VirtualAddress::new(0)).unwrap();
        assert_eq!(ea.frame(), eb.frame());
        assert!(!ea.flags().is_writable());
        assert!(!eb.flags().is_writable());
        assert_eq!(vmm.physical().reference_count(ea.frame().unwrap()), Some(2));
        assert_eq!(vmm.storage().block_reads(), 1);
    }

    #[test]
    fn dirty_page_is_not_shared() {
        let (mut vmm, image) = setup();
        let a = process(&mut vmm, image);
        let b = process(&mut vmm, image);
        vmm.switch_to(a);
        vmm.handle_not_present_fault(VirtualAddress::new(0)).unwrap();
        let mut entry = vmm.entry(a, VirtualAddress::new(0)).unwrap();
        let mut flags = entry.flags();
        flags.set_dirty(true);
        entry.set_flags(flags);
        vmm.directory(a).set_entry(&mut vmm.pmm, VirtualAddress::new(0), entry);

        vmm.switch_to(b);
        vmm.handle_not_present_fault(VirtualAddress::new(0)).unwrap();
        assert_ne!(
            vmm.entry(a, VirtualAddress::new(0)).unwrap().frame(),
            vmm.entry(b, VirtualAddress::new(0)).unwrap().frame()
        );
        assert_eq!(vmm.storage().block_reads(), 2);
    }

    #[test]
    fn library_pages_come_from_the_library() {
        let (mut vmm, image) = setup();
        let id = vmm.create_address_space().unwrap();
        vmm.set_layout(
            id,
            ProcessLayout {
                library: Some(image),
                ..ProcessLayout::default()
            },
        );
        vmm.switch_to(id);
        vmm.handle_not_present_fault(VirtualAddress::new(LIBRARY_OFFSET + PAGE_SIZE))
            .unwrap();
        assert_eq!(
            page_bytes(&vmm, id, LIBRARY_OFFSET + PAGE_SIZE),
            &body()[PAGE_SIZE..2 * PAGE_SIZE]
        );
    }

    #[test]
    fn blocks_past_end_of_image_read_as_zero() {
        let mut storage = MemoryStorage::new();
        storage.add_disk(DISK, 256);
        let image = storage.add_image(DISK, 3, &[0xEE; 1500]).unwrap();
        let config = VmConfig::new(FrameNumber::new(8)).with_kernel_footprint(4);
        let mut vmm =
            VirtualMemoryManager::new(PhysicalMemory::emulated(64), storage, config).unwrap();
        let id = vmm.create_address_space().unwrap();
        vmm.set_layout(
            id,
            ProcessLayout {
                end_data: PAGE_SIZE,
                executable: Some(image),
                ..ProcessLayout::default()
            },
        );
        vmm.switch_to(id);
        vmm.handle_not_present_fault(VirtualAddress::new(0)).unwrap();
        let bytes = page_bytes(&vmm, id, 0);
        assert!(bytes[..1500].iter().all(|&b| b == 0xEE));
        assert!(bytes[2048..].iter().all(|&b| b == 0));
    }

    #[test]
    fn read_failure_is_reported() {
        let (mut vmm, image) = setup();
        let id = process(&mut vmm, image);
        vmm.switch_to(id);
        let free = vmm.physical().free_frames();
        vmm.storage_mut().set_fail_reads(true);
        assert!(matches!(
            vmm.handle_not_present_fault(VirtualAddress::new(0)),
            Err(FaultError::Io(_))
        ));
        assert_eq!(vmm.physical().free_frames(), free);
        assert_eq!(vmm.entry(id, VirtualAddress::new(0)), None);
    }

    #[test]
    fn fault_past_task_size_is_invalid() {
        let (mut vmm, image) = setup();
        let id = process(&mut vmm, image);
        vmm.switch_to(id);
        assert_eq!(
            vmm.handle_not_present_fault(VirtualAddress::new(TASK_SIZE + 4)),
            Err(FaultError::InvalidAddress(VirtualAddress::new(TASK_SIZE + 4)))
        );
    }
}
