//! Workloads run against an emulated machine.

use std::fmt;

use vmm::{
    AllocError, DeviceId, FaultError, FrameNumber, ImageHandle, IoError, KERNEL_COPY_ENTRIES,
    MAX_FRAMES, MemoryStorage, PAGE_SIZE, PhysicalMemory, ProcessLayout, SpaceId, TABLE_SPAN,
    TASK_SIZE, VirtualAddress, VirtualMemoryManager, VmConfig,
};

const DISK: DeviceId = DeviceId(0x301);
const DISK_BLOCKS: usize = 1024;
const IMAGE_INODE: u32 = 12;
const IMAGE_PAGES: usize = 3;

/// Anonymous pages are placed from the second page table up, clear of the image.
const HEAP_BASE: usize = TABLE_SPAN;

#[derive(Debug)]
pub enum WorkloadError {
    /// The machine does not have enough memory above the kernel floor.
    TooSmall { frames: usize, floor: usize },
    /// The machine has more memory than a page table entry can address.
    TooLarge { frames: usize },
    Alloc(AllocError),
    Fault(FaultError),
    Io(IoError),
    /// A page read back did not hold what was written to it.
    Corrupted { space: SpaceId, address: VirtualAddress },
}

impl fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall { frames, floor } => {
                write!(f, "{frames} frames leave nothing above the kernel floor at {floor}")
            }
            Self::TooLarge { frames } => {
                write!(f, "{frames} frames exceed the {MAX_FRAMES} frames a page table can map")
            }
            Self::Alloc(err) => write!(f, "allocation failed: {err}"),
            Self::Fault(err) => write!(f, "page fault failed: {err}"),
            Self::Io(err) => write!(f, "storage setup failed: {err}"),
            Self::Corrupted { space, address } => {
                write!(f, "address space {space}: page at {address} was corrupted")
            }
        }
    }
}

impl From<AllocError> for WorkloadError {
    fn from(err: AllocError) -> Self {
        Self::Alloc(err)
    }
}

impl From<FaultError> for WorkloadError {
    fn from(err: FaultError) -> Self {
        Self::Fault(err)
    }
}

impl From<IoError> for WorkloadError {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

fn image_body() -> Vec<u8> {
    (0..IMAGE_PAGES * PAGE_SIZE)
        .map(|i| (i % 251) as u8 + 1)
        .collect()
}

fn heap_page(index: usize) -> VirtualAddress {
    VirtualAddress::new(HEAP_BASE + index * PAGE_SIZE)
}

/// Fills a page with a pattern unique to `(space, index)`.
fn pattern(space: SpaceId, index: usize) -> Vec<u8> {
    let seed = (space.as_usize() * 31 + index) as u8;
    (0..PAGE_SIZE)
        .map(|i| seed.wrapping_add(i as u8))
        .collect()
}

/// An emulated machine with one disk holding an executable image and an optional swap device.
pub struct Machine {
    vmm: VirtualMemoryManager<MemoryStorage>,
    image: ImageHandle,
    processes: Vec<SpaceId>,
}

impl Machine {
    pub fn new(frames: usize, floor: usize, swap_pages: usize) -> Result<Self, WorkloadError> {
        if frames > MAX_FRAMES {
            return Err(WorkloadError::TooLarge { frames });
        }
        if frames <= floor + 1 {
            return Err(WorkloadError::TooSmall { frames, floor });
        }

        let mut storage = MemoryStorage::new();
        storage.add_disk(DISK, DISK_BLOCKS);
        let image = storage.add_image(DISK, IMAGE_INODE, &image_body())?;
        if swap_pages > 0 {
            storage.set_swap_area(swap_pages);
            storage.format_swap_area(swap_pages - 1);
        }

        let config = VmConfig::new(FrameNumber::new(floor))
            .with_kernel_footprint(floor.min(KERNEL_COPY_ENTRIES));
        let vmm = VirtualMemoryManager::new(PhysicalMemory::emulated(frames), storage, config)?;
        Ok(Self {
            vmm,
            image,
            processes: Vec::new(),
        })
    }

    /// Starts a process running the image.
    fn spawn(&mut self) -> Result<SpaceId, WorkloadError> {
        let id = self.vmm.create_address_space()?;
        self.vmm.set_layout(
            id,
            ProcessLayout {
                end_code: PAGE_SIZE,
                end_data: IMAGE_PAGES * PAGE_SIZE - 100,
                brk: HEAP_BASE,
                start_stack: TASK_SIZE - PAGE_SIZE,
                executable: Some(self.image),
                library: None,
            },
        );
        self.processes.push(id);
        Ok(id)
    }

    fn write_page(&mut self, space: SpaceId, index: usize) -> Result<(), WorkloadError> {
        self.vmm.switch_to(space);
        self.vmm
            .write_user(heap_page(index), &pattern(space, index))?;
        Ok(())
    }

    /// Checks that the page holds the pattern `owner` wrote to it.
    fn verify_page(
        &mut self,
        space: SpaceId,
        owner: SpaceId,
        index: usize,
    ) -> Result<(), WorkloadError> {
        let mut bytes = vec![0; PAGE_SIZE];
        self.vmm.switch_to(space);
        self.vmm.read_user(heap_page(index), &mut bytes)?;
        if bytes != pattern(owner, index) {
            return Err(WorkloadError::Corrupted {
                space,
                address: heap_page(index),
            });
        }
        Ok(())
    }

    /// Starts `processes` copies of the image and touches every image page in each.
    pub fn share(&mut self, processes: usize) -> Result<(), WorkloadError> {
        let mut page = vec![0; PAGE_SIZE];
        for _ in 0..processes {
            let id = self.spawn()?;
            self.vmm.switch_to(id);
            for index in 0..IMAGE_PAGES {
                self.vmm
                    .read_user(VirtualAddress::new(index * PAGE_SIZE), &mut page)?;
            }
        }
        log::info!(
            "{processes} processes started with {} image page loads",
            self.vmm.storage().block_reads()
        );
        Ok(())
    }

    /// Dirties `pages` pages in a parent, forks `children` times and has every child rewrite
    /// the even pages.
    pub fn fork(&mut self, pages: usize, children: usize) -> Result<(), WorkloadError> {
        let parent = self.spawn()?;
        for index in 0..pages {
            self.write_page(parent, index)?;
        }

        let mut forked = Vec::with_capacity(children);
        for _ in 0..children {
            let child = self.vmm.fork(parent)?;
            self.processes.push(child);
            forked.push(child);
            for index in (0..pages).step_by(2) {
                self.write_page(child, index)?;
            }
        }

        for index in 0..pages {
            self.verify_page(parent, parent, index)?;
        }
        for child in forked {
            for index in 0..pages {
                let owner = if index % 2 == 0 { child } else { parent };
                self.verify_page(child, owner, index)?;
            }
        }
        log::info!(
            "{children} children forked, {} pages still shared",
            self.vmm.memory_summary().shared
        );
        Ok(())
    }

    /// Dirties more pages than memory holds, then reads every one of them back.
    pub fn pressure(&mut self, pages: Option<usize>) -> Result<(), WorkloadError> {
        let id = self.spawn()?;
        let pages = pages.unwrap_or_else(|| {
            self.vmm.physical().free_frames() + self.vmm.swap_status().free / 2
        });
        log::info!(
            "touching {pages} pages with {} frames free",
            self.vmm.physical().free_frames()
        );

        for index in 0..pages {
            self.write_page(id, index)?;
        }
        for index in 0..pages {
            self.verify_page(id, id, index)?;
        }
        Ok(())
    }

    /// Prints the memory and swap diagnostics to standard output.
    pub fn report(&self) {
        let storage = self.vmm.storage();
        print!("{}", self.vmm.memory_summary());
        println!("{}", self.vmm.swap_status());
        println!(
            "I/O: {} image page reads, {} swap reads, {} swap writes",
            storage.block_reads(),
            storage.swap_reads(),
            storage.swap_writes()
        );
    }

    /// Tears down every process address space.
    pub fn shutdown(mut self) {
        for id in self.processes.drain(..).rev() {
            self.vmm.destroy_address_space(id);
        }
        log::debug!(
            "all processes exited, {} of {} frames free",
            self.vmm.physical().free_frames(),
            self.vmm.physical().total_frames()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_size_is_bounded() {
        assert!(matches!(
            Machine::new(MAX_FRAMES + 1, 160, 0).err(),
            Some(WorkloadError::TooLarge { .. })
        ));
        assert!(matches!(
            Machine::new(161, 160, 0).err(),
            Some(WorkloadError::TooSmall { .. })
        ));
    }

    #[test]
    fn fork_workload_keeps_every_page() {
        let mut machine = Machine::new(64, 8, 32).unwrap();
        machine.fork(4, 2).unwrap();
        machine.shutdown();
    }
}
