//! End-to-end runs of the memory manager over emulated memory and storage.
//!
//! Every scenario re-checks the global bookkeeping after each step: the reference count of
//! every managed frame equals the number of directories, page tables and entries that point
//! at it, a writable page is never shared, and every swapped entry holds a reference on a
//! slot in use.

use std::collections::HashMap;

use crate::{
    FrameNumber, VirtualAddress, VirtualMemoryManager,
    address_space::SpaceId,
    arch::PAGE_SIZE,
    config::{ENTRIES_PER_TABLE, VmConfig},
    fault::{FaultError, FaultKind, Signal},
    image::{DeviceId, ImageHandle, ProcessLayout},
    memory_storage::MemoryStorage,
    page_table::{PageEntry, PteState},
    physical_memory::PhysicalMemory,
    swap::SwapSlot,
};

const DISK: DeviceId = DeviceId(0x301);

type Vmm = VirtualMemoryManager<MemoryStorage>;

/// Builds a machine with `frames` frames of memory (eight below the kernel floor) and, when
/// `swap` is given, a swap device of `(pages, usable slots)`.
fn machine(frames: usize, swap: Option<(usize, usize)>) -> Vmm {
    let mut storage = MemoryStorage::new();
    storage.add_disk(DISK, 256);
    if let Some((pages, usable)) = swap {
        storage.set_swap_area(pages);
        storage.format_swap_area(usable);
    }
    let config = VmConfig::new(FrameNumber::new(8))
        .with_kernel_footprint(4)
        .with_max_address_spaces(4);
    let vmm = VirtualMemoryManager::new(PhysicalMemory::emulated(frames), storage, config).unwrap();
    check_invariants(&vmm);
    vmm
}

/// Creates a process running `executable` and makes it current.
fn process(vmm: &mut Vmm, executable: Option<ImageHandle>) -> SpaceId {
    let id = vmm.create_address_space().unwrap();
    vmm.set_layout(
        id,
        ProcessLayout {
            end_code: PAGE_SIZE,
            end_data: 3 * PAGE_SIZE,
            brk: 3 * PAGE_SIZE,
            start_stack: 0x3ff_f000,
            executable,
            library: None,
        },
    );
    vmm.switch_to(id);
    id
}

fn body() -> Vec<u8> {
    (0..3 * PAGE_SIZE).map(|i| (i % 253) as u8 + 1).collect()
}

fn page(number: usize) -> VirtualAddress {
    VirtualAddress::new(number * PAGE_SIZE)
}

fn read_page(vmm: &mut Vmm, address: VirtualAddress) -> Vec<u8> {
    let mut bytes = vec![0; PAGE_SIZE];
    vmm.read_user(address, &mut bytes).unwrap();
    bytes
}

fn frame_at(vmm: &Vmm, id: SpaceId, address: VirtualAddress) -> FrameNumber {
    vmm.entry(id, address).and_then(PageEntry::frame).unwrap()
}

fn check_invariants(vmm: &Vmm) {
    let pmm = &vmm.pmm;
    let mut expected: HashMap<FrameNumber, u16> = HashMap::new();
    let mut slots: HashMap<SwapSlot, u16> = HashMap::new();
    let mut writable = Vec::new();

    for (id, space) in vmm.spaces.iter() {
        let directory = space.directory();
        *expected.entry(directory.root()).or_default() += 1;
        for (_, table) in directory.tables(pmm) {
            *expected.entry(table).or_default() += 1;
            for (index, entry) in pmm.table(table).entries(ENTRIES_PER_TABLE) {
                match entry.state() {
                    PteState::Absent => {}
                    PteState::Swapped(slot) => *slots.entry(slot).or_default() += 1,
                    PteState::Resident { frame, flags } if pmm.is_managed(frame) => {
                        *expected.entry(frame).or_default() += 1;
                        if flags.is_writable() {
                            writable.push((id, index, frame));
                        }
                    }
                    PteState::Resident { .. } => {}
                }
            }
        }
    }

    for (frame, count) in pmm.references().iter() {
        assert_eq!(
            count,
            expected.get(&frame).copied().unwrap_or(0),
            "reference count of frame {frame}"
        );
    }
    for (id, index, frame) in writable {
        assert_eq!(
            pmm.reference_count(frame),
            Some(1),
            "writable entry {index} of address space {id} shares frame {frame}"
        );
    }
    for (&slot, &count) in &slots {
        assert!(!vmm.swap.is_free(slot), "{slot} is referenced but free");
        assert_eq!(vmm.swap.reference_count(slot), count, "references to {slot}");
    }
    let status = vmm.swap_status();
    assert_eq!(status.total - status.free, slots.len());
}

#[test]
fn fork_then_write_in_both_directions() {
    let mut vmm = machine(64, None);
    let parent = process(&mut vmm, None);
    vmm.write_user(page(100), b"original").unwrap();
    let frame = frame_at(&vmm, parent, page(100));

    let child = vmm.fork(parent).unwrap();
    check_invariants(&vmm);
    assert_eq!(vmm.physical().reference_count(frame), Some(2));
    for id in [parent, child] {
        let entry = vmm.entry(id, page(100)).unwrap();
        assert_eq!(entry.frame(), Some(frame));
        assert!(!entry.flags().is_writable());
    }

    vmm.switch_to(child);
    vmm.write_user(page(100), b"child").unwrap();
    check_invariants(&vmm);
    let copy = frame_at(&vmm, child, page(100));
    assert_ne!(copy, frame);
    assert_eq!(vmm.physical().reference_count(frame), Some(1));
    assert_eq!(vmm.physical().reference_count(copy), Some(1));
    assert!(!vmm.entry(parent, page(100)).unwrap().flags().is_writable());

    vmm.switch_to(parent);
    let free = vmm.physical().free_frames();
    vmm.write_user(page(100), b"parent").unwrap();
    check_invariants(&vmm);
    assert_eq!(frame_at(&vmm, parent, page(100)), frame);
    assert_eq!(vmm.physical().free_frames(), free);

    assert_eq!(&read_page(&mut vmm, page(100))[..8], b"parental");
    vmm.switch_to(child);
    assert_eq!(&read_page(&mut vmm, page(100))[..8], b"childnal");
}

#[test]
fn image_pages_are_shared_until_written() {
    let mut vmm = machine(64, None);
    let image = vmm.storage_mut().add_image(DISK, 12, &body()).unwrap();
    let a = process(&mut vmm, Some(image));
    let b = process(&mut vmm, Some(image));

    vmm.switch_to(a);
    assert_eq!(read_page(&mut vmm, page(0)), &body()[..PAGE_SIZE]);
    vmm.switch_to(b);
    assert_eq!(read_page(&mut vmm, page(0)), &body()[..PAGE_SIZE]);
    check_invariants(&vmm);
    assert_eq!(vmm.storage().block_reads(), 1);
    let frame = frame_at(&vmm, a, page(0));
    assert_eq!(frame_at(&vmm, b, page(0)), frame);
    assert_eq!(vmm.physical().reference_count(frame), Some(2));
    assert_eq!(vmm.memory_summary().shared, 1);

    vmm.write_user(page(0), b"b was here").unwrap();
    check_invariants(&vmm);
    assert_ne!(frame_at(&vmm, b, page(0)), frame);
    vmm.switch_to(a);
    assert_eq!(read_page(&mut vmm, page(0)), &body()[..PAGE_SIZE]);

    // A dirtied page no longer matches the image, so a newcomer reads its own copy.
    vmm.write_user(page(0), b"a was here").unwrap();
    assert_eq!(frame_at(&vmm, a, page(0)), frame);
    let c = process(&mut vmm, Some(image));
    assert_eq!(read_page(&mut vmm, page(0)), &body()[..PAGE_SIZE]);
    check_invariants(&vmm);
    assert_eq!(vmm.storage().block_reads(), 2);
    assert_ne!(frame_at(&vmm, c, page(0)), frame);
}

#[test]
fn shared_clean_pages_are_reclaimed_from_every_mapping() {
    let mut vmm = machine(24, None);
    let image = vmm.storage_mut().add_image(DISK, 12, &body()).unwrap();
    let a = process(&mut vmm, Some(image));
    let b = process(&mut vmm, Some(image));
    for id in [a, b] {
        vmm.switch_to(id);
        for number in 0..3 {
            read_page(&mut vmm, page(number));
        }
    }
    let shared = frame_at(&vmm, a, page(0));
    assert_eq!(vmm.physical().reference_count(shared), Some(2));

    let mut held = Vec::new();
    while let Ok(frame) = vmm.pmm.allocate() {
        held.push(frame);
    }
    assert_eq!(vmm.physical().free_frames(), 0);

    vmm.handle_page_fault(FaultKind::NotPresent, page(10)).unwrap();
    assert!(vmm.entry(b, page(10)).unwrap().is_present());
    for number in 0..3 {
        assert_eq!(vmm.entry(a, page(number)), Some(PageEntry::EMPTY), "page {number}");
    }
    assert_eq!(vmm.entry(b, page(0)), Some(PageEntry::EMPTY));
    assert!(vmm.entry(b, page(1)).unwrap().is_present());

    for frame in held {
        vmm.free_page(frame);
    }
    check_invariants(&vmm);
    assert_eq!(read_page(&mut vmm, page(0)), &body()[..PAGE_SIZE]);
}

#[test]
fn repeated_fault_on_a_loaded_page_changes_nothing() {
    let mut vmm = machine(64, None);
    let image = vmm.storage_mut().add_image(DISK, 12, &body()).unwrap();
    let id = process(&mut vmm, Some(image));

    vmm.handle_page_fault(FaultKind::NotPresent, page(1)).unwrap();
    let frame = frame_at(&vmm, id, page(1));
    let free = vmm.physical().free_frames();
    vmm.handle_page_fault(FaultKind::NotPresent, page(1) + 8).unwrap();
    check_invariants(&vmm);
    assert_eq!(frame_at(&vmm, id, page(1)), frame);
    assert_eq!(vmm.physical().free_frames(), free);
    assert_eq!(vmm.storage().block_reads(), 1);
}

#[test]
fn swapped_page_comes_back_intact() {
    let mut vmm = machine(64, Some((32, 31)));
    let id = process(&mut vmm, None);
    vmm.write_user(page(5), &[0x5A; PAGE_SIZE]).unwrap();

    assert!(vmm.swap_out());
    check_invariants(&vmm);
    let Some(PteState::Swapped(slot)) = vmm.entry(id, page(5)).map(PageEntry::state) else {
        panic!("page was not swapped out");
    };
    assert!(!vmm.swap.is_free(slot));
    assert!(vmm.storage().swap_slot(slot).unwrap().iter().all(|&b| b == 0x5A));

    let reads = vmm.storage().swap_reads();
    assert!(read_page(&mut vmm, page(5)).iter().all(|&b| b == 0x5A));
    check_invariants(&vmm);
    assert_eq!(vmm.storage().swap_reads(), reads + 1);
    assert!(vmm.swap.is_free(slot));
    assert!(vmm.entry(id, page(5)).unwrap().flags().is_dirty());
}

#[test]
fn memory_pressure_cycles_pages_through_swap() {
    // 16 managed frames: 2 for the kernel, 2 for the process directory and table.
    let mut vmm = machine(24, Some((25, 24)));
    process(&mut vmm, None);
    for number in 0..13 {
        vmm.write_user(page(number), &[number as u8 + 1; PAGE_SIZE])
            .unwrap();
        check_invariants(&vmm);
    }
    assert_eq!(vmm.physical().free_frames(), 0);

    for number in 0..13 {
        let bytes = read_page(&mut vmm, page(number));
        assert!(bytes.iter().all(|&b| b == number as u8 + 1), "page {number}");
        check_invariants(&vmm);
    }
}

#[test]
fn exhausted_memory_without_swap_kills_the_process() {
    let mut vmm = machine(24, None);
    let id = process(&mut vmm, None);
    for number in 0..12 {
        vmm.write_user(page(number), b"dirty").unwrap();
    }
    assert_eq!(vmm.physical().free_frames(), 0);

    let err = vmm
        .handle_page_fault(FaultKind::NotPresent, page(12))
        .unwrap_err();
    assert_eq!(err, FaultError::OutOfMemory);
    assert_eq!(err.signal(), Signal::Segv);
    assert_eq!(vmm.write_user(page(12), b"x"), Err(FaultError::OutOfMemory));
    assert_eq!(vmm.entry(id, page(12)), Some(PageEntry::EMPTY));
    check_invariants(&vmm);
}

#[test]
fn ten_slot_device_fills_then_drops_clean_pages() {
    let mut vmm = machine(64, Some((25, 10)));
    let id = process(&mut vmm, None);
    for number in 0..10 {
        vmm.write_user(page(number), &[number as u8; 16]).unwrap();
    }
    let mut clean = [0; 4];
    vmm.read_user(page(20), &mut clean).unwrap();
    assert!(!vmm.entry(id, page(20)).unwrap().flags().is_dirty());

    for used in 1..=10 {
        assert!(vmm.swap_out());
        let status = vmm.swap_status();
        assert_eq!((status.free, status.total), (10 - used, 10));
    }
    check_invariants(&vmm);
    for number in 0..10 {
        let state = vmm.entry(id, page(number)).map(PageEntry::state);
        assert!(matches!(state, Some(PteState::Swapped(_))), "page {number}");
    }
    assert!(vmm.entry(id, page(20)).unwrap().is_present());

    assert!(vmm.swap_out());
    assert_eq!(vmm.entry(id, page(20)), Some(PageEntry::EMPTY));
    assert!(!vmm.swap_out());
    check_invariants(&vmm);

    assert_eq!(read_page(&mut vmm, page(7))[..16], [7; 16]);
    assert_eq!(vmm.swap_status().free, 1);
}

#[test]
fn forked_swap_entry_shares_its_slot() {
    let mut vmm = machine(64, Some((32, 31)));
    let parent = process(&mut vmm, None);
    vmm.write_user(page(3), b"swapped").unwrap();
    assert!(vmm.swap_out());
    let Some(PteState::Swapped(slot)) = vmm.entry(parent, page(3)).map(PageEntry::state) else {
        panic!("page was not swapped out");
    };

    let child = vmm.fork(parent).unwrap();
    check_invariants(&vmm);
    assert_eq!(vmm.swap.reference_count(slot), 2);

    vmm.switch_to(child);
    assert_eq!(&read_page(&mut vmm, page(3))[..7], b"swapped");
    check_invariants(&vmm);
    assert_eq!(vmm.swap.reference_count(slot), 1);
    assert!(!vmm.swap.is_free(slot));

    vmm.switch_to(parent);
    assert_eq!(&read_page(&mut vmm, page(3))[..7], b"swapped");
    check_invariants(&vmm);
    assert!(vmm.swap.is_free(slot));
    assert_ne!(frame_at(&vmm, parent, page(3)), frame_at(&vmm, child, page(3)));
}

#[test]
fn failed_fork_leaves_nothing_behind() {
    let mut vmm = machine(32, None);
    let parent = process(&mut vmm, None);
    vmm.write_user(page(1), b"low").unwrap();
    vmm.write_user(page(ENTRIES_PER_TABLE + 1), b"high").unwrap();

    // Leave room for the child directory and one page table, but not a second table.
    let mut held = Vec::new();
    while vmm.physical().free_frames() > 2 {
        held.push(vmm.allocate_page().unwrap());
    }
    let spaces = vmm.spaces().len();
    assert_eq!(vmm.fork(parent).err(), Some(crate::AllocError::OutOfMemory));
    assert_eq!(vmm.physical().free_frames(), 2);
    assert_eq!(vmm.spaces().len(), spaces);
    assert_eq!(vmm.current(), parent);

    for frame in held {
        vmm.free_page(frame);
    }
    check_invariants(&vmm);
    assert_eq!(&read_page(&mut vmm, page(ENTRIES_PER_TABLE + 1))[..4], b"high");
}

#[test]
fn clean_pages_are_reclaimed_without_swap() {
    let mut vmm = machine(24, None);
    let id = process(&mut vmm, None);
    for number in 0..12 {
        read_page(&mut vmm, page(number));
    }
    assert_eq!(vmm.physical().free_frames(), 0);

    vmm.write_user(page(12), b"fresh").unwrap();
    check_invariants(&vmm);
    assert_eq!(vmm.entry(id, page(0)), Some(PageEntry::EMPTY));
    assert!(vmm.entry(id, page(12)).unwrap().is_present());
    assert!(!vmm.swap_status().enabled);
}

#[test]
fn failed_swap_write_keeps_the_page() {
    let mut vmm = machine(64, Some((32, 31)));
    let id = process(&mut vmm, None);
    vmm.write_user(page(0), b"keep me").unwrap();
    read_page(&mut vmm, page(1));
    vmm.storage_mut().set_fail_swap_writes(true);

    assert!(vmm.swap_out());
    check_invariants(&vmm);
    assert!(vmm.entry(id, page(0)).unwrap().is_present());
    assert_eq!(vmm.entry(id, page(1)), Some(PageEntry::EMPTY));
    assert_eq!(vmm.swap_status().free, 31);

    assert!(!vmm.swap_out());
    assert_eq!(&read_page(&mut vmm, page(0))[..7], b"keep me");
}

#[test]
fn exit_returns_every_page_and_slot() {
    let mut vmm = machine(64, Some((32, 31)));
    let free = vmm.physical().free_frames();
    let parent = process(&mut vmm, None);
    for number in 0..4 {
        vmm.write_user(page(number * 300), b"data").unwrap();
    }
    assert!(vmm.swap_out());
    let child = vmm.fork(parent).unwrap();
    vmm.switch_to(child);
    vmm.write_user(page(300), b"mine").unwrap();
    check_invariants(&vmm);

    vmm.destroy_address_space(child);
    check_invariants(&vmm);
    vmm.destroy_address_space(parent);
    check_invariants(&vmm);

    assert_eq!(vmm.current(), SpaceId::KERNEL);
    assert_eq!(vmm.physical().free_frames(), free);
    assert_eq!(vmm.swap_status().free, 31);
    assert_eq!(vmm.memory_summary().spaces.len(), 1);
}
