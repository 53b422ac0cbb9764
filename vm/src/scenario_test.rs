//! Whole-subsystem scenarios over emulated memory, swap, files and page tables.

use crate::emulation::{test_vm, MemoryFile, SoftPageTable};
use crate::file::MappedFile;
use crate::page::PageTarget;
use crate::{AddressSpaceId, PageFault, PageType, SegmentLoader, VirtualMemory, VmError};
use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

const BASE: usize = 0x0804_8000;

fn setup(frames: usize, swap_slots: u32) -> (VirtualMemory, AddressSpaceId) {
    let vm = test_vm(frames, swap_slots);
    let space = vm.create_address_space(Box::new(SoftPageTable::new()));
    (vm, space)
}

fn read_fault(addr: usize) -> PageFault {
    PageFault {
        addr,
        user: true,
        write: false,
        not_present: true,
        stack_pointer: 0,
    }
}

fn pattern(seed: u8) -> Vec<u8> {
    (0..PAGE_FRAME_SIZE)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

fn page_bytes(vm: &VirtualMemory, space: AddressSpaceId, va: usize) -> Vec<u8> {
    let mut buf = vec![0; PAGE_FRAME_SIZE];
    vm.copy_from_user(space, va, &mut buf).unwrap();
    buf
}

#[test]
fn claimed_page_is_resident_and_mapped_as_declared() {
    let (vm, space) = setup(4, 4);
    vm.alloc_page(space, PageTarget::Anon, BASE, true).unwrap();
    vm.alloc_page(space, PageTarget::Anon, BASE + PAGE_FRAME_SIZE, false).unwrap();

    for (va, writable) in [(BASE, true), (BASE + PAGE_FRAME_SIZE, false)] {
        vm.claim_page(space, va).unwrap();
        let info = vm.lookup_page(space, va).unwrap();
        assert!(info.resident && !info.pending);
        assert_eq!(info.page_type, PageType::Anon);

        let state = vm.lock();
        let table = state.space(space).unwrap().page_table();
        assert!(table.translate(va).is_some());
        assert_eq!(table.is_writable(va), writable);
    }
    assert_eq!(vm.claim_page(space, BASE), Err(VmError::AlreadyResident(BASE)));
    assert_eq!(vm.claim_page(space, 0x4000), Err(VmError::NotMapped(0x4000)));
    vm.verify().unwrap();
}

#[test]
fn anonymous_page_survives_swap() {
    let (vm, space) = setup(4, 4);
    vm.alloc_page(space, PageTarget::Anon, BASE, true).unwrap();
    let contents = pattern(3);
    vm.copy_to_user(space, BASE, &contents).unwrap();

    vm.evict_page(space, BASE).unwrap();
    let info = vm.lookup_page(space, BASE).unwrap();
    assert!(!info.resident);
    assert!(info.swap_slot.is_some());
    assert_eq!(vm.stats().swap_slots_used, 1);
    assert_eq!(vm.stats().frames_resident, 0);
    vm.verify().unwrap();

    vm.fault(space, &read_fault(BASE + 17)).unwrap();
    assert_eq!(page_bytes(&vm, space, BASE), contents);
    assert_eq!(vm.lookup_page(space, BASE).unwrap().swap_slot, None);
    assert_eq!(vm.stats().swap_slots_used, 0);
    vm.verify().unwrap();
}

#[test]
fn dirty_file_page_is_written_back_on_eviction() {
    let (vm, space) = setup(4, 4);
    let file = MemoryFile::new(vec![b'.'; 2 * PAGE_FRAME_SIZE]);
    vm.mmap(space, BASE, 2 * PAGE_FRAME_SIZE, true, &file, 0).unwrap();

    let second = BASE + PAGE_FRAME_SIZE;
    let contents = pattern(9);
    vm.copy_to_user(space, second, &contents).unwrap();
    vm.evict_page(space, second).unwrap();

    let data = file.contents();
    assert_eq!(&data.lock()[PAGE_FRAME_SIZE..], &contents[..]);
    // No swap slot is used for file pages.
    assert_eq!(vm.stats().swap_slots_used, 0);
    assert_eq!(page_bytes(&vm, space, second), contents);
}

#[test]
fn clean_file_page_is_dropped_on_eviction() {
    let (vm, space) = setup(4, 4);
    let file = MemoryFile::new(vec![b'a'; PAGE_FRAME_SIZE]);
    vm.mmap(space, BASE, PAGE_FRAME_SIZE, true, &file, 0).unwrap();
    assert_eq!(page_bytes(&vm, space, BASE)[0], b'a');

    // Someone else writes the file while the page is resident and clean.
    file.contents().lock()[0] = b'z';
    vm.evict_page(space, BASE).unwrap();
    assert_eq!(file.contents().lock()[0], b'z');
    assert_eq!(page_bytes(&vm, space, BASE)[0], b'z');
}

#[test]
fn destroying_twice_frees_nothing_extra() {
    let (vm, space) = setup(2, 4);
    let file = MemoryFile::new(vec![1; PAGE_FRAME_SIZE]);
    vm.mmap(space, BASE, PAGE_FRAME_SIZE, true, &file, 0).unwrap();
    for i in 1..=3 {
        let va = BASE + i * PAGE_FRAME_SIZE;
        vm.alloc_page(space, PageTarget::Anon, va, true).unwrap();
        vm.copy_to_user(space, va, &[i as u8; 8]).unwrap();
    }
    vm.copy_to_user(space, BASE, b"dirty").unwrap();
    let before = vm.stats();
    assert_eq!(before.frames_resident, 2);
    assert!(before.swap_slots_used >= 1);

    vm.destroy_address_space(space).unwrap();
    let after = vm.stats();
    assert_eq!(after.frames_resident, 0);
    assert_eq!(after.swap_slots_used, 0);
    assert!(vm.lookup_page(space, BASE).is_none());
    assert_eq!(file.closes(), 1);

    vm.destroy_address_space(space).unwrap();
    assert_eq!(vm.stats(), after);
    assert_eq!(file.closes(), 1);

    // The emptied space can be used again.
    vm.alloc_page(space, PageTarget::Anon, BASE, true).unwrap();
    vm.claim_page(space, BASE).unwrap();
    vm.release_address_space(space).unwrap();
    assert_eq!(vm.stats().frames_resident, 0);
    assert_eq!(vm.claim_page(space, BASE), Err(VmError::UnknownAddressSpace));
}

#[test]
fn mapping_tail_is_zero_and_never_written_back() {
    let (vm, space) = setup(4, 4);
    let file_length = PAGE_FRAME_SIZE + 1904;
    let file = MemoryFile::new(vec![b'f'; file_length]);
    vm.mmap(space, BASE, file_length, true, &file, 0).unwrap();

    let second = BASE + PAGE_FRAME_SIZE;
    let loaded = page_bytes(&vm, space, second);
    assert!(loaded[..1904].iter().all(|&b| b == b'f'));
    assert!(loaded[1904..].iter().all(|&b| b == 0));

    vm.copy_to_user(space, second, &[b'w'; PAGE_FRAME_SIZE]).unwrap();
    vm.munmap(space, BASE).unwrap();

    let data = file.contents();
    let data = data.lock();
    assert_eq!(data.len(), file_length);
    assert!(data[..PAGE_FRAME_SIZE].iter().all(|&b| b == b'f'));
    assert!(data[PAGE_FRAME_SIZE..].iter().all(|&b| b == b'w'));
}

#[test]
fn small_file_maps_to_one_zero_padded_page() {
    let (vm, space) = setup(4, 4);
    let file = MemoryFile::new(vec![0xAB; 3000]);
    vm.mmap(space, BASE, 3000, false, &file, 0).unwrap();

    let info = vm.lookup_page(space, BASE).unwrap();
    assert_eq!(info.page_type, PageType::File);
    assert!(info.pending && !info.writable);
    assert!(vm.lookup_page(space, BASE + PAGE_FRAME_SIZE).is_none());
    {
        let state = vm.lock();
        let page = state.space(space).unwrap().spt().lookup(BASE).unwrap();
        assert_eq!(page.file_backing().unwrap().read_bytes(), 3000);
    }

    vm.fault(space, &read_fault(BASE + 100)).unwrap();
    let bytes = page_bytes(&vm, space, BASE);
    assert!(bytes[..3000].iter().all(|&b| b == 0xAB));
    assert_eq!(bytes[3000..].len(), 1096);
    assert!(bytes[3000..].iter().all(|&b| b == 0));

    let write = PageFault {
        write: true,
        ..read_fault(BASE)
    };
    // Resident now, so the MMU reports a protection fault.
    assert_eq!(
        vm.fault(space, &PageFault { not_present: false, ..write }),
        Err(VmError::ProtectionViolation(BASE))
    );
}

#[test]
fn full_pool_evicts_exactly_one_frame() {
    const FRAMES: usize = 4;
    let (vm, space) = setup(FRAMES, 8);
    for i in 0..FRAMES {
        let va = BASE + i * PAGE_FRAME_SIZE;
        vm.alloc_page(space, PageTarget::Anon, va, true).unwrap();
        // Touch every page so all accessed bits start out set.
        vm.copy_to_user(space, va, &[i as u8 + 1]).unwrap();
    }
    assert_eq!(vm.stats().frames_resident, FRAMES);
    assert_eq!(vm.stats().evictions, 0);

    let extra = BASE + FRAMES * PAGE_FRAME_SIZE;
    vm.alloc_page(space, PageTarget::Anon, extra, true).unwrap();
    vm.claim_page(space, extra).unwrap();

    let stats = vm.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.frames_resident, FRAMES);
    assert!(stats.frames_resident <= stats.frames_capacity);
    assert!(vm.lookup_page(space, extra).unwrap().resident);

    let evicted: Vec<usize> = (0..FRAMES)
        .map(|i| BASE + i * PAGE_FRAME_SIZE)
        .filter(|&va| !vm.lookup_page(space, va).unwrap().resident)
        .collect();
    assert_eq!(evicted.len(), 1);
    assert!(vm.lookup_page(space, evicted[0]).unwrap().swap_slot.is_some());
    vm.verify().unwrap();

    // Every page still reads back what was written.
    for i in 0..FRAMES {
        let mut byte = [0u8];
        vm.copy_from_user(space, BASE + i * PAGE_FRAME_SIZE, &mut byte).unwrap();
        assert_eq!(byte[0], i as u8 + 1);
    }
    vm.verify().unwrap();
}

#[test]
fn eviction_fails_when_swap_is_full() {
    let (vm, space) = setup(1, 0);
    vm.alloc_page(space, PageTarget::Anon, BASE, true).unwrap();
    vm.alloc_page(space, PageTarget::Anon, BASE + PAGE_FRAME_SIZE, true).unwrap();
    vm.claim_page(space, BASE).unwrap();

    let err = vm.claim_page(space, BASE + PAGE_FRAME_SIZE).unwrap_err();
    assert_eq!(err, VmError::OutOfSwap);
    assert!(!err.is_process_fatal());
    assert!(vm.lookup_page(space, BASE).unwrap().resident);
    assert!(!vm.lookup_page(space, BASE + PAGE_FRAME_SIZE).unwrap().resident);
    vm.verify().unwrap();
}

#[test]
fn failed_loader_leaves_page_pending() {
    let (vm, space) = setup(2, 2);
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let loader = move |_va: usize, _frame: &mut [u8]| -> crate::Result<()> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(VmError::File(crate::file::FileError::Io))
        } else {
            Ok(())
        }
    };
    vm.create_pending_page(space, BASE, true, PageTarget::Anon, Some(Arc::new(loader)))
        .unwrap();

    assert!(vm.fault(space, &read_fault(BASE)).is_err());
    let info = vm.lookup_page(space, BASE).unwrap();
    assert!(info.pending && !info.resident);
    assert_eq!(vm.stats().frames_resident, 0);
    assert!(vm.lock().space(space).unwrap().page_table().translate(BASE).is_none());

    vm.fault(space, &read_fault(BASE)).unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(!vm.lookup_page(space, BASE).unwrap().pending);
}

#[test]
fn segment_pages_swap_like_anonymous_memory() {
    let (vm, space) = setup(2, 2);
    let image: Vec<u8> = (0..200u8).collect();
    let executable = MemoryFile::new(image.clone());
    let file = Arc::new(MappedFile::reopen(&executable).unwrap());
    let loader = SegmentLoader::new(file, 100, 100);
    vm.create_pending_page(space, BASE, true, PageTarget::Anon, Some(Arc::new(loader)))
        .unwrap();

    let mut text = [0u8; 100];
    vm.copy_from_user(space, BASE, &mut text).unwrap();
    assert_eq!(&text[..], &image[100..]);

    vm.copy_to_user(space, BASE, b"data").unwrap();
    vm.evict_page(space, BASE).unwrap();
    assert_eq!(vm.stats().swap_slots_used, 1);
    assert_eq!(&executable.contents().lock()[..], &image[..]);

    vm.copy_from_user(space, BASE, &mut text[..4]).unwrap();
    assert_eq!(&text[..4], b"data");
}

#[test]
fn fork_copies_resident_pages_and_reruns_loaders() {
    let (vm, parent) = setup(8, 8);
    vm.alloc_page(parent, PageTarget::Anon, BASE, true).unwrap();
    let contents = pattern(42);
    vm.copy_to_user(parent, BASE, &contents).unwrap();

    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();
    let loader = move |va: usize, frame: &mut [u8]| -> crate::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        frame[0] = (va / PAGE_FRAME_SIZE) as u8;
        Ok(())
    };
    let lazy = BASE + PAGE_FRAME_SIZE;
    vm.create_pending_page(parent, lazy, false, PageTarget::Anon, Some(Arc::new(loader)))
        .unwrap();

    let child = vm.fork(parent, Box::new(SoftPageTable::new())).unwrap();
    assert_eq!(page_bytes(&vm, child, BASE), contents);
    {
        let state = vm.lock();
        let parent_frame = state.space(parent).unwrap().page_table().translate(BASE);
        let child_frame = state.space(child).unwrap().page_table().translate(BASE);
        assert!(parent_frame.is_some() && child_frame.is_some());
        assert_ne!(parent_frame, child_frame);
    }

    // Writes in the child do not show up in the parent.
    vm.copy_to_user(child, BASE, b"child").unwrap();
    assert_eq!(page_bytes(&vm, parent, BASE), contents);

    let info = vm.lookup_page(child, lazy).unwrap();
    assert!(info.pending && !info.writable);
    assert_eq!(loads.load(Ordering::SeqCst), 0);
    vm.fault(child, &read_fault(lazy)).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(page_bytes(&vm, child, lazy)[0], (lazy / PAGE_FRAME_SIZE) as u8);
    assert!(vm.lookup_page(parent, lazy).unwrap().pending);
    vm.fault(parent, &read_fault(lazy)).unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    vm.verify().unwrap();
}

#[test]
fn forked_mapping_closes_its_file_once() {
    let (vm, parent) = setup(4, 4);
    let file = MemoryFile::new(vec![b'm'; 2 * PAGE_FRAME_SIZE]);
    vm.mmap(parent, BASE, 2 * PAGE_FRAME_SIZE, true, &file, 0).unwrap();
    vm.copy_to_user(parent, BASE, b"parent").unwrap();

    let child = vm.fork(parent, Box::new(SoftPageTable::new())).unwrap();
    let mut buf = [0u8; 6];
    vm.copy_from_user(child, BASE, &mut buf).unwrap();
    assert_eq!(&buf, b"parent");
    let second = vm.lookup_page(child, BASE + PAGE_FRAME_SIZE).unwrap();
    assert!(second.pending && !second.resident);

    vm.munmap(parent, BASE).unwrap();
    assert_eq!(file.closes(), 0);
    assert_eq!(&file.contents().lock()[..6], b"parent");

    vm.release_address_space(child).unwrap();
    assert_eq!(file.closes(), 1);
    assert_eq!(vm.stats().frames_resident, 0);
}
