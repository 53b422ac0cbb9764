use crate::mem::PhysFrame;
use crate::paging::{MapError, PageTable};
use alloc::collections::BTreeMap;
use core::fmt;
use kidneyos_shared::mem::{is_kernel_vaddr, is_page_aligned};
use kidneyos_shared::paging::{PageTableEntry, VirtualAddress};

/// x86 page table entries kept in a map instead of a page directory. Nothing
/// sets the accessed and dirty bits on its own; callers do what the MMU
/// would.
#[derive(Default)]
pub struct SoftPageTable {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl SoftPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, va: usize) -> Option<&PageTableEntry> {
        self.entries.get(&VirtualAddress::new(va).page_number())
    }

    fn update(&mut self, va: usize, f: impl FnOnce(PageTableEntry) -> PageTableEntry) {
        if let Some(entry) = self.entries.get_mut(&VirtualAddress::new(va).page_number()) {
            *entry = f(*entry);
        }
    }
}

impl fmt::Debug for SoftPageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftPageTable")
            .field("mapped", &self.entries.len())
            .finish()
    }
}

impl PageTable for SoftPageTable {
    fn map(&mut self, va: usize, frame: PhysFrame, writable: bool) -> Result<(), MapError> {
        if !is_page_aligned(va) || is_kernel_vaddr(va) || self.entry(va).is_some() {
            return Err(MapError::BadAddress);
        }
        let entry = PageTableEntry::user(frame.number(), writable).ok_or(MapError::BadFrame)?;
        self.entries.insert(VirtualAddress::new(va).page_number(), entry);
        Ok(())
    }

    fn unmap(&mut self, va: usize) {
        self.entries.remove(&VirtualAddress::new(va).page_number());
    }

    fn translate(&self, va: usize) -> Option<PhysFrame> {
        self.entry(va).map(|entry| PhysFrame::new(entry.frame_number()))
    }

    fn is_writable(&self, va: usize) -> bool {
        self.entry(va).is_some_and(|entry| entry.read_write())
    }

    fn is_accessed(&self, va: usize) -> bool {
        self.entry(va).is_some_and(|entry| entry.accessed())
    }

    fn set_accessed(&mut self, va: usize, accessed: bool) {
        self.update(va, |entry| entry.with_accessed(accessed));
    }

    fn is_dirty(&self, va: usize) -> bool {
        self.entry(va).is_some_and(|entry| entry.dirty())
    }

    fn set_dirty(&mut self, va: usize, dirty: bool) {
        self.update(va, |entry| entry.with_dirty(dirty));
    }
}
