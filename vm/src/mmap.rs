//! Memory-mapped files.

use crate::address_space::AddressSpaceId;
use crate::error::{MmapError, Result, VmError};
use crate::file::{File, MappedFile};
use crate::page::file::{FileBacking, Mapping};
use crate::page::{Page, PageTarget};
use crate::virtual_memory::{destroy_page, VirtualMemory, VmState};
use alloc::sync::Arc;
use kidneyos_shared::mem::{is_page_aligned, pages_spanned, PAGE_FRAME_SIZE};
use log::{debug, warn};

impl VmState {
    pub(crate) fn map_file(
        &mut self,
        id: AddressSpaceId,
        addr: usize,
        length: usize,
        writable: bool,
        file: &dyn File,
        offset: u64,
    ) -> Result<usize> {
        if addr == 0 || !is_page_aligned(addr) || addr >= self.config.user_limit {
            return Err(MmapError::BadAddress.into());
        }
        if offset % PAGE_FRAME_SIZE as u64 != 0 {
            return Err(MmapError::BadOffset.into());
        }
        let pages = pages_spanned(length);
        if length == 0 || pages > self.config.max_mmap_pages {
            return Err(MmapError::BadLength.into());
        }
        let end = pages
            .checked_mul(PAGE_FRAME_SIZE)
            .and_then(|size| addr.checked_add(size));
        if end.map_or(true, |end| end > self.config.user_limit) {
            return Err(MmapError::BadLength.into());
        }
        if offset.checked_add((pages * PAGE_FRAME_SIZE) as u64).is_none() {
            return Err(MmapError::BadOffset.into());
        }
        if file.length() == 0 {
            return Err(MmapError::EmptyFile.into());
        }

        let space = self.space_mut(id)?;
        if let Some(va) = space.spt.first_in_range(addr, pages) {
            return Err(VmError::AlreadyMapped(va));
        }

        let mapped = Arc::new(MappedFile::reopen(file)?);
        let file_length = mapped.length();
        let mapping = Mapping {
            start: addr,
            page_count: pages,
        };
        for i in 0..pages {
            let va = addr + i * PAGE_FRAME_SIZE;
            let page_offset = offset + (i * PAGE_FRAME_SIZE) as u64;
            let in_file = file_length.saturating_sub(page_offset);
            let read_bytes = (length - i * PAGE_FRAME_SIZE)
                .min(PAGE_FRAME_SIZE)
                .min(usize::try_from(in_file).unwrap_or(usize::MAX));

            let backing = FileBacking::new(mapped.clone(), page_offset, read_bytes, Some(mapping));
            if let Err(e) = space
                .spt
                .create_pending(va, writable, PageTarget::File(backing), None)
            {
                for created in (addr..va).step_by(PAGE_FRAME_SIZE) {
                    space.spt.remove(created);
                }
                return Err(e);
            }
        }
        debug!(
            "mapped {length} bytes at offset {offset} to {addr:#X}..{:#X} in {id}",
            mapping.end()
        );
        Ok(addr)
    }

    pub(crate) fn unmap_file(&mut self, id: AddressSpaceId, addr: usize) -> Result<()> {
        let space = self.spaces.get_mut(&id).ok_or(VmError::UnknownAddressSpace)?;
        let first = space
            .spt
            .lookup(addr)
            .filter(|page| page.mapping().is_some_and(|m| m.start == addr))
            .ok_or(VmError::InvalidMapping(MmapError::NotAMapping))?;
        let mapping = first.mapping().ok_or(VmError::InvalidMapping(MmapError::NotAMapping))?;
        // Held until the whole range is gone, so the handle closes once, here.
        let handle = first.file_backing().map(|backing| backing.file().clone());

        let mut first_error = None;
        for i in 0..mapping.page_count {
            let va = mapping.start + i * PAGE_FRAME_SIZE;
            if space.spt.lookup(va).and_then(Page::mapping) != Some(mapping) {
                continue;
            }
            let Some(mut page) = space.spt.remove(va) else {
                continue;
            };
            let result = destroy_page(
                &mut self.pool,
                &mut self.swap,
                id,
                space.page_table.as_mut(),
                &mut page,
            );
            if let Err(e) = result {
                warn!("unmapping {va:#X} of {id}: {e}");
                first_error.get_or_insert(e);
            }
        }
        drop(handle);
        debug!("unmapped {:#X}..{:#X} in {id}", mapping.start, mapping.end());
        first_error.map_or(Ok(()), Err)
    }
}

impl VirtualMemory {
    /// Map `length` bytes of `file`, starting at `offset`, at `addr`.
    ///
    /// The mapping reads through its own handle, so the caller may close
    /// `file` right away. Pages are loaded on first access; bytes past the end
    /// of the file read as zero and are never written back. Returns `addr`.
    pub fn mmap(
        &self,
        space: AddressSpaceId,
        addr: usize,
        length: usize,
        writable: bool,
        file: &dyn File,
        offset: u64,
    ) -> Result<usize> {
        self.lock()
            .map_file(space, addr, length, writable, file, offset)
    }

    /// Remove the mapping that starts at `addr`, writing dirty pages back.
    pub fn munmap(&self, space: AddressSpaceId, addr: usize) -> Result<()> {
        self.lock().unmap_file(space, addr)
    }
}
