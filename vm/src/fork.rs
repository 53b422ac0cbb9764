//! Address space duplication for `fork`.
//!
//! The child gets its own copy of every resident or swapped page at fork
//! time. Pages still pending in the parent stay pending in the child and run
//! the same loader on their own first fault.

use crate::address_space::AddressSpaceId;
use crate::error::{Result, VmError};
use crate::mem::FrameId;
use crate::page::{PageKind, PageType};
use crate::paging::PageTable;
use crate::virtual_memory::{Fill, VirtualMemory, VmState};
use alloc::boxed::Box;
use log::{debug, warn};

impl VmState {
    pub(crate) fn duplicate(&mut self, dst: AddressSpaceId, src: AddressSpaceId) -> Result<()> {
        self.space(dst)?;
        let addresses = self.space(src)?.spt.addresses();
        for &va in &addresses {
            self.duplicate_page(dst, src, va)?;
        }
        debug!("copied {} pages of {src} into {dst}", addresses.len());
        Ok(())
    }

    fn duplicate_page(&mut self, dst: AddressSpaceId, src: AddressSpaceId, va: usize) -> Result<()> {
        let source = self.space(src)?;
        let page = source.spt.lookup(va).ok_or(VmError::NotMapped(va))?;
        let descriptor = page.fork_descriptor();
        let dirty = page.is_resident() && source.page_table.is_dirty(va);
        let fill = match (page.frame(), page.kind()) {
            (Some(frame), _) => Some(Fill::Frame(frame)),
            (None, PageKind::Anon(anon)) => anon.slot().map(Fill::Slot),
            (None, _) => None,
        };
        let page_type = page.page_type();
        self.space_mut(dst)?.spt.insert(descriptor)?;

        let result = match fill {
            Some(Fill::Frame(frame)) => self.copy_resident(dst, va, frame, page_type == PageType::File && dirty),
            Some(fill) => self.install(dst, va, fill).map(|_| ()),
            None => Ok(()),
        };
        if result.is_err() {
            // The descriptor was never filled; nothing else refers to it.
            self.space_mut(dst)?.spt.remove(va);
        }
        result
    }

    fn copy_resident(&mut self, dst: AddressSpaceId, va: usize, frame: FrameId, dirty: bool) -> Result<()> {
        self.pool.set_pinned(frame, true)?;
        let result = self.install(dst, va, Fill::Frame(frame));
        self.pool.set_pinned(frame, false)?;
        result?;
        // A file page copy differs from the file exactly where the parent's
        // did.
        if dirty {
            self.space_mut(dst)?.page_table.set_dirty(va, true);
        }
        Ok(())
    }

    pub(crate) fn fork_space(&mut self, src: AddressSpaceId, page_table: Box<dyn PageTable>) -> Result<AddressSpaceId> {
        self.space(src)?;
        let child = self.create_space(page_table);
        if let Err(e) = self.duplicate(child, src) {
            warn!("fork of {src} failed: {e}");
            if let Err(cleanup) = self.destroy_space(child) {
                warn!("cleaning up the child of {src}: {cleanup}");
            }
            self.spaces.remove(&child);
            return Err(e);
        }
        Ok(child)
    }
}

impl VirtualMemory {
    /// Copy every page of `src` into `dst`, which should be empty.
    ///
    /// On failure `dst` holds the pages copied so far, each of which can be
    /// destroyed normally. The page that failed is not added.
    pub fn duplicate_address_space(&self, dst: AddressSpaceId, src: AddressSpaceId) -> Result<()> {
        self.lock().duplicate(dst, src)
    }

    /// Create a child of `src` mapped through `page_table`.
    pub fn fork(&self, src: AddressSpaceId, page_table: Box<dyn PageTable>) -> Result<AddressSpaceId> {
        self.lock().fork_space(src, page_table)
    }
}
