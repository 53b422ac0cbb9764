//! Kernel access to user memory, for system calls that take user buffers.
//!
//! The kernel does not fault on user pages here; it faults them in itself
//! and sets the bits the MMU would have set.

use crate::address_space::AddressSpaceId;
use crate::error::{Result, VmError};
use crate::mem::FrameId;
use crate::virtual_memory::{VirtualMemory, VmState};
use kidneyos_shared::mem::{page_offset, page_round_down, PAGE_FRAME_SIZE};

impl VmState {
    /// Make sure `[addr, addr + len)` is user memory.
    fn check_user_range(&self, addr: usize, len: usize) -> Result<()> {
        if addr == 0 {
            return Err(VmError::NullAddress);
        }
        match addr.checked_add(len) {
            Some(end) if end <= self.config.user_limit => Ok(()),
            _ => Err(VmError::KernelAddress(addr)),
        }
    }

    /// The frame holding the page at `va`, claiming it first if needed.
    fn user_frame(&mut self, id: AddressSpaceId, va: usize, write: bool) -> Result<FrameId> {
        let page = self.space(id)?.spt.lookup(va).ok_or(VmError::NotMapped(va))?;
        if write && !page.writable() {
            return Err(VmError::WriteToReadOnly(va));
        }
        if !page.is_resident() {
            self.claim(id, va)?;
        }

        let space = self.space_mut(id)?;
        let frame = space
            .spt
            .lookup(va)
            .and_then(|page| page.frame())
            .ok_or(VmError::NotMapped(va))?;
        space.page_table.set_accessed(va, true);
        if write {
            space.page_table.set_dirty(va, true);
        }
        Ok(frame)
    }
}

impl VirtualMemory {
    /// Copy `buf.len()` bytes of user memory at `addr` into `buf`.
    pub fn copy_from_user(&self, space: AddressSpaceId, addr: usize, buf: &mut [u8]) -> Result<()> {
        let mut state = self.lock();
        state.check_user_range(addr, buf.len())?;
        let mut done = 0;
        while done < buf.len() {
            let at = addr + done;
            let offset = page_offset(at);
            let n = (PAGE_FRAME_SIZE - offset).min(buf.len() - done);
            let frame = state.user_frame(space, page_round_down(at), false)?;
            buf[done..done + n].copy_from_slice(&state.pool.bytes(frame)?[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy `data` into user memory at `addr`.
    pub fn copy_to_user(&self, space: AddressSpaceId, addr: usize, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        state.check_user_range(addr, data.len())?;
        let mut done = 0;
        while done < data.len() {
            let at = addr + done;
            let offset = page_offset(at);
            let n = (PAGE_FRAME_SIZE - offset).min(data.len() - done);
            let frame = state.user_frame(space, page_round_down(at), true)?;
            state.pool.bytes_mut(frame)?[offset..offset + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
