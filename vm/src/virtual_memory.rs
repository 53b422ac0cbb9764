//! The VM core: every address space, the frame pool, and swap, behind one lock.

use crate::address_space::{AddressSpace, AddressSpaceId};
use crate::block::BlockDevice;
use crate::config::VmConfig;
use crate::error::{Result, VmError};
use crate::mem::{FrameId, FramePool, FrameSource, SwapSlot, SwapTable};
use crate::page::{Page, PageInfo, PageKind, PageLoader, PageRef, PageTarget};
use crate::paging::PageTable;
use crate::sync::{Mutex, MutexGuard};
use alloc::{boxed::Box, collections::BTreeMap, sync::Arc};
use kidneyos_shared::mem::{page_round_down, PAGE_FRAME_SIZE};
use log::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub frames_capacity: usize,
    pub frames_resident: usize,
    pub swap_slots: u32,
    pub swap_slots_used: u32,
    pub evictions: u64,
}

/// How a newly bound frame gets its contents.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fill {
    /// The page's own swap-in: run its loader, read its file range, or bring
    /// it back from swap.
    SwapIn,
    /// Copy another resident frame.
    Frame(FrameId),
    /// Read a swap slot that stays allocated to someone else.
    Slot(SwapSlot),
}

pub struct VmState {
    pub(crate) config: VmConfig,
    pub(crate) pool: FramePool,
    pub(crate) swap: SwapTable,
    pub(crate) spaces: BTreeMap<AddressSpaceId, AddressSpace>,
    next_id: u32,
}

impl VmState {
    pub(crate) fn space(&self, id: AddressSpaceId) -> Result<&AddressSpace> {
        self.spaces.get(&id).ok_or(VmError::UnknownAddressSpace)
    }

    pub(crate) fn space_mut(&mut self, id: AddressSpaceId) -> Result<&mut AddressSpace> {
        self.spaces.get_mut(&id).ok_or(VmError::UnknownAddressSpace)
    }

    pub(crate) fn create_space(&mut self, page_table: Box<dyn PageTable>) -> AddressSpaceId {
        self.next_id += 1;
        let id = AddressSpaceId::new(self.next_id);
        self.spaces.insert(id, AddressSpace::new(page_table));
        id
    }

    /// A frame with no owner: a free one if the allocator has any, otherwise
    /// a zeroed victim.
    fn acquire_frame(&mut self) -> Result<FrameId> {
        match self.pool.try_alloc() {
            Some(frame) => Ok(frame),
            None => self.evict_frame(),
        }
    }

    fn evict_frame(&mut self) -> Result<FrameId> {
        let spaces = &mut self.spaces;
        let victim = self
            .pool
            .select_victim(&mut |owner| {
                let Some(space) = spaces.get_mut(&owner.space) else {
                    return false;
                };
                let accessed = space.page_table.is_accessed(owner.va);
                if accessed {
                    space.page_table.set_accessed(owner.va, false);
                }
                accessed
            })
            .ok_or(VmError::OutOfFrames)?;
        let owner = self
            .pool
            .get(victim)
            .and_then(|frame| frame.owner())
            .ok_or(VmError::FrameOwnerMismatch)?;

        self.swap_out(owner, victim)?;
        self.pool.bytes_mut(victim)?.fill(0);
        self.pool.record_eviction();
        debug!(
            "evicted {:#X} of {} from frame {victim} after inspecting {} frames",
            owner.va,
            owner.space,
            self.pool.last_inspected()
        );
        Ok(victim)
    }

    /// Save a resident page and take its frame away, leaving the frame
    /// registered but unowned.
    fn swap_out(&mut self, owner: PageRef, frame: FrameId) -> Result<()> {
        let space = self
            .spaces
            .get_mut(&owner.space)
            .ok_or(VmError::UnknownAddressSpace)?;
        let page = space.spt.lookup_mut(owner.va).ok_or(VmError::FrameOwnerMismatch)?;
        if page.frame() != Some(frame) {
            error!("frame {frame} is owned by {:#X}, which does not point back", owner.va);
            return Err(VmError::FrameOwnerMismatch);
        }

        let dirty = space.page_table.is_dirty(owner.va);
        page.swap_out(self.pool.bytes(frame)?, dirty, &mut self.swap)?;
        space.page_table.unmap(owner.va);
        page.detach();
        self.pool.unbind(frame, owner)
    }

    /// Bind a frame to the non-resident page at `va`, map it, and fill it.
    /// On failure the page is left exactly as it was.
    pub(crate) fn install(&mut self, id: AddressSpaceId, va: usize, fill: Fill) -> Result<FrameId> {
        let frame = self.acquire_frame()?;
        match self.bind_and_fill(id, va, frame, fill) {
            Ok(()) => Ok(frame),
            Err(e) => {
                self.abandon(id, va, frame);
                Err(e)
            }
        }
    }

    fn bind_and_fill(&mut self, id: AddressSpaceId, va: usize, frame: FrameId, fill: Fill) -> Result<()> {
        let space = self.spaces.get_mut(&id).ok_or(VmError::UnknownAddressSpace)?;
        let page = space.spt.lookup_mut(va).ok_or(VmError::NotMapped(va))?;
        if page.is_resident() {
            return Err(VmError::AlreadyResident(va));
        }

        self.pool.bind(frame, PageRef { space: id, va })?;
        page.attach(frame);
        space
            .page_table
            .map(va, self.pool.phys(frame)?, page.writable())?;

        match fill {
            Fill::SwapIn => page.swap_in(self.pool.bytes_mut(frame)?, &mut self.swap),
            Fill::Frame(src) => self.pool.copy(src, frame),
            Fill::Slot(slot) => self.swap.read_page(slot, self.pool.bytes_mut(frame)?),
        }
    }

    /// Undo a partial `bind_and_fill` and give the frame back.
    fn abandon(&mut self, id: AddressSpaceId, va: usize, frame: FrameId) {
        if let Some(space) = self.spaces.get_mut(&id) {
            if let Some(page) = space.spt.lookup_mut(va) {
                if page.frame() == Some(frame) {
                    page.detach();
                    space.page_table.unmap(va);
                }
            }
        }
        let owner = PageRef { space: id, va };
        if self.pool.get(frame).and_then(|f| f.owner()) == Some(owner) {
            if let Err(e) = self.pool.unbind(frame, owner) {
                error!("could not unbind frame {frame} from {va:#X} of {id}: {e}");
            }
        }
        if let Err(e) = self.pool.release(frame) {
            error!("could not release frame {frame} after a failed claim: {e}");
        }
    }

    pub(crate) fn claim(&mut self, id: AddressSpaceId, va: usize) -> Result<()> {
        let va = page_round_down(va);
        let page = self.space(id)?.spt.lookup(va).ok_or(VmError::NotMapped(va))?;
        if page.is_resident() {
            return Err(VmError::AlreadyResident(va));
        }
        let frame = self.install(id, va, Fill::SwapIn)?;
        trace!("claimed {va:#X} of {id} into frame {frame}");
        Ok(())
    }

    /// Write a resident page out and drop its frame.
    pub(crate) fn evict_page(&mut self, id: AddressSpaceId, va: usize) -> Result<()> {
        let va = page_round_down(va);
        let frame = self
            .space(id)?
            .spt
            .lookup(va)
            .ok_or(VmError::NotMapped(va))?
            .frame()
            .ok_or(VmError::NotMapped(va))?;
        if self.pool.get(frame).is_some_and(|f| f.is_pinned()) {
            return Err(VmError::OutOfFrames);
        }
        self.swap_out(PageRef { space: id, va }, frame)?;
        self.pool.release(frame)?;
        self.pool.record_eviction();
        Ok(())
    }

    /// Remove every page of `id`, writing back and releasing what each holds.
    /// Keeps going past failures and reports the first.
    pub(crate) fn destroy_space(&mut self, id: AddressSpaceId) -> Result<()> {
        let space = self.spaces.get_mut(&id).ok_or(VmError::UnknownAddressSpace)?;
        let pages = space.spt.drain();
        let count = pages.len();
        let mut first_error = None;
        for mut page in pages {
            let result = destroy_page(
                &mut self.pool,
                &mut self.swap,
                id,
                space.page_table.as_mut(),
                &mut page,
            );
            if let Err(e) = result {
                warn!("destroying {:#X} of {id}: {e}", page.va());
                first_error.get_or_insert(e);
            }
        }
        if count > 0 {
            debug!("destroyed {count} pages of {id}");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Check that every frame and its page point at each other, that every
    /// anonymous page is either resident or in swap, and that the swap table
    /// holds exactly the slots anonymous pages record.
    pub(crate) fn verify(&self) -> Result<()> {
        let mut resident = 0;
        let mut slots = 0;
        for (&id, space) in &self.spaces {
            for page in space.spt.iter() {
                if let Some(frame) = page.frame() {
                    resident += 1;
                    let owner = self.pool.get(frame).and_then(|f| f.owner());
                    if owner != Some(PageRef { space: id, va: page.va() }) {
                        error!("{:#X} of {id} and frame {frame} disagree", page.va());
                        return Err(VmError::FrameOwnerMismatch);
                    }
                    if space.page_table.translate(page.va()) != Some(self.pool.phys(frame)?) {
                        error!("{:#X} of {id} is resident but not mapped", page.va());
                        return Err(VmError::FrameOwnerMismatch);
                    }
                }
                if let PageKind::Anon(anon) = page.kind() {
                    match anon.slot() {
                        Some(slot) => {
                            slots += 1;
                            if !self.swap.is_used(slot) {
                                return Err(VmError::SwapSlotNotInUse(slot));
                            }
                        }
                        None if !page.is_resident() => {
                            error!("{:#X} of {id} is neither resident nor in swap", page.va());
                            return Err(VmError::MissingSwapSlot(page.va()));
                        }
                        None => {}
                    }
                }
            }
        }
        if resident != self.pool.resident() || slots != self.swap.used() {
            return Err(VmError::FrameOwnerMismatch);
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> VmStats {
        VmStats {
            frames_capacity: self.pool.capacity(),
            frames_resident: self.pool.resident(),
            swap_slots: self.swap.slots(),
            swap_slots_used: self.swap.used(),
            evictions: self.pool.evictions(),
        }
    }
}

/// Destroy a page already taken out of its table.
pub(crate) fn destroy_page(
    pool: &mut FramePool,
    swap: &mut SwapTable,
    space: AddressSpaceId,
    page_table: &mut dyn PageTable,
    page: &mut Page,
) -> Result<()> {
    let va = page.va();
    let dirty = page_table.is_dirty(va);
    let contents = match page.frame() {
        Some(frame) => Some(pool.bytes(frame)?),
        None => None,
    };
    let result = page.destroy(contents, dirty, swap);
    if let Some(frame) = page.detach() {
        page_table.unmap(va);
        pool.unbind(frame, PageRef { space, va })?;
        pool.release(frame)?;
    }
    result
}

/// The demand-paging core shared by every process.
pub struct VirtualMemory {
    config: VmConfig,
    state: Mutex<VmState>,
}

impl VirtualMemory {
    /// A VM over the frames of `frames`, swapping to `swap`.
    pub fn new(config: VmConfig, frames: Box<dyn FrameSource>, swap: Box<dyn BlockDevice>) -> Self {
        Self {
            config,
            state: Mutex::new(VmState {
                config,
                pool: FramePool::new(frames),
                swap: SwapTable::new(swap),
                spaces: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<VmState> {
        self.state.lock()
    }

    pub fn stats(&self) -> VmStats {
        self.lock().stats()
    }

    /// Register a new, empty address space mapped through `page_table`.
    pub fn create_address_space(&self, page_table: Box<dyn PageTable>) -> AddressSpaceId {
        let id = self.lock().create_space(page_table);
        debug!("created address space {id}");
        id
    }

    /// Give the address space its first stack page, resident and writable,
    /// and return the initial stack pointer.
    pub fn setup_stack(&self, space: AddressSpaceId) -> Result<usize> {
        let mut state = self.lock();
        let va = self.config.stack_top - PAGE_FRAME_SIZE;
        state
            .space_mut(space)?
            .spt
            .create_pending(va, true, PageTarget::Anon, None)?;
        if let Err(e) = state.claim(space, va) {
            state.space_mut(space)?.spt.remove(va);
            return Err(e);
        }
        Ok(self.config.stack_top)
    }

    /// Destroy every page of the address space. The space stays registered
    /// and can be filled again; destroying an empty space does nothing.
    pub fn destroy_address_space(&self, space: AddressSpaceId) -> Result<()> {
        self.lock().destroy_space(space)
    }

    /// Destroy the address space and forget it.
    pub fn release_address_space(&self, space: AddressSpaceId) -> Result<()> {
        let mut state = self.lock();
        let result = state.destroy_space(space);
        state.spaces.remove(&space);
        result
    }

    /// Register a page at `va` that is populated on first access by `loader`.
    pub fn create_pending_page(
        &self,
        space: AddressSpaceId,
        va: usize,
        writable: bool,
        target: PageTarget,
        loader: Option<Arc<dyn PageLoader>>,
    ) -> Result<()> {
        if va >= self.config.user_limit {
            return Err(VmError::KernelAddress(va));
        }
        self.lock()
            .space_mut(space)?
            .spt
            .create_pending(page_round_down(va), writable, target, loader)
    }

    /// A pending page with the default initialization of `target`.
    pub fn alloc_page(&self, space: AddressSpaceId, target: PageTarget, va: usize, writable: bool) -> Result<()> {
        self.create_pending_page(space, va, writable, target, None)
    }

    pub fn lookup_page(&self, space: AddressSpaceId, va: usize) -> Option<PageInfo> {
        let state = self.lock();
        let info = state.space(space).ok()?.spt.lookup(va).map(Page::info);
        info
    }

    /// Make the page containing `va` resident now.
    pub fn claim_page(&self, space: AddressSpaceId, va: usize) -> Result<()> {
        self.lock().claim(space, va)
    }

    /// Evict the page containing `va` now.
    pub fn evict_page(&self, space: AddressSpaceId, va: usize) -> Result<()> {
        self.lock().evict_page(space, va)
    }

    pub fn verify(&self) -> Result<()> {
        self.lock().verify()
    }
}

impl core::fmt::Debug for VirtualMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VirtualMemory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
