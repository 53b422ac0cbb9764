//! The frame table: every user frame currently handed out, who owns it, and
//! the clock that picks eviction victims among them.

use super::page_replacement::{Candidate, Clock, PageReplacementPolicy};
use super::{FrameSource, PhysFrame};
use crate::error::{Result, VmError};
use crate::page::PageRef;
use alloc::{boxed::Box, vec::Vec};
use core::fmt;

/// Index into the frame table.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameId(usize);

impl FrameId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct Frame {
    phys: PhysFrame,
    /// The page using this frame. `None` only between acquire and bind.
    owner: Option<PageRef>,
    pinned: bool,
}

impl Frame {
    pub fn phys(&self) -> PhysFrame {
        self.phys
    }

    pub fn owner(&self) -> Option<PageRef> {
        self.owner
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

pub struct FramePool {
    source: Box<dyn FrameSource>,
    table: Vec<Option<Frame>>,
    free_ids: Vec<FrameId>,
    policy: Box<dyn PageReplacementPolicy>,
    evictions: u64,
}

impl FramePool {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self::with_policy(source, Box::new(Clock::new()))
    }

    pub fn with_policy(
        source: Box<dyn FrameSource>,
        policy: Box<dyn PageReplacementPolicy>,
    ) -> Self {
        Self {
            source,
            table: Vec::new(),
            free_ids: Vec::new(),
            policy,
            evictions: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.source.capacity()
    }

    /// Frames handed out to pages.
    pub fn resident(&self) -> usize {
        self.policy.len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Frames the last victim search looked at.
    pub fn last_inspected(&self) -> usize {
        self.policy.last_inspected()
    }

    pub(crate) fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.table.get(id.0)?.as_ref()
    }

    fn get_mut(&mut self, id: FrameId) -> Result<&mut Frame> {
        self.table
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VmError::FrameOwnerMismatch)
    }

    /// Take a zeroed frame from the physical allocator and register it, or
    /// `None` when the allocator is exhausted and a victim must be evicted.
    pub(crate) fn try_alloc(&mut self) -> Option<FrameId> {
        let phys = self.source.alloc()?;
        let frame = Frame {
            phys,
            owner: None,
            pinned: false,
        };
        let id = match self.free_ids.pop() {
            Some(id) => {
                self.table[id.0] = Some(frame);
                id
            }
            None => {
                self.table.push(Some(frame));
                FrameId(self.table.len() - 1)
            }
        };
        self.policy.track(id);
        Some(id)
    }

    /// Choose a frame to evict. `probe` inspects (and clears) the accessed
    /// bit of the frame's owner.
    pub(crate) fn select_victim(
        &mut self,
        probe: &mut dyn FnMut(PageRef) -> bool,
    ) -> Option<FrameId> {
        let table = &self.table;
        self.policy.select_victim(&mut |id| {
            let Some(Some(frame)) = table.get(id.0) else {
                return Candidate::Skip;
            };
            match frame.owner {
                Some(owner) if !frame.pinned => {
                    if probe(owner) {
                        Candidate::Referenced
                    } else {
                        Candidate::Unreferenced
                    }
                }
                _ => Candidate::Skip,
            }
        })
    }

    /// Attach `page` to an unowned frame.
    pub(crate) fn bind(&mut self, id: FrameId, page: PageRef) -> Result<()> {
        let frame = self.get_mut(id)?;
        if frame.owner.is_some() {
            return Err(VmError::FrameOwnerMismatch);
        }
        frame.owner = Some(page);
        Ok(())
    }

    /// Detach the frame from `page`, leaving it registered and unowned.
    pub(crate) fn unbind(&mut self, id: FrameId, page: PageRef) -> Result<()> {
        let frame = self.get_mut(id)?;
        if frame.owner != Some(page) {
            return Err(VmError::FrameOwnerMismatch);
        }
        frame.owner = None;
        Ok(())
    }

    /// Give an unowned frame back to the physical allocator.
    pub(crate) fn release(&mut self, id: FrameId) -> Result<()> {
        let frame = self.get_mut(id)?;
        if frame.owner.is_some() || frame.pinned {
            return Err(VmError::FrameOwnerMismatch);
        }
        let phys = frame.phys;
        self.table[id.0] = None;
        self.free_ids.push(id);
        self.policy.untrack(id);
        self.source.dealloc(phys);
        Ok(())
    }

    pub(crate) fn set_pinned(&mut self, id: FrameId, pinned: bool) -> Result<()> {
        self.get_mut(id)?.pinned = pinned;
        Ok(())
    }

    pub fn phys(&self, id: FrameId) -> Result<PhysFrame> {
        self.get(id).map(Frame::phys).ok_or(VmError::FrameOwnerMismatch)
    }

    pub fn bytes(&self, id: FrameId) -> Result<&[u8]> {
        let phys = self.phys(id)?;
        Ok(self.source.frame(phys))
    }

    pub fn bytes_mut(&mut self, id: FrameId) -> Result<&mut [u8]> {
        let phys = self.phys(id)?;
        Ok(self.source.frame_mut(phys))
    }

    /// Copy the contents of `src` into `dst`.
    pub(crate) fn copy(&mut self, src: FrameId, dst: FrameId) -> Result<()> {
        let contents = self.bytes(src)?.to_vec();
        self.bytes_mut(dst)?.copy_from_slice(&contents);
        Ok(())
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("capacity", &self.capacity())
            .field("resident", &self.resident())
            .field("evictions", &self.evictions)
            .finish()
    }
}
