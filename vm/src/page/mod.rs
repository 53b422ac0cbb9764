//! Page descriptors: one per virtual page an address space knows about.

pub mod anon;
pub mod file;
pub mod uninit;

use crate::address_space::AddressSpaceId;
use crate::error::{Result, VmError};
use crate::mem::{FrameId, SwapSlot, SwapTable};
use anon::AnonPage;
use file::{FileBacking, Mapping};
use log::error;
use uninit::UninitPage;

pub use uninit::{PageLoader, PageTarget, SegmentLoader};

/// Identifies a page across address spaces. Frames point back at their owner
/// with this.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageRef {
    pub space: AddressSpaceId,
    pub va: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Anon,
    File,
}

#[derive(Debug)]
pub enum PageKind {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FileBacking),
}

#[derive(Debug)]
pub struct Page {
    va: usize,
    writable: bool,
    kind: PageKind,
    frame: Option<FrameId>,
}

/// A copy of what a page looks like, for callers outside the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub va: usize,
    pub writable: bool,
    /// The type the page has, or will have once loaded.
    pub page_type: PageType,
    pub pending: bool,
    pub resident: bool,
    pub swap_slot: Option<SwapSlot>,
    pub mapping: Option<Mapping>,
}

impl Page {
    pub fn new_pending(va: usize, writable: bool, uninit: UninitPage) -> Self {
        Self {
            va,
            writable,
            kind: PageKind::Uninit(uninit),
            frame: None,
        }
    }

    pub(crate) fn with_kind(va: usize, writable: bool, kind: PageKind) -> Self {
        Self {
            va,
            writable,
            kind,
            frame: None,
        }
    }

    pub fn va(&self) -> usize {
        self.va
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn kind(&self) -> &PageKind {
        &self.kind
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn page_type(&self) -> PageType {
        match &self.kind {
            PageKind::Uninit(uninit) => uninit.target().page_type(),
            PageKind::Anon(_) => PageType::Anon,
            PageKind::File(_) => PageType::File,
        }
    }

    pub fn file_backing(&self) -> Option<&FileBacking> {
        match &self.kind {
            PageKind::File(backing) => Some(backing),
            PageKind::Uninit(uninit) => match uninit.target() {
                PageTarget::File(backing) => Some(backing),
                PageTarget::Anon => None,
            },
            PageKind::Anon(_) => None,
        }
    }

    pub fn mapping(&self) -> Option<Mapping> {
        self.file_backing().and_then(FileBacking::mapping)
    }

    pub fn info(&self) -> PageInfo {
        PageInfo {
            va: self.va,
            writable: self.writable,
            page_type: self.page_type(),
            pending: matches!(self.kind, PageKind::Uninit(_)),
            resident: self.is_resident(),
            swap_slot: match &self.kind {
                PageKind::Anon(anon) => anon.slot(),
                _ => None,
            },
            mapping: self.mapping(),
        }
    }

    pub(crate) fn attach(&mut self, frame: FrameId) {
        debug_assert!(self.frame.is_none());
        self.frame = Some(frame);
    }

    pub(crate) fn detach(&mut self) -> Option<FrameId> {
        self.frame.take()
    }

    /// Fill a newly bound frame with this page's contents. A pending page
    /// runs its loader and becomes its target type.
    pub(crate) fn swap_in(&mut self, frame: &mut [u8], swap: &mut SwapTable) -> Result<()> {
        match &mut self.kind {
            PageKind::Uninit(uninit) => {
                let kind = uninit.initialize(self.va, frame)?;
                self.kind = kind;
                Ok(())
            }
            PageKind::Anon(anon) => anon.swap_in(self.va, frame, swap),
            PageKind::File(backing) => backing.read_into(frame),
        }
    }

    /// Save the contents of a resident page before its frame is taken away.
    /// `dirty` is the hardware dirty bit.
    pub(crate) fn swap_out(&mut self, frame: &[u8], dirty: bool, swap: &mut SwapTable) -> Result<()> {
        match &mut self.kind {
            PageKind::Uninit(_) => {
                error!("pending page {:#X} is resident", self.va);
                Err(VmError::FrameOwnerMismatch)
            }
            PageKind::Anon(anon) => anon.swap_out(self.va, frame, swap),
            PageKind::File(backing) => {
                if dirty {
                    backing.write_back(frame)?;
                }
                Ok(())
            }
        }
    }

    /// Release what the page holds outside its frame. `frame` is the resident
    /// contents, if any, so dirty file pages can be written back. Calling this
    /// again on the same page does nothing.
    pub(crate) fn destroy(&mut self, frame: Option<&[u8]>, dirty: bool, swap: &mut SwapTable) -> Result<()> {
        match &mut self.kind {
            PageKind::Uninit(_) => Ok(()),
            PageKind::Anon(anon) => anon.destroy(swap),
            PageKind::File(backing) => match frame {
                Some(frame) if dirty => backing.write_back(frame),
                _ => Ok(()),
            },
        }
    }

    /// A descriptor for a forked child: same variant, never resident, and
    /// without a swap slot of its own yet.
    pub(crate) fn fork_descriptor(&self) -> Page {
        let kind = match &self.kind {
            PageKind::Uninit(uninit) => PageKind::Uninit(uninit.clone()),
            PageKind::Anon(_) => PageKind::Anon(AnonPage::new()),
            PageKind::File(backing) => PageKind::File(backing.clone()),
        };
        Page::with_kind(self.va, self.writable, kind)
    }
}
