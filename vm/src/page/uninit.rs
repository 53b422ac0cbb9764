//! Pending pages: nothing is resident until the first claim runs the loader.

use super::anon::AnonPage;
use super::file::FileBacking;
use super::{PageKind, PageType};
use crate::error::Result;
use crate::file::MappedFile;
use alloc::sync::Arc;
use core::fmt;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

/// Fills a freshly zeroed frame with a page's initial contents.
///
/// A loader may run more than once: a forked child reruns its parent's
/// loader for every page that was still pending at fork time. It must read
/// its inputs without changing them.
pub trait PageLoader: Send + Sync {
    fn load(&self, va: usize, frame: &mut [u8]) -> Result<()>;
}

impl<F> PageLoader for F
where
    F: Fn(usize, &mut [u8]) -> Result<()> + Send + Sync,
{
    fn load(&self, va: usize, frame: &mut [u8]) -> Result<()> {
        self(va, frame)
    }
}

/// Loads one page of an executable segment: `read_bytes` bytes at `offset`
/// of `file`, then zeroes up to the end of the page.
#[derive(Debug, Clone)]
pub struct SegmentLoader {
    file: Arc<MappedFile>,
    offset: u64,
    read_bytes: usize,
}

impl SegmentLoader {
    pub fn new(file: Arc<MappedFile>, offset: u64, read_bytes: usize) -> Self {
        debug_assert!(read_bytes <= PAGE_FRAME_SIZE);
        Self {
            file,
            offset,
            read_bytes,
        }
    }
}

impl PageLoader for SegmentLoader {
    fn load(&self, _va: usize, frame: &mut [u8]) -> Result<()> {
        let (data, zeros) = frame.split_at_mut(self.read_bytes);
        self.file.read_exact_at(self.offset, data)?;
        zeros.fill(0);
        Ok(())
    }
}

/// What a pending page becomes once it is first claimed.
#[derive(Debug, Clone)]
pub enum PageTarget {
    Anon,
    File(FileBacking),
}

impl PageTarget {
    pub fn page_type(&self) -> PageType {
        match self {
            Self::Anon => PageType::Anon,
            Self::File(_) => PageType::File,
        }
    }
}

#[derive(Clone)]
pub struct UninitPage {
    target: PageTarget,
    loader: Option<Arc<dyn PageLoader>>,
}

impl UninitPage {
    pub fn new(target: PageTarget, loader: Option<Arc<dyn PageLoader>>) -> Self {
        Self { target, loader }
    }

    pub fn target(&self) -> &PageTarget {
        &self.target
    }

    /// Populate `frame` and return the variant the page turns into.
    ///
    /// Without a loader an anonymous page stays zero and a file page reads its
    /// range. The pending state is only given up by the caller once this
    /// succeeds, so a failed load can be retried.
    pub(super) fn initialize(&self, va: usize, frame: &mut [u8]) -> Result<PageKind> {
        match &self.loader {
            Some(loader) => loader.load(va, frame)?,
            None => {
                if let PageTarget::File(backing) = &self.target {
                    backing.read_into(frame)?;
                }
            }
        }
        Ok(match &self.target {
            PageTarget::Anon => PageKind::Anon(AnonPage::new()),
            PageTarget::File(backing) => PageKind::File(backing.clone()),
        })
    }
}

impl fmt::Debug for UninitPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UninitPage")
            .field("target", &self.target)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}
