//! File-backed pages. The file itself is the backing store: evicting a clean
//! page just drops it, and a dirty one is written back first.

use crate::error::Result;
use crate::file::MappedFile;
use alloc::sync::Arc;

/// The mapping a page belongs to, recorded on every one of its pages so
/// `munmap` knows the span without recomputing it from the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub start: usize,
    pub page_count: usize,
}

impl Mapping {
    pub fn end(&self) -> usize {
        self.start + self.page_count * kidneyos_shared::mem::PAGE_FRAME_SIZE
    }
}

#[derive(Debug, Clone)]
pub struct FileBacking {
    file: Arc<MappedFile>,
    offset: u64,
    /// Bytes of real file content in this page. The rest reads as zero and is
    /// never written back.
    read_bytes: usize,
    mapping: Option<Mapping>,
}

impl FileBacking {
    pub fn new(file: Arc<MappedFile>, offset: u64, read_bytes: usize, mapping: Option<Mapping>) -> Self {
        Self {
            file,
            offset,
            read_bytes,
            mapping,
        }
    }

    pub fn file(&self) -> &Arc<MappedFile> {
        &self.file
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    pub fn mapping(&self) -> Option<Mapping> {
        self.mapping
    }

    /// Read this page's range of the file into `frame` and zero the rest.
    pub(super) fn read_into(&self, frame: &mut [u8]) -> Result<()> {
        let (data, zeros) = frame.split_at_mut(self.read_bytes);
        self.file.read_exact_at(self.offset, data)?;
        zeros.fill(0);
        Ok(())
    }

    /// Write the file's part of `frame` back.
    pub(super) fn write_back(&self, frame: &[u8]) -> Result<()> {
        self.file.write_all_at(self.offset, &frame[..self.read_bytes])?;
        Ok(())
    }
}
