//! Open-file contract used by file-backed pages, and the shared handle that
//! a memory mapping keeps open.

use alloc::boxed::Box;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// The handle was closed (or never opened)
    BadHandle,
    /// no space left on device
    NoSpace,
    /// The underlying device failed
    Io,
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHandle => write!(f, "bad file handle"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::Io => write!(f, "i/o error"),
        }
    }
}

impl core::error::Error for FileError {}

pub type Result<T> = core::result::Result<T, FileError>;

/// An open regular file.
///
/// Reads and writes are positioned, so several pages can share one handle
/// without a seek pointer between them.
pub trait File: Send + Sync {
    /// Open a new, independent handle to the same file.
    fn reopen(&self) -> Result<Box<dyn File>>;
    /// Read from the file into `buf` at `offset`, returning the number of
    /// bytes read. Short reads happen only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    /// Write `buf` to the file at `offset`, returning the number of bytes written.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize>;
    /// Current length of the file in bytes.
    fn length(&self) -> u64;
    /// Release the handle. The file system may drop an unlinked file here.
    fn close(&self);
}

/// The handle a memory mapping (or a lazily loaded segment) reads and writes
/// through. Every page of the mapping holds an `Arc` of it; the handle is
/// closed when the last one goes away.
pub struct MappedFile {
    file: Box<dyn File>,
}

impl MappedFile {
    /// Reopen `file` so the mapping outlives the caller's descriptor.
    pub fn reopen(file: &dyn File) -> Result<Self> {
        Ok(Self {
            file: file.reopen()?,
        })
    }

    /// Wrap a handle the caller has already opened for this purpose.
    pub fn new(file: Box<dyn File>) -> Self {
        Self { file }
    }

    pub fn length(&self) -> u64 {
        self.file.length()
    }

    /// Read exactly `buf.len()` bytes at `offset`, or fail.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.read_at(offset + done as u64, &mut buf[done..])?;
            if n == 0 {
                return Err(FileError::Io);
            }
            done += n;
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`, or fail.
    pub fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.write_at(offset + done as u64, &buf[done..])?;
            if n == 0 {
                return Err(FileError::NoSpace);
            }
            done += n;
        }
        Ok(())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        self.file.close();
    }
}

impl fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedFile")
            .field("length", &self.file.length())
            .finish()
    }
}
