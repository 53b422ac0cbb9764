use crate::file::{File, FileError, Result};
use crate::sync::Mutex;
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A file held in memory. Handles opened with [`File::reopen`] share its
/// contents and its count of closed handles.
pub struct MemoryFile {
    contents: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl MemoryFile {
    pub fn new(contents: Vec<u8>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(contents)),
            closes: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn contents(&self) -> Arc<Mutex<Vec<u8>>> {
        self.contents.clone()
    }

    /// How many times any handle to this file has been closed.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(FileError::BadHandle)
        } else {
            Ok(())
        }
    }
}

impl File for MemoryFile {
    fn reopen(&self) -> Result<Box<dyn File>> {
        self.check_open()?;
        Ok(Box::new(Self {
            contents: self.contents.clone(),
            closes: self.closes.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let contents = self.contents.lock();
        let start = usize::try_from(offset).map_or(contents.len(), |o| o.min(contents.len()));
        let n = buf.len().min(contents.len() - start);
        buf[..n].copy_from_slice(&contents[start..start + n]);
        Ok(n)
    }

    /// Writes never extend the file.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        let mut contents = self.contents.lock();
        let start = usize::try_from(offset).map_or(contents.len(), |o| o.min(contents.len()));
        let n = buf.len().min(contents.len() - start);
        contents[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn length(&self) -> u64 {
        self.contents.lock().len() as u64
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn reopened_handles_share_contents() {
        let file = MemoryFile::new(vec![1, 2, 3, 4]);
        let other = file.reopen().unwrap();
        assert_eq!(other.write_at(2, &[9, 9, 9]), Ok(2));

        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(1, &mut buf), Ok(3));
        assert_eq!(&buf[..3], &[2, 9, 9]);
        assert_eq!(file.read_at(10, &mut buf), Ok(0));

        other.close();
        assert_eq!(other.read_at(0, &mut buf), Err(FileError::BadHandle));
        assert_eq!(file.read_at(0, &mut buf), Ok(4));
        assert_eq!(file.closes(), 1);
    }
}
