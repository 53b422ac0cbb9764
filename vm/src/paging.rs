//! The hardware page table as the VM core sees it.
//!
//! Each address space owns one [`PageTable`]. On x86 it is a page directory
//! whose entries carry the accessed and dirty bits the clock and write-back
//! paths consume; [`crate::emulation::SoftPageTable`] keeps the same
//! [`PageTableEntry`](kidneyos_shared::paging::PageTableEntry) bits in software.

use crate::mem::PhysFrame;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// `va` is not page-aligned or lies in kernel space
    BadAddress,
    /// The frame number cannot be expressed in a page table entry
    BadFrame,
    /// A page table could not be allocated for the entry
    NoMemory,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAddress => write!(f, "address cannot be mapped"),
            Self::BadFrame => write!(f, "frame cannot be mapped"),
            Self::NoMemory => write!(f, "no memory for page table"),
        }
    }
}

impl core::error::Error for MapError {}

/// Install/clear virtual-to-physical mappings and read the bits the MMU
/// maintains on them. Every `va` is page-aligned.
pub trait PageTable: Send {
    /// Map `va` to `frame`, replacing nothing: `va` must be unmapped.
    ///
    /// `frame` is relative to the user pool. A hardware table translates it
    /// with [`UserPool::kernel_address`](crate::mem::UserPool::kernel_address)
    /// before writing the entry.
    fn map(&mut self, va: usize, frame: PhysFrame, writable: bool) -> Result<(), MapError>;
    /// Remove the mapping of `va`, if any. Clears its accessed and dirty bits.
    fn unmap(&mut self, va: usize);
    /// The frame `va` is mapped to.
    fn translate(&self, va: usize) -> Option<PhysFrame>;
    fn is_writable(&self, va: usize) -> bool;
    fn is_accessed(&self, va: usize) -> bool;
    fn set_accessed(&mut self, va: usize, accessed: bool);
    fn is_dirty(&self, va: usize) -> bool;
    fn set_dirty(&mut self, va: usize, dirty: bool);
}
