//! Block device contract for the swap partition.

use core::error::Error;
use core::fmt::{Debug, Display, Formatter};

/// Size of a block device in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = 512;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Error type for block operations
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The sector is out of bounds (greater than the block size)
    SectorOutOfBounds,
    /// The buffer has an invalid size (not `BLOCK_SECTOR_SIZE`)
    BufferInvalid,
    /// Error reading from the disk
    ReadError,
    /// Error writing to the disk
    WriteError,
}

impl Debug for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BlockError::SectorOutOfBounds => write!(f, "SectorOutOfBounds"),
            BlockError::BufferInvalid => write!(f, "BufferInvalid"),
            BlockError::ReadError => write!(f, "ReadError"),
            BlockError::WriteError => write!(f, "WriteError"),
        }
    }
}

impl Display for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BlockError::SectorOutOfBounds => write!(f, "sector out of bounds"),
            BlockError::BufferInvalid => write!(f, "buffer is not one sector long"),
            BlockError::ReadError => write!(f, "error reading from the block device"),
            BlockError::WriteError => write!(f, "error writing to the block device"),
        }
    }
}

impl Error for BlockError {}

/// A sector-addressed device. Implemented by the IDE driver for the swap
/// partition and by [`crate::emulation::MemoryBlock`] on the host.
pub trait BlockDevice: Send {
    /// Reads sector `sector` into `buf`, which must be `BLOCK_SECTOR_SIZE` bytes.
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    /// Writes `buf`, which must be `BLOCK_SECTOR_SIZE` bytes, to sector `sector`.
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
    /// The size of the device in sectors.
    fn size(&self) -> BlockSector;
}

/// Checks the arguments of a sector transfer the way every device must.
pub fn check_transfer(
    device_size: BlockSector,
    sector: BlockSector,
    buf: &[u8],
) -> Result<(), BlockError> {
    if sector >= device_size {
        return Err(BlockError::SectorOutOfBounds);
    }
    if buf.len() != BLOCK_SECTOR_SIZE {
        return Err(BlockError::BufferInvalid);
    }
    Ok(())
}
