use crate::block::{check_transfer, BlockDevice, BlockError, BlockSector, BLOCK_SECTOR_SIZE};
use alloc::{vec, vec::Vec};

/// A block device held in memory.
pub struct MemoryBlock {
    data: Vec<u8>,
    sectors: BlockSector,
}

impl MemoryBlock {
    pub fn new(sectors: BlockSector) -> Self {
        Self {
            data: vec![0; sectors as usize * BLOCK_SECTOR_SIZE],
            sectors,
        }
    }

    fn range(sector: BlockSector) -> core::ops::Range<usize> {
        let start = sector as usize * BLOCK_SECTOR_SIZE;
        start..start + BLOCK_SECTOR_SIZE
    }
}

impl BlockDevice for MemoryBlock {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        check_transfer(self.sectors, sector, buf)?;
        buf.copy_from_slice(&self.data[Self::range(sector)]);
        Ok(())
    }

    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        check_transfer(self.sectors, sector, buf)?;
        self.data[Self::range(sector)].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> BlockSector {
        self.sectors
    }
}
