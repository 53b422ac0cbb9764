//! Swap slot table: one bit per page-sized slot of the swap device.

use crate::block::{BlockDevice, BlockSector, BLOCK_SECTOR_SIZE};
use crate::error::{Result, VmError};
use alloc::{boxed::Box, vec, vec::Vec};
use core::fmt;
use kidneyos_shared::mem::PAGE_FRAME_SIZE;
use log::{error, trace};

pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// Index of a page-sized slot on the swap device.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(u32);

impl SwapSlot {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(&self) -> u32 {
        self.0
    }

    fn first_sector(&self) -> BlockSector {
        self.0 * SECTORS_PER_PAGE as BlockSector
    }
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct SwapTable {
    device: Box<dyn BlockDevice>,
    /// Bit set means the slot holds a page.
    bitmap: Vec<u64>,
    slots: u32,
    used: u32,
}

impl SwapTable {
    /// A table over every whole page of `device`. Trailing sectors that do
    /// not make up a page are left unused.
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let slots = device.size() / SECTORS_PER_PAGE as BlockSector;
        Self {
            device,
            bitmap: vec![0; slots.div_ceil(64) as usize],
            slots,
            used: 0,
        }
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn is_used(&self, slot: SwapSlot) -> bool {
        slot.0 < self.slots && self.bitmap[(slot.0 / 64) as usize] & (1 << (slot.0 % 64)) != 0
    }

    /// Claim the lowest free slot.
    pub fn allocate_slot(&mut self) -> Result<SwapSlot> {
        let (group_index, group) = self
            .bitmap
            .iter_mut()
            .enumerate()
            .find(|(_, group)| **group != u64::MAX)
            .ok_or(VmError::OutOfSwap)?;
        let bit = group.trailing_ones();
        let index = group_index as u32 * 64 + bit;
        if index >= self.slots {
            return Err(VmError::OutOfSwap);
        }
        *group |= 1 << bit;
        self.used += 1;
        trace!("swap slot {index} allocated");
        Ok(SwapSlot(index))
    }

    /// Release `slot`. Freeing a slot that is not in use means two pages
    /// believed they owned it.
    pub fn free_slot(&mut self, slot: SwapSlot) -> Result<()> {
        if !self.is_used(slot) {
            error!("swap slot {slot} freed while not in use");
            return Err(VmError::SwapSlotDoubleFree(slot));
        }
        self.bitmap[(slot.0 / 64) as usize] &= !(1 << (slot.0 % 64));
        self.used -= 1;
        Ok(())
    }

    /// Write one page into `slot`, which must be in use.
    pub fn write_page(&mut self, slot: SwapSlot, page: &[u8]) -> Result<()> {
        debug_assert_eq!(page.len(), PAGE_FRAME_SIZE);
        if !self.is_used(slot) {
            error!("write to swap slot {slot}, which is not in use");
            return Err(VmError::SwapSlotNotInUse(slot));
        }
        for (i, sector) in page.chunks_exact(BLOCK_SECTOR_SIZE).enumerate() {
            self.device
                .write(slot.first_sector() + i as BlockSector, sector)?;
        }
        Ok(())
    }

    /// Read the page stored in `slot` without releasing the slot.
    pub fn read_page(&mut self, slot: SwapSlot, page: &mut [u8]) -> Result<()> {
        debug_assert_eq!(page.len(), PAGE_FRAME_SIZE);
        if !self.is_used(slot) {
            error!("read from swap slot {slot}, which is not in use");
            return Err(VmError::SwapSlotNotInUse(slot));
        }
        for (i, sector) in page.chunks_exact_mut(BLOCK_SECTOR_SIZE).enumerate() {
            self.device
                .read(slot.first_sector() + i as BlockSector, sector)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SwapTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapTable")
            .field("slots", &self.slots)
            .field("used", &self.used)
            .finish()
    }
}
