//! Anonymous pages: no backing file, evicted to a swap slot.

use crate::error::{Result, VmError};
use crate::mem::{SwapSlot, SwapTable};
use log::{error, trace};

#[derive(Debug, Clone, Default)]
pub struct AnonPage {
    /// Where the contents went on the last swap-out. Set exactly while the
    /// page is swapped out.
    slot: Option<SwapSlot>,
}

impl AnonPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self) -> Option<SwapSlot> {
        self.slot
    }

    /// Bring the contents back from swap and give up the slot.
    pub(super) fn swap_in(&mut self, va: usize, frame: &mut [u8], swap: &mut SwapTable) -> Result<()> {
        let Some(slot) = self.slot else {
            error!("anonymous page {va:#X} claimed with no swap slot");
            return Err(VmError::MissingSwapSlot(va));
        };
        swap.read_page(slot, frame)?;
        swap.free_slot(slot)?;
        self.slot = None;
        trace!("swapped in {va:#X} from slot {slot}");
        Ok(())
    }

    pub(super) fn swap_out(&mut self, va: usize, frame: &[u8], swap: &mut SwapTable) -> Result<()> {
        let slot = swap.allocate_slot()?;
        if let Err(e) = swap.write_page(slot, frame) {
            swap.free_slot(slot)?;
            return Err(e);
        }
        self.slot = Some(slot);
        trace!("swapped out {va:#X} to slot {slot}");
        Ok(())
    }

    pub(super) fn destroy(&mut self, swap: &mut SwapTable) -> Result<()> {
        match self.slot.take() {
            Some(slot) => swap.free_slot(slot),
            None => Ok(()),
        }
    }
}
