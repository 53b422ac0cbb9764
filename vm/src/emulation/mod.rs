//! Software stand-ins for the hardware and file system the VM core talks to,
//! so the whole subsystem can run on a host.

mod block;
mod file;
mod page_table;

pub use block::MemoryBlock;
pub use file::MemoryFile;
pub use page_table::SoftPageTable;

#[cfg(test)]
pub(crate) fn test_vm(frames: usize, swap_slots: u32) -> crate::VirtualMemory {
    use crate::block::BlockSector;
    use crate::mem::{swapping::SECTORS_PER_PAGE, UserPool};
    use alloc::boxed::Box;

    crate::VirtualMemory::new(
        crate::VmConfig::DEFAULT,
        Box::new(UserPool::emulated(frames)),
        Box::new(MemoryBlock::new(swap_slots * SECTORS_PER_PAGE as BlockSector)),
    )
}
