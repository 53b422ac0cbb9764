//! The kernel-wide VM instance, for code that cannot be handed a reference,
//! such as the page fault handler.

use crate::virtual_memory::VirtualMemory;
use alloc::boxed::Box;
use once_cell::race::OnceBox;

static VM: OnceBox<VirtualMemory> = OnceBox::new();

/// Install the VM. Fails, handing `vm` back, if one is already installed.
pub fn init(vm: VirtualMemory) -> Result<(), VirtualMemory> {
    VM.set(Box::new(vm)).map_err(|vm| *vm)
}

pub fn vm() -> Option<&'static VirtualMemory> {
    VM.get()
}
