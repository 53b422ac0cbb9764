//! Page fault resolution.

use crate::address_space::AddressSpaceId;
use crate::error::{Result, VmError};
use crate::page::PageTarget;
use crate::virtual_memory::{VirtualMemory, VmState};
use kidneyos_shared::mem::page_round_down;
use log::{debug, warn};

/// What the trap handler knows about a page fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// The faulting address (`cr2`).
    pub addr: usize,
    /// The fault happened in user mode.
    pub user: bool,
    pub write: bool,
    /// No page was mapped, as opposed to a protection violation.
    pub not_present: bool,
    /// The user stack pointer at the time of the fault.
    pub stack_pointer: usize,
}

impl VmState {
    pub(crate) fn resolve_fault(&mut self, id: AddressSpaceId, fault: &PageFault) -> Result<()> {
        let addr = fault.addr;
        if addr == 0 {
            return Err(VmError::NullAddress);
        }
        if addr >= self.config.user_limit {
            return Err(VmError::KernelAddress(addr));
        }

        let va = page_round_down(addr);
        let stack_growth = self.config.is_stack_access(addr, fault.stack_pointer);
        let space = self.space_mut(id)?;
        if stack_growth && !space.spt.contains(va) {
            space.spt.create_pending(va, true, PageTarget::Anon, None)?;
            debug!("stack of {id} grows to {va:#X}");
        }

        if !fault.not_present {
            return Err(VmError::ProtectionViolation(addr));
        }
        let page = space.spt.lookup(va).ok_or(VmError::NotMapped(addr))?;
        if fault.write && !page.writable() {
            return Err(VmError::WriteToReadOnly(addr));
        }
        self.claim(id, va)
    }
}

impl VirtualMemory {
    /// Handle a page fault taken in address space `space`.
    ///
    /// On success the faulting access can be restarted. An error for which
    /// [`VmError::is_process_fatal`] holds means the process must be killed;
    /// any other error means the kernel could not satisfy a legal access.
    pub fn fault(&self, space: AddressSpaceId, fault: &PageFault) -> Result<()> {
        let result = self.lock().resolve_fault(space, fault);
        if let Err(e) = &result {
            warn!(
                "{} page fault at {:#X} in {space} failed: {e}",
                if fault.user { "user" } else { "kernel" },
                fault.addr
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{test_vm, SoftPageTable};
    use alloc::boxed::Box;
    use kidneyos_shared::mem::PAGE_FRAME_SIZE;

    fn fault_at(addr: usize, write: bool, stack_pointer: usize) -> PageFault {
        PageFault {
            addr,
            user: true,
            write,
            not_present: true,
            stack_pointer,
        }
    }

    #[test]
    fn rejects_null_and_kernel_addresses() {
        let vm = test_vm(4, 4);
        let space = vm.create_address_space(Box::new(SoftPageTable::new()));
        assert_eq!(vm.fault(space, &fault_at(0, false, 0)), Err(VmError::NullAddress));
        let kernel = vm.config().user_limit;
        assert_eq!(
            vm.fault(space, &fault_at(kernel + 4, false, 0)),
            Err(VmError::KernelAddress(kernel + 4))
        );
        assert!(vm.fault(space, &fault_at(0x1234, false, 0)).unwrap_err().is_process_fatal());
    }

    #[test]
    fn unmapped_and_read_only() {
        let vm = test_vm(4, 4);
        let space = vm.create_address_space(Box::new(SoftPageTable::new()));
        assert_eq!(
            vm.fault(space, &fault_at(0x1010, false, 0)),
            Err(VmError::NotMapped(0x1010))
        );

        vm.alloc_page(space, PageTarget::Anon, 0x1000, false).unwrap();
        assert_eq!(
            vm.fault(space, &fault_at(0x1010, true, 0)),
            Err(VmError::WriteToReadOnly(0x1010))
        );
        vm.fault(space, &fault_at(0x1010, false, 0)).unwrap();
        assert!(vm.lookup_page(space, 0x1000).unwrap().resident);

        let present = PageFault {
            not_present: false,
            ..fault_at(0x1010, true, 0)
        };
        assert_eq!(vm.fault(space, &present), Err(VmError::ProtectionViolation(0x1010)));
    }

    #[test]
    fn stack_grows_one_page_per_fault() {
        let vm = test_vm(4, 4);
        let space = vm.create_address_space(Box::new(SoftPageTable::new()));
        let sp = vm.setup_stack(space).unwrap();
        assert_eq!(vm.stats().frames_resident, 1);

        // `push` just below the first page.
        let below = sp - PAGE_FRAME_SIZE - 4;
        vm.fault(space, &fault_at(below, true, below + 4)).unwrap();
        let info = vm.lookup_page(space, below).unwrap();
        assert!(info.resident && info.writable);
        assert_eq!(vm.stats().frames_resident, 2);

        // Far below the stack pointer is not growth.
        let far = below - 2 * PAGE_FRAME_SIZE;
        assert_eq!(
            vm.fault(space, &fault_at(far, true, below)),
            Err(VmError::NotMapped(far))
        );
        assert!(vm.lookup_page(space, far).is_none());
    }

    #[test]
    fn stack_growth_stops_at_the_floor() {
        let vm = test_vm(4, 4);
        let space = vm.create_address_space(Box::new(SoftPageTable::new()));
        let floor = vm.config().stack_floor();
        let addr = floor - 8;
        assert_eq!(
            vm.fault(space, &fault_at(addr, true, addr)),
            Err(VmError::NotMapped(addr))
        );
    }
}
