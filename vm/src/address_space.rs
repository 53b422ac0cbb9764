use crate::paging::PageTable;
use crate::spt::SupplementalPageTable;
use alloc::boxed::Box;
use core::fmt;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddressSpaceId(u32);

impl AddressSpaceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as{}", self.0)
    }
}

/// A user address space: the pages it has and the hardware table they are
/// mapped through.
pub struct AddressSpace {
    pub(crate) spt: SupplementalPageTable,
    pub(crate) page_table: Box<dyn PageTable>,
}

impl AddressSpace {
    pub fn new(page_table: Box<dyn PageTable>) -> Self {
        Self {
            spt: SupplementalPageTable::new(),
            page_table,
        }
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn page_table(&self) -> &dyn PageTable {
        self.page_table.as_ref()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pages", &self.spt.len())
            .finish()
    }
}
