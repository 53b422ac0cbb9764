// https://wiki.osdev.org/Paging

// Avoids lots of warnings about casting usize to u32 which cannot result in
// truncation on a 32-bit platform, which is all we support. It would be nice if
// you could tell clippy that you were only dealing with 32-bit usizes...
#![allow(clippy::cast_possible_truncation)]

use arbitrary_int::{u10, u12, u20};
use bitbybit::bitfield;

/// Highest frame number a page table entry can address.
pub const MAX_FRAME_NUMBER: usize = (1 << 20) - 1;

#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(3, rw)]
    write_through: bool,
    #[bit(4, rw)]
    cache_disable: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bit(7, rw)]
    page_attribute_table: bool,
    #[bit(8, rw)]
    global: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present user entry pointing at `frame_number`, or `None` if the
    /// frame number does not fit in 20 bits.
    pub fn user(frame_number: usize, writable: bool) -> Option<Self> {
        if frame_number > MAX_FRAME_NUMBER {
            return None;
        }
        Some(
            Self::DEFAULT
                .with_present(true)
                .with_user_supervisor(true)
                .with_read_write(writable)
                .with_page_frame_address(u20::new(frame_number as u32)),
        )
    }

    pub fn frame_number(&self) -> usize {
        self.page_frame_address().value() as usize
    }
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(22..=31, r)]
    page_directory_index: u10,
    #[bits(12..=21, r)]
    page_table_index: u10,
    #[bits(0..=11, r)]
    offset: u12,
}

impl VirtualAddress {
    pub fn new(addr: usize) -> Self {
        Self::new_with_raw_value(addr as u32)
    }

    /// Virtual page number: directory and table index taken together.
    pub fn page_number(&self) -> usize {
        (self.raw_value() >> 12) as usize
    }
}
