use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

// User stacks grow down from the bottom of kernel space.
pub const USER_STACK_TOP: usize = OFFSET;
pub const MAX_USER_STACK_SIZE: usize = MB;

/// Round `addr` down to the start of the page containing it.
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

#[inline]
pub const fn is_kernel_vaddr(addr: usize) -> bool {
    addr >= OFFSET
}

/// Number of pages needed to hold `bytes` bytes.
#[inline]
pub const fn pages_spanned(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_FRAME_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x1fff), 0x1000);
        assert_eq!(page_round_down(0x2000), 0x2000);
        assert_eq!(page_offset(0x1234), 0x234);
        assert!(is_page_aligned(0x4000));
        assert!(!is_page_aligned(0x4001));
    }

    #[test]
    fn kernel_split() {
        assert!(!is_kernel_vaddr(OFFSET - 1));
        assert!(is_kernel_vaddr(OFFSET));
        assert_eq!(pages_spanned(0), 0);
        assert_eq!(pages_spanned(3000), 1);
        assert_eq!(pages_spanned(PAGE_FRAME_SIZE + 1), 2);
    }
}
