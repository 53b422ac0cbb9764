use kidneyos_shared::{
    mem::{MAX_USER_STACK_SIZE, OFFSET, PAGE_FRAME_SIZE, USER_STACK_TOP},
    sizes::MB,
};

/// Policy knobs of the VM core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// First address that belongs to the kernel. Faults and mappings at or
    /// above it are rejected.
    pub user_limit: usize,
    /// Top of the user stack (exclusive).
    pub stack_top: usize,
    /// The stack may grow down to `stack_top - max_stack_size`.
    pub max_stack_size: usize,
    /// How far below the stack pointer an access may land and still count as
    /// stack growth. `pusha` writes 32 bytes below `esp` before moving it.
    pub stack_growth_margin: usize,
    /// Largest mapping `mmap` will create, in pages.
    pub max_mmap_pages: usize,
}

impl VmConfig {
    pub const DEFAULT: Self = Self {
        user_limit: OFFSET,
        stack_top: USER_STACK_TOP,
        max_stack_size: MAX_USER_STACK_SIZE,
        stack_growth_margin: 32,
        max_mmap_pages: 256 * MB / PAGE_FRAME_SIZE,
    };

    /// Lowest address the stack may grow to.
    pub const fn stack_floor(&self) -> usize {
        self.stack_top.saturating_sub(self.max_stack_size)
    }

    /// Whether a fault at `addr` with the given stack pointer is the stack
    /// growing into a page that does not exist yet.
    pub const fn is_stack_access(&self, addr: usize, stack_pointer: usize) -> bool {
        addr >= self.stack_floor()
            && addr < self.stack_top
            && addr.saturating_add(self.stack_growth_margin) >= stack_pointer
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_growth_window() {
        let config = VmConfig::DEFAULT;
        let sp = config.stack_top - 0x100;
        assert!(config.is_stack_access(sp, sp));
        assert!(config.is_stack_access(sp - 32, sp));
        assert!(config.is_stack_access(sp - 4, sp));
        assert!(!config.is_stack_access(sp - 33, sp));
        // Above the stack pointer but inside the region (after `sub esp`).
        assert!(config.is_stack_access(sp + 8, sp));
        assert!(!config.is_stack_access(config.stack_top, sp));
        assert!(!config.is_stack_access(config.stack_floor() - 1, config.stack_floor()));
    }
}
