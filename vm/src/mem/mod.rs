pub mod frame;
pub mod page_replacement;
pub mod swapping;
pub mod user_pool;

use core::fmt;

pub use frame::{FrameId, FramePool};
pub use swapping::{SwapSlot, SwapTable};
pub use user_pool::UserPool;

/// A frame of the user pool, numbered from the start of the pool.
///
/// This is not a hardware frame number. A page table that programs a real
/// MMU must add the pool's base, see [`UserPool::kernel_address`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysFrame(usize);

impl PhysFrame {
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    pub const fn number(&self) -> usize {
        self.0
    }
}

impl fmt::Display for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}

/// Where user frames come from.
///
/// # Safety
///
/// Implementations must hand out each frame at most once until it is
/// deallocated, and the slices returned by [`FrameSource::frame`] and
/// [`FrameSource::frame_mut`] must be exactly `PAGE_FRAME_SIZE` bytes of that
/// frame's memory and nothing else.
pub unsafe trait FrameSource: Send {
    /// Allocate one zeroed frame, or `None` if the pool is exhausted.
    fn alloc(&mut self) -> Option<PhysFrame>;

    /// Return a frame previously handed out by [`FrameSource::alloc`].
    fn dealloc(&mut self, frame: PhysFrame);

    fn frame(&self, frame: PhysFrame) -> &[u8];

    fn frame_mut(&mut self, frame: PhysFrame) -> &mut [u8];

    /// Total number of frames in the pool.
    fn capacity(&self) -> usize;

    /// Number of frames currently handed out.
    fn allocated(&self) -> usize;
}
