//! The user pool: physical frames handed to user pages, tracked by a core map.

use super::{FrameSource, PhysFrame};
#[cfg(any(test, feature = "emulation"))]
use alloc::{boxed::Box, vec};
use alloc::vec::Vec;
use bitbybit::bitfield;
use core::{ptr::NonNull, slice};
use kidneyos_shared::mem::PAGE_FRAME_SIZE;

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    /// Never handed out, e.g. a frame the bootloader still uses.
    #[bit(1, rw)]
    reserved: bool,
}

impl CoreMapEntry {
    fn is_free(&self) -> bool {
        !self.allocated() && !self.reserved()
    }
}

/// Next-fit search for a single free frame: resume where the last search
/// stopped and wrap around at most once.
#[derive(Default)]
pub struct NextFit {
    /// The next frame number to start searching for free frames.
    position: usize,
}

impl NextFit {
    pub fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        let total_frames = core_map.len();
        if total_frames == 0 {
            return None;
        }
        let start = self.position % total_frames;
        let found = (start..total_frames)
            .chain(0..start)
            .find(|&i| core_map[i].is_free())?;
        self.position = (found + 1) % total_frames;
        Some(found)
    }
}

pub struct UserPool {
    start: NonNull<u8>,
    core_map: Vec<CoreMapEntry>,
    placement: NextFit,
    frames_allocated: usize,
    /// Owns the frames when the pool is emulated on the host.
    #[cfg(any(test, feature = "emulation"))]
    _backing: Option<Box<[u8]>>,
}

// SAFETY: the pool is the only owner of the region it was built over.
unsafe impl Send for UserPool {}

impl UserPool {
    /// Build a pool over `frames` frames starting at `start`.
    ///
    /// # Safety
    ///
    /// `start` must be page-aligned and `start..start + frames * PAGE_FRAME_SIZE`
    /// must be memory nothing else uses for as long as the pool lives.
    pub unsafe fn new_in(start: NonNull<u8>, frames: usize) -> Self {
        Self {
            start,
            core_map: alloc::vec![CoreMapEntry::DEFAULT; frames],
            placement: NextFit::default(),
            frames_allocated: 0,
            #[cfg(any(test, feature = "emulation"))]
            _backing: None,
        }
    }

    /// A pool of `frames` frames carved out of the kernel heap.
    #[cfg(any(test, feature = "emulation"))]
    pub fn emulated(frames: usize) -> Self {
        let mut backing = vec![0u8; frames * PAGE_FRAME_SIZE].into_boxed_slice();
        let start = NonNull::new(backing.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            start,
            core_map: vec![CoreMapEntry::DEFAULT; frames],
            placement: NextFit::default(),
            frames_allocated: 0,
            _backing: Some(backing),
        }
    }

    /// The kernel virtual address of `frame`. The kernel maps physical memory
    /// at `OFFSET`, so the hardware frame number is
    /// `(kernel_address - OFFSET) / PAGE_FRAME_SIZE`.
    pub fn kernel_address(&self, frame: PhysFrame) -> usize {
        self.start.as_ptr() as usize + frame.number() * PAGE_FRAME_SIZE
    }

    /// Keep `frame` out of circulation.
    pub fn reserve(&mut self, frame: PhysFrame) {
        let entry = &mut self.core_map[frame.number()];
        assert!(!entry.allocated(), "reserving allocated {frame}");
        *entry = entry.with_reserved(true);
    }

    fn check(&self, frame: PhysFrame) {
        assert!(
            self.core_map
                .get(frame.number())
                .is_some_and(|entry| entry.allocated()),
            "access to unallocated {frame}"
        );
    }
}

// SAFETY: the core map hands each frame out once, and frame slices are
// computed from the frame number over the pool's own region.
unsafe impl FrameSource for UserPool {
    fn alloc(&mut self) -> Option<PhysFrame> {
        let index = self.placement.place(&self.core_map)?;
        self.core_map[index] = self.core_map[index].with_allocated(true);
        self.frames_allocated += 1;

        let frame = PhysFrame::new(index);
        self.frame_mut(frame).fill(0);
        Some(frame)
    }

    fn dealloc(&mut self, frame: PhysFrame) {
        let entry = &mut self.core_map[frame.number()];
        assert!(entry.allocated(), "double free of {frame}");
        *entry = entry.with_allocated(false);
        self.frames_allocated -= 1;
    }

    fn frame(&self, frame: PhysFrame) -> &[u8] {
        self.check(frame);
        // SAFETY: the frame lies inside the region given to `new_in`.
        unsafe {
            slice::from_raw_parts(
                self.start.as_ptr().add(frame.number() * PAGE_FRAME_SIZE),
                PAGE_FRAME_SIZE,
            )
        }
    }

    fn frame_mut(&mut self, frame: PhysFrame) -> &mut [u8] {
        self.check(frame);
        // SAFETY: as above, and `&mut self` makes the access exclusive.
        unsafe {
            slice::from_raw_parts_mut(
                self.start.as_ptr().add(frame.number() * PAGE_FRAME_SIZE),
                PAGE_FRAME_SIZE,
            )
        }
    }

    fn capacity(&self) -> usize {
        self.core_map.len()
    }

    fn allocated(&self) -> usize {
        self.frames_allocated
    }
}
