//! Victim selection among resident frames.

use super::FrameId;
use alloc::vec::Vec;

/// What the frame pool learned about one eviction candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// Pinned or mid-handoff; never evict it.
    Skip,
    /// Its accessed bit was set. The probe has cleared it.
    Referenced,
    /// Not referenced since the last sweep.
    Unreferenced,
}

pub trait PageReplacementPolicy: Send {
    /// Start tracking a frame that was just handed out.
    fn track(&mut self, frame: FrameId);
    /// Stop tracking a frame that went back to the free pool.
    fn untrack(&mut self, frame: FrameId);
    /// Pick a victim, asking `probe` about each candidate in turn.
    fn select_victim(&mut self, probe: &mut dyn FnMut(FrameId) -> Candidate) -> Option<FrameId>;
    /// Candidates the last `select_victim` looked at.
    fn last_inspected(&self) -> usize;
    /// Number of frames tracked.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Second-chance clock over frames in allocation order.
///
/// A sweep clears the accessed bit of every referenced frame it passes, so
/// two full turns of the hand always either find a victim or prove that every
/// frame is pinned.
#[derive(Debug, Default)]
pub struct Clock {
    ring: Vec<FrameId>,
    hand: usize,
    /// Candidates inspected by the last call to `select_victim`.
    last_inspected: usize,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageReplacementPolicy for Clock {
    fn track(&mut self, frame: FrameId) {
        debug_assert!(!self.ring.contains(&frame));
        // Insert just behind the hand so a new frame gets a full turn
        // before it is considered.
        if self.ring.is_empty() {
            self.ring.push(frame);
            self.hand = 0;
        } else {
            self.ring.insert(self.hand, frame);
            self.hand += 1;
        }
    }

    fn untrack(&mut self, frame: FrameId) {
        let Some(index) = self.ring.iter().position(|&f| f == frame) else {
            return;
        };
        self.ring.remove(index);
        if index < self.hand {
            self.hand -= 1;
        }
        if self.hand >= self.ring.len() {
            self.hand = 0;
        }
    }

    fn select_victim(&mut self, probe: &mut dyn FnMut(FrameId) -> Candidate) -> Option<FrameId> {
        self.last_inspected = 0;
        let len = self.ring.len();
        for _ in 0..2 * len {
            let frame = self.ring[self.hand];
            self.hand = (self.hand + 1) % len;
            self.last_inspected += 1;
            if probe(frame) == Candidate::Unreferenced {
                return Some(frame);
            }
        }
        None
    }

    fn last_inspected(&self) -> usize {
        self.last_inspected
    }

    fn len(&self) -> usize {
        self.ring.len()
    }
}
