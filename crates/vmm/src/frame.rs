//! The page reference table.
//!
//! Modeled after Linux's `mem_map`, this table holds one use count per physical frame between
//! the kernel floor and the end of memory. A count of zero means free, one means exclusively
//! owned, and anything above one means the frame is shared read-only.

use alloc::vec::Vec;

use crate::FrameNumber;

/// Use counts for every managed physical frame.
pub struct PageReferences {
    floor: FrameNumber,
    counts: Vec<u16>,
}

impl PageReferences {
    /// Creates a table covering the frames from `floor` up to `end` (exclusive), all free.
    ///
    /// # Panics
    /// Panics if `floor` is past `end`.
    pub fn new(floor: FrameNumber, end: FrameNumber) -> Self {
        assert!(floor <= end, "kernel floor {floor} lies past the end of memory {end}");
        let mut counts = Vec::new();
        counts.resize(end - floor, 0);
        Self { floor, counts }
    }

    /// Returns the first managed frame.
    pub fn floor(&self) -> FrameNumber {
        self.floor
    }

    /// Returns the frame one past the last managed frame.
    pub fn end(&self) -> FrameNumber {
        self.floor + self.counts.len()
    }

    /// Returns the number of managed frames.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns whether `frame` is tracked by this table.
    pub fn is_managed(&self, frame: FrameNumber) -> bool {
        frame >= self.floor && frame < self.end()
    }

    fn index(&self, frame: FrameNumber) -> Option<usize> {
        self.is_managed(frame).then(|| frame - self.floor)
    }

    /// Returns the use count of `frame`, or `None` if it is not managed.
    pub fn count(&self, frame: FrameNumber) -> Option<u16> {
        self.index(frame).map(|index| self.counts[index])
    }

    /// Finds the highest free frame, marks it used once and returns it.
    pub fn claim_free(&mut self) -> Option<FrameNumber> {
        let index = self.counts.iter().rposition(|&count| count == 0)?;
        self.counts[index] = 1;
        Some(self.floor + index)
    }

    /// Adds a reference to a managed frame.
    ///
    /// # Panics
    /// Panics if the frame is not managed, is free, or its count would overflow.
    pub fn increment(&mut self, frame: FrameNumber) {
        let Some(index) = self.index(frame) else {
            panic!("cannot reference unmanaged frame {frame}");
        };
        let count = &mut self.counts[index];
        assert!(*count != 0, "cannot share free frame {frame}");
        *count = count
            .checked_add(1)
            .unwrap_or_else(|| panic!("reference count overflow on frame {frame}"));
    }

    /// Drops a reference to a managed frame and returns the remaining count.
    ///
    /// # Panics
    /// Panics if the frame is not managed or is already free.
    pub fn decrement(&mut self, frame: FrameNumber) -> u16 {
        let Some(index) = self.index(frame) else {
            panic!("cannot release unmanaged frame {frame}");
        };
        let count = &mut self.counts[index];
        assert!(*count != 0, "trying to free free page {frame}");
        *count -= 1;
        *count
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.counts.iter().filter(|&&count| count == 0).count()
    }

    /// Returns the number of extra references held on shared frames.
    pub fn shared_count(&self) -> usize {
        self.counts
            .iter()
            .filter(|&&count| count > 1)
            .map(|&count| usize::from(count) - 1)
            .sum()
    }

    /// Iterates over `(frame, count)` for every managed frame.
    pub fn iter(&self) -> impl Iterator<Item = (FrameNumber, u16)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .map(|(index, &count)| (self.floor + index, count))
    }
}
