use crate::{
    error::{Error, Result},
    utils::round_up,
};

/// Capacity change the caller has to apply to every ring slot's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resize {
    Grow { from: usize, to: usize },
    Shrink { from: usize, to: usize },
}

impl Resize {
    pub fn capacity(self) -> usize {
        match self {
            Resize::Grow { to, .. } | Resize::Shrink { to, .. } => to,
        }
    }
}

/// Chunked bump allocator over a buffer shared by all ring slots.
///
/// Live slots are always `0..live`; freeing from the middle leaves a hole the
/// caller closes by compaction. Capacity is a whole number of chunks and never
/// drops below one chunk.
#[derive(Clone, Debug)]
pub struct SlotAllocator {
    name: &'static str,
    chunk: usize,
    hysteresis_chunks: usize,
    live: usize,
    capacity: usize,
}

impl SlotAllocator {
    pub fn new(name: &'static str, chunk: usize, hysteresis_chunks: usize) -> Self {
        let chunk = chunk.max(1);

        Self {
            name,
            chunk,
            hysteresis_chunks,
            live: 0,
            capacity: chunk,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    /// Reserves `n` slots at the end. Returns their first index and the
    /// capacity change needed to hold them, if any.
    pub fn allocate(&mut self, n: usize) -> (usize, Option<Resize>) {
        let start = self.live;

        if n == 0 {
            return (start, None);
        }

        self.live += n;

        if self.live <= self.capacity {
            return (start, None);
        }

        let resize = Resize::Grow {
            from: self.capacity,
            to: round_up(self.live, self.chunk),
        };
        self.capacity = resize.capacity();

        tracing::debug!(
            allocator = self.name,
            live = self.live,
            ?resize,
            "allocator grew"
        );

        (start, Some(resize))
    }

    /// Releases `start..start + n`. Slots after the range must be compacted
    /// down by the caller.
    pub fn free(&mut self, start: usize, n: usize) -> Result<Option<Resize>> {
        if n == 0 {
            return Ok(None);
        }

        if start.checked_add(n).map_or(true, |end| end > self.live) {
            return Err(Error::invariant(format!(
                "{} allocator: freeing {start}..{} outside live range 0..{}",
                self.name,
                start.saturating_add(n),
                self.live
            )));
        }

        self.live -= n;

        let band = self.hysteresis_chunks * self.chunk;
        if self.live + band >= self.capacity {
            return Ok(None);
        }

        let to = round_up(self.live, self.chunk).max(self.chunk);
        if to >= self.capacity {
            return Ok(None);
        }

        let resize = Resize::Shrink {
            from: self.capacity,
            to,
        };
        self.capacity = to;

        tracing::debug!(
            allocator = self.name,
            live = self.live,
            ?resize,
            "allocator shrank"
        );

        Ok(Some(resize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_one_chunk() {
        let allocator = SlotAllocator::new("objects", 4, 1);

        assert_eq!(allocator.live(), 0);
        assert_eq!(allocator.capacity(), 4);
    }

    #[test]
    fn zero_allocation_is_a_no_op() {
        let mut allocator = SlotAllocator::new("objects", 4, 1);
        allocator.allocate(3);

        assert_eq!(allocator.allocate(0), (3, None));
        assert_eq!(allocator.live(), 3);
    }

    #[test]
    fn growth_rounds_up_to_chunks() {
        let mut allocator = SlotAllocator::new("objects", 4, 1);

        assert_eq!(allocator.allocate(4), (0, None));
        assert_eq!(
            allocator.allocate(6),
            (4, Some(Resize::Grow { from: 4, to: 12 }))
        );
        assert_eq!(allocator.capacity(), 12);
    }

    #[test]
    fn allocate_then_free_within_chunk_never_resizes() {
        for hysteresis in 0..3 {
            let mut allocator = SlotAllocator::new("objects", 8, hysteresis);

            for n in 1..=8 {
                let (start, grow) = allocator.allocate(n);
                assert_eq!(grow, None);
                assert_eq!(allocator.free(start, n).unwrap(), None);
                assert_eq!(allocator.capacity(), 8);
            }
        }
    }

    #[test]
    fn shrink_waits_for_hysteresis_band() {
        let mut allocator = SlotAllocator::new("objects", 4, 1);
        allocator.allocate(5);
        assert_eq!(allocator.capacity(), 8);

        // 4 remaining, one empty chunk of slack: kept.
        assert_eq!(allocator.free(4, 1).unwrap(), None);
        assert_eq!(allocator.capacity(), 8);

        assert_eq!(
            allocator.free(3, 1).unwrap(),
            Some(Resize::Shrink { from: 8, to: 4 })
        );
        assert_eq!(allocator.live(), 3);
    }

    #[test]
    fn zero_hysteresis_shrinks_on_empty_chunk() {
        let mut allocator = SlotAllocator::new("objects", 4, 0);
        allocator.allocate(5);

        assert_eq!(
            allocator.free(0, 1).unwrap(),
            Some(Resize::Shrink { from: 8, to: 4 })
        );
    }

    #[test]
    fn capacity_never_drops_below_one_chunk() {
        let mut allocator = SlotAllocator::new("objects", 4, 0);
        allocator.allocate(12);

        assert_eq!(
            allocator.free(0, 12).unwrap(),
            Some(Resize::Shrink { from: 12, to: 4 })
        );
        assert_eq!(allocator.capacity(), 4);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "structural invariant"))]
    fn freeing_past_live_is_an_invariant_error() {
        let mut allocator = SlotAllocator::new("objects", 4, 1);
        allocator.allocate(2);

        assert!(matches!(allocator.free(1, 2), Err(Error::Invariant(_))));
    }
}
