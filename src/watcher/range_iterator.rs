use std::ops::RangeInclusive;

/// An iterator that yields height ranges of a configurable size, oldest first.
#[derive(Debug, Clone)]
pub struct RangeIterator {
    current: u64,
    end: u64,
    range_size: u64,
    batch_count: u64,
    total_batches: u64,
}

impl RangeIterator {
    /// Yields ranges from `start` toward `end`, inclusive.
    ///
    /// # Panics
    ///
    /// Panics if `max_range` is 0.
    #[must_use]
    pub const fn forward(start: u64, end: u64, max_range: u64) -> Self {
        assert!(max_range >= 1, "max_range must be at least 1");
        let total_batches = if start > end { 0 } else { (end - start) / max_range + 1 };
        Self { current: start, end, range_size: max_range, batch_count: 0, total_batches }
    }

    /// Returns the number of batches yielded so far.
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.batch_count
    }
}

impl Iterator for RangeIterator {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_count >= self.total_batches {
            return None;
        }

        self.batch_count += 1;
        if self.batch_count % 10 == 0 {
            debug!(batch_count = self.batch_count, "Processed batches");
        }

        let batch_start = self.current;
        let batch_end = batch_start.saturating_add(self.range_size - 1).min(self.end);
        self.current = batch_end.saturating_add(1);

        Some(batch_start..=batch_end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match usize::try_from(self.total_batches - self.batch_count) {
            Ok(remaining) => (remaining, Some(remaining)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Groups ascending heights into maximal runs of consecutive values.
pub(crate) fn contiguous_runs(heights: &[u64]) -> Vec<RangeInclusive<u64>> {
    let mut runs: Vec<RangeInclusive<u64>> = Vec::new();
    for &height in heights {
        match runs.last_mut() {
            Some(run) if run.end().checked_add(1) == Some(height) => *run = *run.start()..=height,
            _ => runs.push(height..=height),
        }
    }
    runs
}
