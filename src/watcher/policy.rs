//! Batch sizing and retry pacing shared by the live watcher and backfills.

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

/// Width of the next range request.
///
/// Halves on every rejected range down to a single height and doubles back towards the maximum
/// after each success.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Span {
    max: u64,
    current: u64,
}

impl Span {
    pub(crate) fn new(max: u64) -> Self {
        let max = max.max(1);
        Self { max, current: max }
    }

    pub(crate) fn get(self) -> u64 {
        self.current
    }

    /// Range `from..=to` where `to` is capped by `limit`.
    pub(crate) fn range_end(self, from: u64, limit: u64) -> u64 {
        from.saturating_add(self.current - 1).min(limit)
    }

    pub(crate) fn grow(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    /// `false` once the span is already a single height.
    pub(crate) fn shrink(&mut self) -> bool {
        if self.current == 1 {
            return false;
        }
        self.current = (self.current / 2).max(1);
        true
    }
}

/// Consecutive transient failures and the delay before the next attempt.
#[derive(Debug)]
pub(crate) struct Retry {
    builder: ExponentialBuilder,
    backoff: Option<ExponentialBackoff>,
    max_delay: Duration,
    attempt: usize,
}

impl Retry {
    pub(crate) fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let builder = ExponentialBuilder::default()
            .with_min_delay(min_delay)
            .with_max_delay(max_delay)
            .without_max_times();
        Self { builder, backoff: None, max_delay, attempt: 0 }
    }

    pub(crate) fn attempt(&self) -> usize {
        self.attempt
    }

    /// Registers a failure and returns its attempt number and delay.
    pub(crate) fn next_delay(&mut self) -> (usize, Duration) {
        self.attempt += 1;
        let backoff = self.backoff.get_or_insert_with(|| self.builder.build());
        (self.attempt, whole_millis(backoff.next().unwrap_or(self.max_delay)))
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
        self.backoff = None;
    }
}

/// Rounds to the nearest millisecond; backoff delays are computed in floating point.
fn whole_millis(delay: Duration) -> Duration {
    let millis = delay.as_micros().saturating_add(500) / 1000;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_halves_and_recovers() {
        let mut span = Span::new(100);
        assert_eq!(span.range_end(10, 1_000), 109);
        assert_eq!(span.range_end(10, 50), 50);

        assert!(span.shrink());
        assert_eq!(span.get(), 50);
        while span.shrink() {}
        assert_eq!(span.get(), 1);
        assert_eq!(span.range_end(10, 1_000), 10);

        span.grow();
        span.grow();
        assert_eq!(span.get(), 4);
        for _ in 0..10 {
            span.grow();
        }
        assert_eq!(span.get(), 100);
    }

    #[test]
    fn zero_span_is_one() {
        let mut span = Span::new(0);
        assert_eq!(span.get(), 1);
        assert!(!span.shrink());
    }

    #[test]
    fn delays_round_to_whole_milliseconds() {
        assert_eq!(whole_millis(Duration::from_nanos(200_000_003)), Duration::from_millis(200));
        assert_eq!(whole_millis(Duration::from_nanos(199_999_997)), Duration::from_millis(200));
        assert_eq!(whole_millis(Duration::from_micros(1_499)), Duration::from_millis(1));
    }

    #[test]
    fn retry_delays_double_up_to_the_cap() {
        let mut retry = Retry::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(retry.next_delay(), (1, Duration::from_millis(100)));
        assert_eq!(retry.next_delay(), (2, Duration::from_millis(200)));
        assert_eq!(retry.next_delay(), (3, Duration::from_millis(350)));
        assert_eq!(retry.next_delay(), (4, Duration::from_millis(350)));

        retry.reset();
        assert_eq!(retry.attempt(), 0);
        assert_eq!(retry.next_delay(), (1, Duration::from_millis(100)));
    }
}
