//! One-shot ingestion of an explicit height range.

use std::time::Duration;

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    config::{ChainConfig, Defaults},
    consumer::find_missing_blocks,
    error::{AdapterError, WatcherError},
    sink::Sink,
    types::StoredBatch,
    watcher::{
        DEFAULT_BACKOFF_MAX_DELAY, DEFAULT_BACKOFF_MIN_DELAY,
        policy::{Retry, Span},
        range_iterator::{RangeIterator, contiguous_runs},
    },
};

/// Retries allowed per range before a backfill gives up.
pub const DEFAULT_BACKFILL_RETRIES: usize = 5;

/// Writes `[from, to]` through a sink without reading or moving the chain's cursor.
///
/// Ranges are requested in `max_batch_size` chunks, oldest first. Rejected ranges are halved like
/// in the live watcher; transient failures are retried a bounded number of times and then
/// reported, since an operator is waiting on the result. Re-running a backfill is harmless.
#[derive(Debug)]
pub struct Backfill<A, S> {
    chain: Chain,
    adapter: A,
    sink: S,
    max_batch_size: u64,
    max_retries: usize,
    backoff_min_delay: Duration,
    backoff_max_delay: Duration,
}

impl<A: ChainAdapter, S: Sink> Backfill<A, S> {
    #[must_use]
    pub fn new(chain: Chain, adapter: A, sink: S) -> Self {
        Self {
            chain,
            adapter,
            sink,
            max_batch_size: chain.default_max_batch_size(),
            max_retries: DEFAULT_BACKFILL_RETRIES,
            backoff_min_delay: DEFAULT_BACKOFF_MIN_DELAY,
            backoff_max_delay: DEFAULT_BACKOFF_MAX_DELAY,
        }
    }

    #[must_use]
    pub fn from_config(config: &ChainConfig, defaults: &Defaults, adapter: A, sink: S) -> Self {
        Self::new(config.chain, adapter, sink)
            .max_batch_size(config.max_batch_size())
            .max_retries(defaults.max_retries)
            .backoff(Duration::from_millis(defaults.backoff_min_ms), Duration::from_millis(defaults.backoff_max_ms))
    }

    /// Must be greater than 0.
    #[must_use]
    pub fn max_batch_size(mut self, max_batch_size: u64) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min_delay = min;
        self.backoff_max_delay = max.max(min);
        self
    }

    /// Ingests every height in `from..=to`.
    ///
    /// # Errors
    ///
    /// * [`WatcherError::InvalidRange`] - if `from > to`.
    /// * [`WatcherError::InvalidMaxBatchSize`] - if the batch size is 0.
    /// * [`WatcherError::FatalConfiguration`] - as soon as the adapter reports one.
    /// * [`WatcherError::Adapter`] or [`WatcherError::UnsupportedRange`] - once a range has used
    ///   up its retries. Batches stored before that stay stored.
    /// * [`WatcherError::Sink`] - if a write fails.
    pub async fn run(&self, from: u64, to: u64) -> Result<Vec<StoredBatch>, WatcherError> {
        if from > to {
            return Err(WatcherError::InvalidRange { from, to });
        }
        if self.max_batch_size == 0 {
            return Err(WatcherError::InvalidMaxBatchSize);
        }
        info!(chain = %self.chain, from = from, to = to, "Starting backfill");

        let mut span = Span::new(self.max_batch_size);
        let mut stored = Vec::new();
        let mut chunks = RangeIterator::forward(from, to, self.max_batch_size);
        for chunk in chunks.by_ref() {
            self.fill_chunk(*chunk.start(), *chunk.end(), &mut span, &mut stored).await?;
        }

        info!(
            chain = %self.chain,
            from = from,
            to = to,
            chunks = chunks.batch_count(),
            messages = stored.iter().map(|batch| batch.messages).sum::<usize>(),
            "Backfill complete"
        );
        Ok(stored)
    }

    /// Re-ingests only the heights in `from..=to` that have no block row.
    ///
    /// # Errors
    ///
    /// As [`Backfill::run`], plus sink errors from the gap scan.
    pub async fn for_gaps(&self, from: u64, to: u64) -> Result<Vec<StoredBatch>, WatcherError> {
        let missing = find_missing_blocks(&self.sink, self.chain, from, to).await?;
        let runs = contiguous_runs(&missing);
        if !runs.is_empty() {
            info!(chain = %self.chain, heights = missing.len(), runs = runs.len(), "Closing gaps");
        }
        let mut stored = Vec::new();
        for run in runs {
            stored.extend(self.run(*run.start(), *run.end()).await?);
        }
        Ok(stored)
    }

    async fn fill_chunk(
        &self,
        from: u64,
        to: u64,
        span: &mut Span,
        stored: &mut Vec<StoredBatch>,
    ) -> Result<(), WatcherError> {
        let mut retry = Retry::new(self.backoff_min_delay, self.backoff_max_delay);
        let mut next = from;
        while next <= to {
            let end = span.range_end(next, to);
            let error = match self.adapter.get_messages_for_range(next, end).await {
                Ok(vaas) => {
                    self.sink.store_vaas_by_block(self.chain, &vaas).await?;
                    debug!(chain = %self.chain, from = next, to = end, blocks = vaas.len(), "Backfilled range");
                    stored.push(StoredBatch {
                        chain: self.chain,
                        from: next,
                        to: end,
                        blocks: vaas.len(),
                        messages: vaas.message_count(),
                        last_key: vaas.last_key().cloned(),
                    });
                    retry.reset();
                    span.grow();
                    match end.checked_add(1) {
                        Some(after) => next = after,
                        None => break,
                    }
                    continue;
                }
                Err(AdapterError::UnsupportedRange { reason, .. }) if span.shrink() => {
                    warn!(
                        chain = %self.chain,
                        from = next,
                        to = end,
                        span = span.get(),
                        reason = %reason,
                        "Range rejected, shrinking"
                    );
                    continue;
                }
                Err(AdapterError::FatalConfiguration(message)) => {
                    return Err(WatcherError::FatalConfiguration(message));
                }
                Err(error) => error,
            };

            if retry.attempt() >= self.max_retries {
                error!(chain = %self.chain, from = next, to = end, error = %error, "Backfill giving up");
                return Err(error.into());
            }
            let (attempt, delay) = retry.next_delay();
            warn!(
                chain = %self.chain,
                from = next,
                to = end,
                attempt = attempt,
                error = %error,
                "Backfill retrying"
            );
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
