use std::time::Duration;

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    config::{ChainConfig, Defaults, Network},
    error::WatcherError,
    sink::Sink,
    watcher::{
        DEFAULT_BACKOFF_MAX_DELAY, DEFAULT_BACKOFF_MIN_DELAY, DEFAULT_POLL_INTERVAL,
        DEFAULT_STREAM_BUFFER_CAPACITY, engine::Watcher,
    },
};

/// Builder/configuration for a single-chain [`Watcher`].
#[derive(Clone, Debug)]
pub struct WatcherBuilder {
    pub chain: Chain,
    /// Maximum number of heights requested from the adapter per cycle.
    pub max_batch_size: u64,
    /// Idle time between cycles once caught up.
    pub poll_interval: Duration,
    /// Where to start when the sink holds no cursor.
    pub genesis_height: Option<u64>,
    pub buffer_capacity: usize,
    pub backoff_min_delay: Duration,
    pub backoff_max_delay: Duration,
}

impl WatcherBuilder {
    /// A builder with the chain's default batch size.
    #[must_use]
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            max_batch_size: chain.default_max_batch_size(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            genesis_height: None,
            buffer_capacity: DEFAULT_STREAM_BUFFER_CAPACITY,
            backoff_min_delay: DEFAULT_BACKOFF_MIN_DELAY,
            backoff_max_delay: DEFAULT_BACKOFF_MAX_DELAY,
        }
    }

    /// A builder with every per-chain override from configuration applied.
    #[must_use]
    pub fn from_config(config: &ChainConfig, defaults: &Defaults, network: Network) -> Self {
        let mut builder = Self::new(config.chain)
            .max_batch_size(config.max_batch_size())
            .poll_interval(config.poll_interval(defaults))
            .backoff(
                Duration::from_millis(defaults.backoff_min_ms),
                Duration::from_millis(defaults.backoff_max_ms),
            );
        builder.genesis_height = config.genesis_height(network);
        builder
    }

    /// Must be greater than 0.
    #[must_use]
    pub fn max_batch_size(mut self, max_batch_size: u64) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Must be greater than 0.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn genesis_height(mut self, height: u64) -> Self {
        self.genesis_height = Some(height);
        self
    }

    /// Sets the stream buffer capacity.
    ///
    /// Controls the maximum number of messages that can be buffered in the stream
    /// before backpressure is applied. Must be greater than 0.
    #[must_use]
    pub fn buffer_capacity(mut self, buffer_capacity: usize) -> Self {
        self.buffer_capacity = buffer_capacity;
        self
    }

    /// Delay bounds for retrying transient failures; delays double from `min` up to `max`.
    #[must_use]
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.backoff_min_delay = min;
        self.backoff_max_delay = max.max(min);
        self
    }

    /// # Errors
    ///
    /// * [`WatcherError::InvalidMaxBatchSize`] - if the batch size is 0.
    /// * [`WatcherError::InvalidPollInterval`] - if the poll interval is zero.
    /// * [`WatcherError::InvalidBufferCapacity`] - if the buffer capacity is 0.
    pub fn build<A: ChainAdapter + 'static, S: Sink + 'static>(
        self,
        adapter: A,
        sink: S,
    ) -> Result<Watcher<A, S>, WatcherError> {
        if self.max_batch_size == 0 {
            return Err(WatcherError::InvalidMaxBatchSize);
        }
        if self.poll_interval.is_zero() {
            return Err(WatcherError::InvalidPollInterval);
        }
        if self.buffer_capacity == 0 {
            return Err(WatcherError::InvalidBufferCapacity);
        }
        Ok(Watcher::new(self, adapter, sink))
    }
}
