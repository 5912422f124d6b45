//! One watcher per configured chain, sharing nothing but the sink.

use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::{AnyAdapter, ChainAdapter},
    chain::Chain,
    config::WatcherConfig,
    error::{AdapterError, WatcherError},
    sink::Sink,
    types::{WatcherMessage, WatcherResult},
    watcher::{
        builder::WatcherBuilder,
        engine::{Watcher, join},
        policy::Retry,
    },
};

/// How one chain's watcher ended.
#[derive(Debug, Clone)]
pub struct ChainReport {
    pub chain: Chain,
    pub result: Result<(), WatcherError>,
}

/// Runs watchers side by side.
///
/// Each watcher gets a child of the supervisor's cancellation token, so a fatal error ends only
/// that chain while [`Supervisor::shutdown`] stops all of them. Progress streams are drained and
/// logged here.
#[derive(Debug)]
pub struct Supervisor<S> {
    sink: S,
    cancel: CancellationToken,
    tasks: JoinSet<ChainReport>,
}

impl<S: Sink + Clone + 'static> Supervisor<S> {
    #[must_use]
    pub fn new(sink: S) -> Self {
        Self { sink, cancel: CancellationToken::new(), tasks: JoinSet::new() }
    }

    /// Connects and starts every configured chain.
    ///
    /// Each chain connects in its own task, so an unreachable endpoint delays only that chain. A
    /// chain with a fatal configuration error is reported by [`Supervisor::wait`] without
    /// affecting the others.
    #[must_use]
    pub fn from_config(config: &WatcherConfig, sink: S) -> Self {
        let mut supervisor = Self::new(sink);
        for chain_config in &config.chains {
            let builder = WatcherBuilder::from_config(chain_config, &config.defaults, config.network);
            let chain_config = chain_config.clone();
            let defaults = config.defaults.clone();
            supervisor.spawn_connecting(builder, move || {
                let chain_config = chain_config.clone();
                let defaults = defaults.clone();
                async move { AnyAdapter::connect(&chain_config, &defaults).await }
            });
        }
        supervisor
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Starts `watcher` under this supervisor.
    pub fn spawn<A: ChainAdapter + 'static>(&mut self, watcher: Watcher<A, S>) {
        let watcher = watcher.with_cancellation(self.cancel.child_token());
        self.tasks.spawn(run(watcher));
    }

    /// Starts a watcher for `builder.chain` once `connect` yields its adapter.
    ///
    /// Transient connection failures are retried with the builder's backoff until shutdown. A
    /// fatal one, or an invalid builder, ends only this chain.
    pub fn spawn_connecting<A, F, Fut>(&mut self, builder: WatcherBuilder, mut connect: F)
    where
        A: ChainAdapter + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, AdapterError>> + Send,
    {
        let cancel = self.cancel.child_token();
        let sink = self.sink.clone();
        self.tasks.spawn(async move {
            let chain = builder.chain;
            let mut retry = Retry::new(builder.backoff_min_delay, builder.backoff_max_delay);
            let adapter = loop {
                match connect().await {
                    Ok(adapter) => break adapter,
                    Err(AdapterError::FatalConfiguration(message)) => {
                        error!(chain = %chain, error = %message, "Chain not started");
                        return ChainReport { chain, result: Err(WatcherError::FatalConfiguration(message)) };
                    }
                    Err(error) => {
                        let (attempt, delay) = retry.next_delay();
                        warn!(
                            chain = %chain,
                            attempt = attempt,
                            delay_ms = delay.as_millis(),
                            error = %error,
                            "Connecting chain adapter failed, retrying"
                        );
                        tokio::select! {
                            () = cancel.cancelled() => return ChainReport { chain, result: Ok(()) },
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            };
            match builder.build(adapter, sink) {
                Ok(watcher) => run(watcher.with_cancellation(cancel)).await,
                Err(error) => {
                    error!(chain = %chain, error = %error, "Chain not started");
                    ChainReport { chain, result: Err(error) }
                }
            }
        });
    }

    /// Watchers started and not yet collected by [`Supervisor::wait`].
    #[must_use]
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown(&self) {
        info!(running = self.tasks.len(), "Shutting down watchers");
        self.cancel.cancel();
    }

    /// Waits for every watcher to end, whether by shutdown or by a fatal error.
    pub async fn wait(mut self) -> Vec<ChainReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Watcher supervisor task failed"),
            }
        }
        reports
    }

    /// [`Supervisor::shutdown`], then [`Supervisor::wait`].
    pub async fn stop(self) -> Vec<ChainReport> {
        self.shutdown();
        self.wait().await
    }
}

async fn run<A: ChainAdapter + 'static, S: Sink + 'static>(watcher: Watcher<A, S>) -> ChainReport {
    let chain = watcher.chain();
    let (mut stream, task, _) = watcher.start().into_parts();
    while let Some(item) = stream.next().await {
        log_progress(chain, &item);
    }
    ChainReport { chain, result: join(task).await }
}

fn log_progress(chain: Chain, item: &WatcherResult) {
    match item {
        Ok(WatcherMessage::Stored(batch)) => info!(
            chain = %chain,
            from = batch.from,
            to = batch.to,
            messages = batch.messages,
            "Stored"
        ),
        Ok(WatcherMessage::Notification(notification)) => {
            info!(chain = %chain, notification = ?notification, "Watcher progress");
        }
        Err(error) => error!(chain = %chain, error = %error, "Watcher failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::{
        config::{ChainConfig, SinkConfig},
        error::AdapterError,
        sink::InMemorySink,
        test_utils::MockAdapter,
    };

    fn watcher(adapter: &MockAdapter, chain: Chain, sink: &InMemorySink) -> Watcher<MockAdapter, InMemorySink> {
        WatcherBuilder::new(chain)
            .genesis_height(1)
            .poll_interval(Duration::from_millis(100))
            .build(adapter.clone(), sink.clone())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_chain_does_not_stop_the_others() -> anyhow::Result<()> {
        let sink = InMemorySink::new();
        let healthy = MockAdapter::new(Chain::Ethereum).with_finalized(20);
        let broken = MockAdapter::new(Chain::Bsc).with_finalized(20);
        broken.push_range_error(AdapterError::fatal("contract address missing"));

        let mut supervisor = Supervisor::new(sink.clone());
        supervisor.spawn(watcher(&healthy, Chain::Ethereum, &sink));
        supervisor.spawn(watcher(&broken, Chain::Bsc, &sink));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.get_cursor(Chain::Ethereum).await?, Some(MockAdapter::block_key(20)));
        assert_eq!(sink.get_cursor(Chain::Bsc).await?, None);

        healthy.set_finalized(Some(25));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.get_cursor(Chain::Ethereum).await?, Some(MockAdapter::block_key(25)));

        let mut reports = supervisor.stop().await;
        reports.sort_by_key(|report| report.chain);
        assert_eq!(reports.len(), 2);
        assert!(reports[0].result.is_ok());
        assert!(matches!(reports[1].result, Err(WatcherError::FatalConfiguration(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_connect_failures_are_retried() -> anyhow::Result<()> {
        let sink = InMemorySink::new();
        let adapter = MockAdapter::new(Chain::Ethereum).with_finalized(20);
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut supervisor = Supervisor::new(sink.clone());
        let builder = WatcherBuilder::new(Chain::Ethereum)
            .genesis_height(1)
            .poll_interval(Duration::from_millis(100))
            .backoff(Duration::from_millis(100), Duration::from_secs(1));
        let connecting = Arc::clone(&attempts);
        supervisor.spawn_connecting(builder, move || {
            let adapter = adapter.clone();
            let attempt = connecting.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    return Err(AdapterError::transient("connection refused"));
                }
                Ok(adapter)
            }
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sink.get_cursor(Chain::Ethereum).await?, Some(MockAdapter::block_key(20)));

        let reports = supervisor.stop().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].result.is_ok());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_connect_retries() -> anyhow::Result<()> {
        let mut supervisor = Supervisor::new(InMemorySink::new());
        supervisor.spawn_connecting(WatcherBuilder::new(Chain::Bsc), || async {
            Err::<MockAdapter, _>(AdapterError::transient("connection refused"))
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        let reports = supervisor.stop().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].chain, Chain::Bsc);
        assert!(reports[0].result.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn misconfigured_chains_are_reported() -> anyhow::Result<()> {
        let mut missing_contract = ChainConfig::new(Chain::Aptos);
        missing_contract.rpc = Some("https://aptos.example/v1".into());
        let config = WatcherConfig {
            chains: vec![missing_contract],
            sink: SinkConfig::Memory,
            ..WatcherConfig::default()
        };

        let supervisor = Supervisor::from_config(&config, InMemorySink::new());
        let reports = supervisor.wait().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].chain, Chain::Aptos);
        assert!(matches!(reports[0].result, Err(WatcherError::FatalConfiguration(_))));
        Ok(())
    }
}
