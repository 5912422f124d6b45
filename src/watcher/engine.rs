//! The per-chain polling loop.

use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::ChainAdapter,
    chain::Chain,
    error::{AdapterError, SinkError, WatcherError},
    sink::Sink,
    types::{BlockKey, Notification, StoredBatch, TryStream, VaasByBlock, WatcherResult},
    watcher::{
        builder::WatcherBuilder,
        policy::{Retry, Span},
    },
};

/// Drives one chain adapter forever, writing every finalized range to a sink.
///
/// Each cycle reads the finalized height, requests at most `max_batch_size` heights after the
/// cursor, stores the result and only then advances the cursor. Transient failures are retried
/// on the same range with capped exponential backoff; rejected ranges are halved. Only a fatal
/// configuration error ends the watcher on its own.
#[derive(Debug)]
pub struct Watcher<A, S> {
    chain: Chain,
    adapter: A,
    sink: S,
    max_batch_size: u64,
    poll_interval: Duration,
    genesis_height: Option<u64>,
    buffer_capacity: usize,
    backoff_min_delay: Duration,
    backoff_max_delay: Duration,
    cancel: CancellationToken,
}

pub type WatcherTask = JoinHandle<Result<(), WatcherError>>;

/// A running watcher: its progress stream, its task and a way to stop it.
#[derive(Debug)]
pub struct WatcherHandle {
    chain: Chain,
    stream: ReceiverStream<WatcherResult>,
    task: WatcherTask,
    cancel: CancellationToken,
}

impl WatcherHandle {
    #[must_use]
    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn stream(&mut self) -> &mut ReceiverStream<WatcherResult> {
        &mut self.stream
    }

    /// Takes the stream out; dropping it later stops the watcher.
    #[must_use]
    pub fn into_parts(self) -> (ReceiverStream<WatcherResult>, WatcherTask, CancellationToken) {
        (self.stream, self.task, self.cancel)
    }

    /// Asks the watcher to stop after its current call.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Stops the watcher and waits for it.
    ///
    /// # Errors
    ///
    /// The fatal error the watcher ended with, if any.
    pub async fn stop(self) -> Result<(), WatcherError> {
        self.cancel.cancel();
        drop(self.stream);
        join(self.task).await
    }
}

/// Waits for a watcher task, treating an aborted task as a clean stop.
///
/// # Errors
///
/// The fatal error the watcher ended with, or a panic.
pub async fn join(task: WatcherTask) -> Result<(), WatcherError> {
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(WatcherError::FatalConfiguration(format!("watcher task panicked: {e}"))),
    }
}

/// Why a cycle did not complete.
enum Interrupt {
    Retry(String),
    Fatal(WatcherError),
    Stop,
}

impl From<SinkError> for Interrupt {
    fn from(error: SinkError) -> Self {
        match error {
            SinkError::MalformedKey(key) => Interrupt::Fatal(WatcherError::MalformedKey(key)),
            other => Interrupt::Retry(other.to_string()),
        }
    }
}

impl<A: ChainAdapter + 'static, S: Sink + 'static> Watcher<A, S> {
    pub(crate) fn new(builder: WatcherBuilder, adapter: A, sink: S) -> Self {
        Self {
            chain: builder.chain,
            adapter,
            sink,
            max_batch_size: builder.max_batch_size,
            poll_interval: builder.poll_interval,
            genesis_height: builder.genesis_height,
            buffer_capacity: builder.buffer_capacity,
            backoff_min_delay: builder.backoff_min_delay,
            backoff_max_delay: builder.backoff_max_delay,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops this watcher when `token` is cancelled, alongside any other watcher sharing it.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// Spawns the watcher on the current runtime.
    #[must_use]
    pub fn start(self) -> WatcherHandle {
        let (sender, receiver) = mpsc::channel(self.buffer_capacity);
        let chain = self.chain;
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { self.run(sender).await });
        WatcherHandle { chain, stream: ReceiverStream::new(receiver), task, cancel }
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(chain = %self.chain)))]
    async fn run(self, sender: mpsc::Sender<WatcherResult>) -> Result<(), WatcherError> {
        let mut state = State {
            next: None,
            last_finalized: None,
            span: Span::new(self.max_batch_size),
            retry: Retry::new(self.backoff_min_delay, self.backoff_max_delay),
            backfilling: false,
        };

        let outcome = match self.bootstrap(&sender, &mut state).await {
            Ok(()) => self.poll_forever(&sender, &mut state).await,
            Err(interrupt) => interrupt,
        };

        match outcome {
            Interrupt::Fatal(error) => {
                error!(chain = %self.chain, error = %error, "Watcher failed");
                _ = sender.try_stream(error.clone()).await;
                Err(error)
            }
            Interrupt::Stop | Interrupt::Retry(_) => {
                info!(chain = %self.chain, next = ?state.next, "Watcher stopped");
                _ = sender.try_stream(Notification::Stopped).await;
                Ok(())
            }
        }
    }

    /// Resolves the first height to request: after the cursor, else genesis, else the tip.
    async fn bootstrap(&self, sender: &mpsc::Sender<WatcherResult>, state: &mut State) -> Result<(), Interrupt> {
        loop {
            match self.sink.get_cursor(self.chain).await {
                Ok(cursor) => {
                    state.next = match cursor {
                        Some(cursor) => Some(cursor.progress_height().saturating_add(1)),
                        None => self.genesis_height,
                    };
                    break;
                }
                Err(error) => self.recover(sender, state, error.into()).await?,
            }
        }
        info!(chain = %self.chain, resume_from = ?state.next, "Watcher bootstrapped");
        if !sender.try_stream(Notification::Bootstrapped { resume_from: state.next }).await {
            return Err(Interrupt::Stop);
        }
        Ok(())
    }

    async fn poll_forever(&self, sender: &mpsc::Sender<WatcherResult>, state: &mut State) -> Interrupt {
        loop {
            if self.cancel.is_cancelled() {
                return Interrupt::Stop;
            }
            let pause = match self.cycle(sender, state).await {
                Ok(Some(pause)) => pause,
                Ok(None) => continue,
                Err(interrupt) => match self.recover(sender, state, interrupt).await {
                    Ok(()) => continue,
                    Err(interrupt) => return interrupt,
                },
            };
            if !self.sleep(sender, pause).await {
                return Interrupt::Stop;
            }
        }
    }

    /// One poll. Returns how long to idle afterwards, or `None` to go again right away.
    async fn cycle(&self, sender: &mpsc::Sender<WatcherResult>, state: &mut State) -> Result<Option<Duration>, Interrupt> {
        let Some(finalized) = self.finalized_height(state).await? else {
            trace!(chain = %self.chain, "Nothing finalized yet");
            return Ok(Some(self.poll_interval));
        };
        let next = *state.next.get_or_insert(finalized);

        if finalized < next {
            if state.backfilling {
                state.backfilling = false;
                info!(chain = %self.chain, cursor = next - 1, "Caught up");
                if !sender.try_stream(Notification::CaughtUp).await {
                    return Err(Interrupt::Stop);
                }
            }
            return Ok(Some(self.poll_interval));
        }

        let behind = finalized - next + 1;
        if behind > self.max_batch_size && !state.backfilling {
            state.backfilling = true;
            info!(chain = %self.chain, from = next, finalized = finalized, behind = behind, "Backfilling");
            if !sender.try_stream(Notification::BackfillStarted { behind }).await {
                return Err(Interrupt::Stop);
            }
        }

        let to = state.span.range_end(next, finalized);
        let vaas = match self.adapter.get_messages_for_range(next, to).await {
            Ok(vaas) => vaas,
            Err(AdapterError::UnsupportedRange { reason, .. }) if state.span.shrink() => {
                let shrunk_to = state.span.range_end(next, finalized);
                warn!(
                    chain = %self.chain,
                    from = next,
                    to = to,
                    span = state.span.get(),
                    reason = %reason,
                    "Range rejected, shrinking"
                );
                if !sender.try_stream(Notification::RangeShrunk { from: next, to: shrunk_to }).await {
                    return Err(Interrupt::Stop);
                }
                return Ok(None);
            }
            Err(AdapterError::FatalConfiguration(message)) => {
                return Err(Interrupt::Fatal(WatcherError::FatalConfiguration(message)));
            }
            Err(error) => return Err(Interrupt::Retry(error.to_string())),
        };

        let batch = self.store(next, to, &vaas).await?;
        state.next = Some(match &batch.last_key {
            Some(last) => last.progress_height().saturating_add(1).max(next),
            None => to.saturating_add(1),
        });
        state.span.grow();
        state.retry.reset();
        debug!(
            chain = %self.chain,
            from = batch.from,
            to = batch.to,
            messages = batch.messages,
            cursor = ?batch.last_key,
            "Stored batch"
        );
        if !sender.try_stream(batch).await {
            return Err(Interrupt::Stop);
        }

        let remaining = state.next.is_some_and(|next| next <= finalized);
        Ok(if remaining { None } else { Some(self.poll_interval) })
    }

    async fn finalized_height(&self, state: &mut State) -> Result<Option<u64>, Interrupt> {
        let finalized = match self.adapter.get_finalized_height().await {
            Ok(finalized) => finalized,
            Err(AdapterError::FatalConfiguration(message)) => {
                return Err(Interrupt::Fatal(WatcherError::FatalConfiguration(message)));
            }
            Err(error) => return Err(Interrupt::Retry(error.to_string())),
        };
        if let (Some(current), Some(previous)) = (finalized, state.last_finalized) {
            if current < previous {
                return Err(Interrupt::Retry(format!("finalized height regressed from {previous} to {current}")));
            }
        }
        if finalized.is_some() {
            state.last_finalized = finalized;
        }
        Ok(finalized)
    }

    /// Writes the batch, then moves the cursor to its last key.
    async fn store(&self, from: u64, to: u64, vaas: &VaasByBlock) -> Result<StoredBatch, Interrupt> {
        self.sink.store_vaas_by_block(self.chain, vaas).await?;
        let last_key: Option<BlockKey> = vaas.last_key().cloned();
        if let Some(last) = &last_key {
            self.sink.set_cursor(self.chain, last).await?;
        }
        Ok(StoredBatch {
            chain: self.chain,
            from,
            to,
            blocks: vaas.len(),
            messages: vaas.message_count(),
            last_key,
        })
    }

    /// Backs off after a retryable failure; anything else is passed through.
    async fn recover(&self, sender: &mpsc::Sender<WatcherResult>, state: &mut State, interrupt: Interrupt) -> Result<(), Interrupt> {
        let Interrupt::Retry(reason) = interrupt else {
            return Err(interrupt);
        };
        let (attempt, delay) = state.retry.next_delay();
        warn!(
            chain = %self.chain,
            next = ?state.next,
            attempt = attempt,
            delay_ms = delay.as_millis(),
            error = %reason,
            "Transient failure, retrying"
        );
        if !sender.try_stream(Notification::Retrying { attempt, delay }).await {
            return Err(Interrupt::Stop);
        }
        if self.sleep(sender, delay).await { Ok(()) } else { Err(Interrupt::Stop) }
    }

    /// `false` when the watcher should stop instead.
    async fn sleep(&self, sender: &mpsc::Sender<WatcherResult>, duration: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sender.closed() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

struct State {
    /// First height not yet stored; `None` until the tip is known when starting from it.
    next: Option<u64>,
    last_finalized: Option<u64>,
    span: Span,
    retry: Retry,
    backfilling: bool,
}
