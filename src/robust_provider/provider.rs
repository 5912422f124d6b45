use std::{borrow::Cow, fmt::Debug, sync::Arc, time::Duration};

use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::{Ethereum, Network},
    primitives::Bytes,
    providers::{Provider, RootProvider},
    rpc::{
        json_rpc::{RpcRecv, RpcSend},
        types::{Filter, Log},
    },
    transports::{RpcError, TransportErrorKind},
};
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;
use tokio::time::{error::Elapsed, timeout};

use crate::error::AdapterError;

/// JSON-RPC error code several node implementations use for "query exceeds limits".
const LIMIT_EXCEEDED_CODE: i64 = -32005;

const RANGE_LIMIT_MARKERS: [&str; 5] = [
    "block range",
    "range too large",
    "more than 10000 results",
    "query returned more than",
    "exceed maximum block range",
];

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Operation timed out")]
    Timeout,
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),
    #[error("Block not found, Block Id: {0}")]
    BlockNotFound(BlockId),
}

impl From<RpcError<TransportErrorKind>> for Error {
    fn from(err: RpcError<TransportErrorKind>) -> Self {
        Error::RpcError(Arc::new(err))
    }
}

impl From<Elapsed> for Error {
    fn from(_: Elapsed) -> Self {
        Error::Timeout
    }
}

impl Error {
    /// `true` when the node refused the request because of the size of the queried range.
    #[must_use]
    pub fn is_range_limit(&self) -> bool {
        matches!(self, Error::RpcError(err) if is_range_limit(err))
    }

    /// Classifies this error for a call that covered `from..=to`.
    #[must_use]
    pub fn into_adapter_error(self, from: u64, to: u64) -> AdapterError {
        if self.is_range_limit() {
            return AdapterError::unsupported(from, to, self.to_string());
        }
        AdapterError::transient(self.to_string())
    }
}

impl From<Error> for AdapterError {
    fn from(error: Error) -> Self {
        AdapterError::transient(error.to_string())
    }
}

fn is_range_limit(err: &RpcError<TransportErrorKind>) -> bool {
    let RpcError::ErrorResp(payload) = err else {
        return false;
    };
    let message = payload.message.to_ascii_lowercase();
    payload.code == LIMIT_EXCEEDED_CODE
        || RANGE_LIMIT_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Provider wrapper with built-in retry and timeout mechanisms.
#[derive(Clone, Debug)]
pub struct RobustProvider<N: Network = Ethereum> {
    pub(crate) primary_provider: RootProvider<N>,
    pub(crate) fallback_providers: Vec<RootProvider<N>>,
    pub(crate) call_timeout: Duration,
    pub(crate) max_retries: usize,
    pub(crate) min_delay: Duration,
}

impl<N: Network> RobustProvider<N> {
    #[must_use]
    pub fn primary(&self) -> &RootProvider<N> {
        &self.primary_provider
    }

    /// Fetch a block by [`BlockNumberOrTag`] with retry and timeout.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_by_number(
        &self,
        number: BlockNumberOrTag,
    ) -> Result<N::BlockResponse, Error> {
        trace!(block = %number, "eth_getBlockByNumber called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_block_by_number(number).await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getBlockByNumber failed");
        }

        result?.ok_or_else(|| Error::BlockNotFound(number.into()))
    }

    /// Fetch the latest block number with retry and timeout.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_block_number(&self) -> Result<u64, Error> {
        trace!("eth_blockNumber called");
        let result = self
            .try_operation_with_failover(move |provider| async move {
                provider.get_block_number().await
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_blockNumber failed");
        }
        result
    }

    /// Fetch logs for the given [`Filter`] with retry and timeout.
    ///
    /// Range-limit rejections are returned on the first attempt, without retrying.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, Error> {
        trace!("eth_getLogs called");
        let result = self
            .try_operation_with_failover(
                move |provider| async move { provider.get_logs(filter).await },
            )
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_getLogs failed");
        }
        result
    }

    /// Executes a read-only call against `block`.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn call(
        &self,
        tx: N::TransactionRequest,
        block: BlockNumberOrTag,
    ) -> Result<Bytes, Error> {
        trace!(block = %block, "eth_call called");
        let result = self
            .try_operation_with_failover(|provider| {
                let tx = tx.clone();
                async move { provider.call(tx).block(block.into()).await }
            })
            .await;
        if let Err(e) = &result {
            error!(error = %e, "eth_call failed");
        }
        result
    }

    /// Sends an arbitrary JSON-RPC request, for methods or response fields the typed API lacks.
    ///
    /// # Errors
    ///
    /// See [retry errors](#retry-errors).
    pub async fn raw_request<P, R>(&self, method: &'static str, params: P) -> Result<R, Error>
    where
        P: RpcSend + Clone,
        R: RpcRecv + Debug,
    {
        trace!(method = method, "raw request called");
        let result = self
            .try_operation_with_failover(|provider| {
                let params = params.clone();
                async move { provider.raw_request::<P, R>(Cow::Borrowed(method), params).await }
            })
            .await;
        if let Err(e) = &result {
            error!(method = method, error = %e, "raw request failed");
        }
        result
    }

    /// Execute `operation` with exponential backoff and a total timeout, then fall back.
    ///
    /// # Errors
    /// <a name="retry-errors"></a>
    ///
    /// * [`Error::Timeout`] if `call_timeout` elapsed on the last provider tried.
    /// * [`Error::RpcError`] with the last provider's error otherwise.
    pub(crate) async fn try_operation_with_failover<T: Debug, F, Fut>(
        &self,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let mut last_error = match self.try_provider_with_timeout(self.primary(), &operation).await
        {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if last_error.is_range_limit() {
            return Err(last_error);
        }

        let num_fallbacks = self.fallback_providers.len();
        if num_fallbacks > 0 {
            info!("Primary provider failed, trying fallback provider(s)");
        }

        for (fallback_idx, provider) in self.fallback_providers.iter().enumerate() {
            info!(provider_num = fallback_idx + 1, total = num_fallbacks, "Attempting fallback provider");

            match self.try_provider_with_timeout(provider, &operation).await {
                Ok(value) => {
                    info!(provider_num = fallback_idx + 1, "Fallback provider succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    error!(provider_num = fallback_idx + 1, err = %e, "Fallback provider failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn try_provider_with_timeout<T, F, Fut>(
        &self,
        provider: &RootProvider<N>,
        operation: F,
    ) -> Result<T, Error>
    where
        F: Fn(RootProvider<N>) -> Fut,
        Fut: Future<Output = Result<T, RpcError<TransportErrorKind>>>,
    {
        let retry_strategy = ExponentialBuilder::default()
            .with_max_times(self.max_retries)
            .with_min_delay(self.min_delay);

        timeout(
            self.call_timeout,
            (|| operation(provider.clone()))
                .retry(retry_strategy)
                .when(|err: &RpcError<TransportErrorKind>| !is_range_limit(err))
                .notify(|err: &RpcError<TransportErrorKind>, dur: Duration| {
                    debug!(error = %err, delay_ms = dur.as_millis(), "RPC error, retrying");
                })
                .sleep(tokio::time::sleep),
        )
        .await
        .map_err(Error::from)?
        .map_err(Error::from)
    }
}
