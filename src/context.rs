//! Per-call request context: cancellation and the retry-on-401 opt-out.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Options scoped to one API call.
#[derive(Clone, Debug)]
pub struct RequestContext {
    cancel: CancellationToken,
    retry_unauthorized: bool,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            cancel: CancellationToken::new(),
            retry_unauthorized: true,
        }
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the call to an existing cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Do not refresh and retry when the call is answered with 401.
    pub fn without_unauthorized_retry(mut self) -> Self {
        self.retry_unauthorized = false;
        self
    }

    pub fn retry_unauthorized(&self) -> bool {
        self.retry_unauthorized
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` unless the context is cancelled first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        cancellable(&self.cancel, fut).await
    }
}

pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
