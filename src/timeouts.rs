//! Timeout configuration for API requests.
//!
//! # Timeout Types
//!
//! - **connect**: TCP + TLS handshake timeout
//! - **ttfb**: Time-to-first-byte (request sent → response headers received)
//! - **total**: Absolute deadline for one attempt (connect + request + response)
//!
//! Retry waits are not part of any of these; they are bounded by
//! [`RetryPolicy`](crate::retry::RetryPolicy).

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Timeout configuration for a single HTTP attempt.
///
/// All timeouts are optional. When `None`, no timeout is applied for that phase.
#[derive(Clone, Debug, Default)]
pub struct Timeouts {
    /// Timeout for establishing the connection (DNS + TCP + TLS handshake).
    ///
    /// Default: 10s for api_defaults()
    pub connect: Option<Duration>,

    /// Time from request sent until the full response head has been read.
    ///
    /// Default: 30s for api_defaults()
    pub ttfb: Option<Duration>,

    /// Absolute deadline for one attempt. Does NOT reset.
    ///
    /// Default: 60s for api_defaults()
    pub total: Option<Duration>,
}

impl Timeouts {
    /// Create a new Timeouts with all timeouts set to None.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensible defaults for API calls.
    ///
    /// - connect: 10s
    /// - ttfb: 30s
    /// - total: 60s
    pub fn api_defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            ttfb: Some(Duration::from_secs(30)),
            total: Some(Duration::from_secs(60)),
        }
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set TTFB (time-to-first-byte) timeout.
    pub fn ttfb(mut self, timeout: Duration) -> Self {
        self.ttfb = Some(timeout);
        self
    }

    /// Set total per-attempt deadline.
    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }
}

/// Run `fut` under an optional deadline, mapping expiry through `on_timeout`.
pub(crate) async fn with_deadline<T, F>(
    limit: Option<Duration>,
    fut: F,
    on_timeout: impl FnOnce(Duration) -> Error,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}
