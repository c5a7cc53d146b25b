//! Error types for the bridge transport.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport, session and proxy layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No trusted pin matched the peer certificate chain.
    #[error("TLS certificate pin mismatch")]
    TlsMismatch,

    /// Retries exhausted without obtaining any response.
    #[error("no internet connection")]
    NoConnection,

    /// Well-formed API error response.
    #[error("API error {status}: {message}")]
    ApiFailure {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// 401 that survived a refresh, or the refresh itself was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Proxy lookup attempted inside the cool-down window.
    #[error("proxy lookup attempted too soon")]
    ProxyTooSoon,

    /// Overall proxy search deadline exceeded.
    #[error("timed out finding a proxy")]
    ProxySearchTimeout,

    /// Neither the API host nor any known proxy answered.
    #[error("no reachable server")]
    NoReachableServer,

    /// DNS-over-HTTPS lookup failure.
    #[error("DNS error: {0}")]
    Dns(String),

    /// HTTP protocol error.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// The request cannot be encoded; nothing was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Generic timeout error.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Connect timeout (TCP + TLS handshake).
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create an API failure error.
    pub fn api_failure(status: u16, code: Option<i64>, message: impl Into<String>) -> Self {
        Self::ApiFailure {
            status,
            code,
            message: message.into(),
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Create a DNS error.
    pub fn dns(message: impl Into<String>) -> Self {
        Self::Dns(message.into())
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// True when the request failed before any HTTP response was received.
    ///
    /// Pin mismatches count: the connection was torn down before a response.
    pub fn is_no_response(&self) -> bool {
        matches!(
            self,
            Self::NoConnection
                | Self::TlsMismatch
                | Self::HttpProtocol(_)
                | Self::Io(_)
                | Self::Timeout(_)
                | Self::ConnectTimeout(_)
                | Self::Connection(_)
                | Self::Tls(_)
        )
    }

    /// True for failures the retry loop may attempt again.
    pub fn is_retryable(&self) -> bool {
        self.is_no_response() && !matches!(self, Self::TlsMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_response_classification() {
        assert!(Error::connection("refused").is_no_response());
        assert!(Error::ConnectTimeout(Duration::from_secs(1)).is_no_response());
        assert!(Error::TlsMismatch.is_no_response());
        assert!(!Error::api_failure(422, Some(2001), "invalid").is_no_response());
        assert!(!Error::unauthorized("revoked").is_no_response());
        assert!(!Error::Cancelled.is_no_response());
        assert!(!Error::invalid_request("bad header").is_no_response());
    }

    #[test]
    fn test_pin_mismatch_is_not_retried() {
        assert!(!Error::TlsMismatch.is_retryable());
        assert!(Error::tls("handshake failed").is_retryable());
    }

    #[test]
    fn test_proxy_timeout_message() {
        assert_eq!(
            Error::ProxySearchTimeout.to_string(),
            "timed out finding a proxy"
        );
    }
}
