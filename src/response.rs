//! HTTP response returned by the transport.

use bytes::Bytes;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::headers;

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<String>,
    body: Bytes,
    http_version: String,
}

/// Error payload the API attaches to non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "Code")]
    code: Option<i64>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<String>, body: Bytes, http_version: String) -> Self {
        Self { status, headers, body, http_version }
    }

    pub fn http_version(&self) -> &str { &self.http_version }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn into_body(self) -> Bytes { self.body }
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        for header in &self.headers {
            if let Some((key, value)) = header.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    return Some(value.trim());
                }
            }
        }
        None
    }

    pub fn content_type(&self) -> Option<&str> { self.get_header(headers::CONTENT_TYPE) }

    /// Numeric `Retry-After` value in seconds, if present and well-formed.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.get_header(headers::RETRY_AFTER)?.trim().parse().ok()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }

    /// Convert a non-2xx response into [`Error::ApiFailure`].
    ///
    /// The API's `{Code, Error}` body is used when it parses; otherwise the
    /// raw body (or the status line) becomes the message.
    pub fn into_api_error(self) -> Error {
        match serde_json::from_slice::<ApiErrorBody>(&self.body) {
            Ok(ApiErrorBody { code, error }) => Error::api_failure(
                self.status,
                code,
                error.unwrap_or_else(|| format!("HTTP {}", self.status)),
            ),
            Err(_) => {
                let text = String::from_utf8_lossy(&self.body).trim().to_string();
                let message = if text.is_empty() { format!("HTTP {}", self.status) } else { text };
                Error::api_failure(self.status, None, message)
            }
        }
    }
}
