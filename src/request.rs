//! API request description.
//!
//! A [`Request`] is relative to the configured API host: it carries a path,
//! never an absolute URL, so the same request can be sent directly or
//! through an alternative route.

use bytes::Bytes;
use http::Method;
use serde::Serialize;

use crate::error::Result;
use crate::headers;

/// An API request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl Request {
    /// Create a request with a custom method.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a header, replacing an existing one of the same name.
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        headers::set_header(&mut self.headers, name, value);
        self
    }

    /// Set a raw request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header(headers::CONTENT_TYPE, "application/json")
            .body(body))
    }
}
