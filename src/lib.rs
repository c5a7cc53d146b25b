//! # bridge-transport
//!
//! Resilient HTTP transport for a mail API bridge.
//!
//! Provides certificate pinning with mismatch reporting, DNS-over-HTTPS
//! alternative routing, authenticated sessions with transparent token
//! refresh, and retry/backoff wired to connection up/down notification.

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod headers;
pub mod manager;
pub mod observer;
pub mod request;
pub mod response;
pub mod retry;
pub mod timeouts;

// Certificate pinning and mismatch reports
pub mod pinning;

// Alternative routing over DoH
pub mod proxy;

// Dialers and HTTP/1.1
pub mod transport;

// Re-exports
pub use auth::{Auth, AuthHandler, AuthSession, DeauthHandler, SessionStatus};
pub use client::Client;
pub use config::{Config, ProxySettings};
pub use context::RequestContext;
pub use error::{Error, Result};
pub use manager::{Manager, ManagerBuilder};
pub use observer::{ConnectionMonitor, ConnectionObserver};
pub use request::Request;
pub use response::Response;
pub use retry::RetryPolicy;
pub use timeouts::Timeouts;
