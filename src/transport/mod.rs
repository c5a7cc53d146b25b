//! HTTP transport.
//!
//! - `dialer`: dial chain abstraction and the BoringSSL base dialer
//! - `h1`: HTTP/1.1 exchange over a dialed stream
//! - `client`: retrying HTTP client bound to a base URL

pub mod client;
pub mod dialer;
pub mod h1;

pub use client::{HttpClient, HttpClientBuilder};
pub use dialer::{Address, BasicTlsDialer, DialFuture, MaybeHttpsStream, TlsDialer, Verification};
