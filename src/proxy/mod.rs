//! Alternative routing.
//!
//! When the API host cannot be dialed, a list of proxy hosts is fetched from
//! TXT records over DNS-over-HTTPS and the first reachable one is used.

pub mod dialer;
pub mod doh;
pub mod provider;

pub use dialer::ProxyDialer;
pub use doh::{DohLookup, HttpsDohLookup, LookupFuture};
pub use provider::{PingProbe, ProbeFuture, ProxyProvider, ReachabilityProbe};
