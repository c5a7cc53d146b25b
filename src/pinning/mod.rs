//! Certificate public-key pinning.
//!
//! - `checker`: SPKI pin computation and matching
//! - `report`: deduplicated mismatch reports
//! - `dialer`: dial-chain layer running both on every TLS connection

pub mod checker;
pub mod dialer;
pub mod report;

pub use checker::{certificate_pin, PinChecker, TrustedPinSet, DEFAULT_TRUSTED_PINS};
pub use dialer::{PinningDialer, TlsIssueNotifier};
pub use report::{TlsReport, TlsReporter, DEFAULT_REPORT_URI};
