//! Dialer layer that enforces public-key pins on every new TLS connection.

use std::sync::Arc;

use boring::ssl::SslRef;

use crate::error::{Error, Result};
use crate::pinning::checker::PinChecker;
use crate::pinning::report::TlsReporter;
use crate::transport::{Address, DialFuture, TlsDialer};

/// Callback fired (on a detached task) whenever a pin mismatch is detected.
pub type TlsIssueNotifier = Arc<dyn Fn() + Send + Sync>;

/// Wraps another dialer and rejects TLS connections without a trusted pin.
pub struct PinningDialer {
    inner: Arc<dyn TlsDialer>,
    checker: PinChecker,
    reporter: Option<Arc<TlsReporter>>,
    notifier: Option<TlsIssueNotifier>,
}

impl PinningDialer {
    pub fn new(inner: Arc<dyn TlsDialer>, checker: PinChecker) -> Self {
        Self {
            inner,
            checker,
            reporter: None,
            notifier: None,
        }
    }

    /// Report mismatches through `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<TlsReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Notify `notifier` of every mismatch.
    pub fn with_notifier(mut self, notifier: TlsIssueNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl PinningDialer {
    fn verify(&self, address: &Address, ssl: &SslRef) -> Result<()> {
        match self.checker.check_connection(ssl) {
            Err(Error::TlsMismatch) => {
                tracing::warn!(address = %address, "Server certificate does not match any trusted pin");
                if let Some(notifier) = &self.notifier {
                    let notifier = Arc::clone(notifier);
                    tokio::spawn(async move { notifier() });
                }
                if let Some(reporter) = &self.reporter {
                    reporter.report_cert_issue(&address.host, address.port, ssl);
                }
                Err(Error::TlsMismatch)
            }
            other => other,
        }
    }
}

impl TlsDialer for PinningDialer {
    fn dial<'a>(&'a self, address: &'a Address) -> DialFuture<'a> {
        Box::pin(async move {
            let stream = self.inner.dial(address).await?;
            // Plain connections carry no certificate to pin.
            if let Some(ssl) = stream.ssl() {
                self.verify(address, ssl)?;
            }
            Ok(stream)
        })
    }
}
