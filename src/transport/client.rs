//! HTTP client bound to one base URL and one dial chain.
//!
//! Each attempt dials a fresh connection through the configured
//! [`TlsDialer`], sends one HTTP/1.1 request and reads the response. The
//! [`RetryPolicy`] loop sits on top of single attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::cancellable;
use crate::error::{Error, Result};
use crate::headers;
use crate::observer::ConnectionMonitor;
use crate::request::Request;
use crate::response::Response;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::timeouts::{with_deadline, Timeouts};
use crate::transport::dialer::{parse_lenient, Address, TlsDialer};
use crate::transport::h1::{validate_request, H1Connection};

/// Path of the lightweight liveness endpoint.
pub const PING_PATH: &str = "/tests/ping";

/// Cheaply cloneable HTTP client.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    dialer: Arc<dyn TlsDialer>,
    address: Address,
    base_path: String,
    default_headers: Vec<(String, String)>,
    timeouts: Timeouts,
    retry: RetryPolicy,
    monitoring: Option<Monitoring>,
}

struct Monitoring {
    monitor: Arc<ConnectionMonitor>,
    ping_interval: Duration,
    shutdown: CancellationToken,
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    dialer: Arc<dyn TlsDialer>,
    address: Address,
    base_path: String,
    default_headers: Vec<(String, String)>,
    timeouts: Timeouts,
    retry: RetryPolicy,
    monitoring: Option<Monitoring>,
}

impl HttpClient {
    /// Start building a client for `base_url`, dialing through `dialer`.
    pub fn builder(base_url: &str, dialer: Arc<dyn TlsDialer>) -> Result<HttpClientBuilder> {
        let url = parse_lenient(base_url)?;
        let address = Address::from_url(url.as_str())?;
        let mut base_path = url.path().trim_end_matches('/').to_string();
        if let Some(query) = url.query() {
            base_path.push('?');
            base_path.push_str(query);
        }
        Ok(HttpClientBuilder {
            dialer,
            address,
            base_path,
            default_headers: Vec::new(),
            timeouts: Timeouts::api_defaults(),
            retry: RetryPolicy::default(),
            monitoring: None,
        })
    }

    /// Address every request of this client is dialed to.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Send `request` under the retry policy.
    ///
    /// Failures without any response that outlive the retries surface as
    /// [`Error::NoConnection`]; a `429` that outlives them is returned as a
    /// response.
    pub async fn send(&self, request: &Request, cancel: &CancellationToken) -> Result<Response> {
        let retry = &self.inner.retry;
        let mut attempt = 0;
        let mut rate_limit_waited = Duration::ZERO;

        let outcome = loop {
            let outcome = cancellable(cancel, self.send_once(request)).await;
            match retry.decide(&outcome, attempt, rate_limit_waited) {
                RetryDecision::Stop => break outcome,
                RetryDecision::Retry(wait) => {
                    match &outcome {
                        Ok(response) => {
                            rate_limit_waited += wait;
                            tracing::debug!(
                                status = response.status,
                                ?wait,
                                attempt,
                                "Rate limited, retrying"
                            );
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, ?wait, attempt, "Request failed, retrying");
                        }
                    }
                    cancellable(cancel, async {
                        tokio::time::sleep(wait).await;
                        Ok(())
                    })
                    .await?;
                    attempt += 1;
                }
            }
        };

        match outcome {
            Ok(response) => {
                self.connection_up();
                Ok(response)
            }
            Err(e) if e.is_no_response() => {
                tracing::warn!(error = %e, attempts = attempt + 1, "No response from {}", self.inner.address);
                self.connection_down();
                if e.is_retryable() {
                    Err(Error::NoConnection)
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// One attempt: dial, send, read. No retries, no connection tracking.
    pub async fn send_once(&self, request: &Request) -> Result<Response> {
        let inner = &self.inner;
        let target = join_path(&inner.base_path, &request.path);
        let mut request_headers = inner.default_headers.clone();
        for (name, value) in &request.headers {
            headers::set_header(&mut request_headers, name, value.clone());
        }

        validate_request(&target, &request_headers)?;
        tracing::trace!(method = %request.method, target = %target, "Sending request");

        let exchange = async {
            let stream = with_deadline(
                inner.timeouts.connect,
                inner.dialer.dial(&inner.address),
                Error::ConnectTimeout,
            )
            .await?;
            with_deadline(
                inner.timeouts.ttfb,
                H1Connection::new(stream).send_request(
                    &request.method,
                    &target,
                    &inner.address.host_header(),
                    &request_headers,
                    request.body.as_ref(),
                ),
                |d| Error::timeout(format!("no response within {:?}", d)),
            )
            .await
        };

        let response = with_deadline(inner.timeouts.total, exchange, |d| {
            Error::timeout(format!("request exceeded {:?}", d))
        })
        .await?;
        tracing::trace!(
            status = response.status,
            version = response.http_version(),
            "Received response"
        );
        Ok(response)
    }

    /// `GET /tests/ping`, any 2xx is success.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        let response = self.send(&Request::get(PING_PATH), cancel).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_api_error())
        }
    }

    fn connection_up(&self) {
        if let Some(monitoring) = &self.inner.monitoring {
            monitoring.monitor.report_response();
        }
    }

    fn connection_down(&self) {
        if let Some(monitoring) = &self.inner.monitoring {
            if monitoring.monitor.report_failure() {
                self.spawn_prober();
            }
        }
    }

    fn spawn_prober(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            client.probe_until_up().await;
        });
    }

    async fn probe_until_up(&self) {
        let Some(monitoring) = &self.inner.monitoring else {
            return;
        };
        let ping = Request::get(PING_PATH);
        loop {
            tokio::select! {
                _ = monitoring.shutdown.cancelled() => {
                    monitoring.monitor.prober_stopped();
                    return;
                }
                _ = tokio::time::sleep(monitoring.ping_interval) => {}
            }
            if !monitoring.monitor.continue_probing() {
                return;
            }
            match self.send_once(&ping).await {
                Ok(_) => monitoring.monitor.report_response(),
                Err(e) => tracing::debug!(error = %e, "Liveness ping failed"),
            }
        }
    }
}

impl HttpClientBuilder {
    /// Identify the application on every request unless the request
    /// overrides the headers.
    pub fn app_headers(mut self, app_version: &str, user_agent: &str) -> Self {
        for (name, value) in headers::base_headers(app_version, user_agent) {
            headers::set_header(&mut self.default_headers, &name, value);
        }
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Report up/down transitions to `monitor` and probe the API while down.
    pub fn monitor(
        mut self,
        monitor: Arc<ConnectionMonitor>,
        ping_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        self.monitoring = Some(Monitoring {
            monitor,
            ping_interval,
            shutdown,
        });
        self
    }

    pub fn build(self) -> HttpClient {
        HttpClient {
            inner: Arc::new(ClientInner {
                dialer: self.dialer,
                address: self.address,
                base_path: self.base_path,
                default_headers: self.default_headers,
                timeouts: self.timeouts,
                retry: self.retry,
                monitoring: self.monitoring,
            }),
        }
    }
}

/// Join the client's base path and a request path into an origin-form target.
fn join_path(base: &str, path: &str) -> String {
    let target = if path.is_empty() {
        base.to_string()
    } else if path.starts_with('?') || path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };
    if target.starts_with('/') {
        target
    } else {
        format!("/{}", target)
    }
}
