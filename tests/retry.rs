//! Retry policy: rate limiting and dial failures.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bridge_transport::transport::{Address, BasicTlsDialer, DialFuture, TlsDialer, Verification};
use bridge_transport::{Auth, Config, Error, Manager, RequestContext, RetryPolicy};
use helpers::mock_server::{MockApiServer, MockResponse};
use serde_json::json;

/// Fails the first `failures` dials, then connects for real.
struct FailingDialer {
    failures: usize,
    dials: AtomicUsize,
    inner: BasicTlsDialer,
}

impl FailingDialer {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            dials: AtomicUsize::new(0),
            inner: BasicTlsDialer::new(Verification::Full),
        })
    }
}

impl TlsDialer for FailingDialer {
    fn dial<'a>(&'a self, address: &'a Address) -> DialFuture<'a> {
        Box::pin(async move {
            if self.dials.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(Error::connection("simulated dial failure"));
            }
            self.inner.dial(address).await
        })
    }
}

fn config(url: &str, retry: RetryPolicy) -> Config {
    Config::new("Other")
        .with_host_url(url)
        .without_reports()
        .with_retry(retry)
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let log = server.start(move |_| {
        if hits_clone.fetch_add(1, Ordering::SeqCst) == 0 {
            MockResponse::json(429, json!({ "Code": 2028, "Error": "Too many requests" }))
                .with_header("Retry-After", "1")
        } else {
            MockResponse::json(200, json!({ "Code": 1000 }))
        }
    });

    let max_wait = Duration::from_secs(5);
    let manager = Manager::new(config(&url, RetryPolicy::default().max_wait(max_wait))).unwrap();
    let client = manager.new_client(Auth::new("user", "uid", "access", "refresh", 3600));

    let started = Instant::now();
    client
        .get_json::<serde_json::Value>(&RequestContext::new(), "/events/latest")
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(log.count(), 2);
    assert!(elapsed >= Duration::from_secs(1), "waited only {:?}", elapsed);
    assert!(elapsed < max_wait, "waited {:?}", elapsed);
}

#[tokio::test]
async fn test_rate_limit_outliving_retries_is_api_failure() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let log = server.start(|_| MockResponse::status(429).with_header("Retry-After", "0"));

    let manager = Manager::new(config(&url, RetryPolicy::default().max_retries(2))).unwrap();
    let client = manager.new_client(Auth::new("user", "uid", "access", "refresh", 3600));
    let result = client
        .get_json::<serde_json::Value>(&RequestContext::new(), "/events/latest")
        .await;

    assert!(matches!(result, Err(Error::ApiFailure { status: 429, .. })));
    assert_eq!(log.count(), 3);
}

#[tokio::test]
async fn test_dial_failures_retried_within_budget() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let log = server.start(|_| MockResponse::ok());

    let retry = RetryPolicy::default()
        .max_retries(5)
        .dial_retry_wait(Duration::from_millis(10));
    let dialer = FailingDialer::new(4);
    let manager = Manager::builder(config(&url, retry))
        .base_dialer(dialer.clone())
        .build()
        .unwrap();

    manager.ping(&RequestContext::new()).await.unwrap();
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 5);
    assert_eq!(log.count(), 1);
}

#[tokio::test]
async fn test_dial_failures_exhaust_retries() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let log = server.start(|_| MockResponse::ok());

    let retry = RetryPolicy::default()
        .max_retries(3)
        .dial_retry_wait(Duration::from_millis(10));
    let dialer = FailingDialer::new(4);
    let manager = Manager::builder(config(&url, retry))
        .base_dialer(dialer.clone())
        .build()
        .unwrap();

    let result = manager.ping(&RequestContext::new()).await;
    assert!(matches!(result, Err(Error::NoConnection)));
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 4);
    assert_eq!(log.count(), 0);
}
