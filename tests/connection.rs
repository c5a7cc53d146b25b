//! Connection up/down notifications and the liveness prober.

mod helpers;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_transport::transport::{Address, BasicTlsDialer, DialFuture, TlsDialer, Verification};
use bridge_transport::{
    Auth, Config, ConnectionObserver, Error, Manager, Request, RequestContext, RetryPolicy,
};
use helpers::mock_server::{MockApiServer, MockResponse};

/// Dialer whose reachability is toggled by the test.
struct SwitchableDialer {
    offline: AtomicBool,
    dials: AtomicUsize,
    inner: BasicTlsDialer,
}

impl SwitchableDialer {
    fn new(offline: bool) -> Arc<Self> {
        Arc::new(Self {
            offline: AtomicBool::new(offline),
            dials: AtomicUsize::new(0),
            inner: BasicTlsDialer::new(Verification::Full),
        })
    }
}

impl TlsDialer for SwitchableDialer {
    fn dial<'a>(&'a self, address: &'a Address) -> DialFuture<'a> {
        Box::pin(async move {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::connection("network unreachable"));
            }
            self.inner.dial(address).await
        })
    }
}

#[derive(Default)]
struct CountingObserver {
    down: AtomicUsize,
    up: AtomicUsize,
}

impl ConnectionObserver for CountingObserver {
    fn on_down(&self) {
        self.down.fetch_add(1, Ordering::SeqCst);
    }

    fn on_up(&self) {
        self.up.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_down_then_up_fire_once_each() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let log = server.start(|_| MockResponse::ok());

    let dialer = SwitchableDialer::new(true);
    let config = Config::new("Other")
        .with_host_url(url)
        .without_reports()
        .with_retry(RetryPolicy::none())
        .with_ping_interval(Duration::from_millis(50));
    let manager = Manager::builder(config)
        .base_dialer(dialer.clone())
        .build()
        .unwrap();
    let observer = Arc::new(CountingObserver::default());
    manager.add_connection_observer(observer.clone());

    let ctx = RequestContext::new();
    assert!(matches!(manager.ping(&ctx).await, Err(Error::NoConnection)));
    assert!(matches!(manager.ping(&ctx).await, Err(Error::NoConnection)));
    assert!(manager.is_connection_down());
    assert_eq!(observer.down.load(Ordering::SeqCst), 1);
    assert_eq!(observer.up.load(Ordering::SeqCst), 0);

    dialer.offline.store(false, Ordering::SeqCst);

    // The prober notices on its own, without any caller traffic.
    let mut waited = Duration::ZERO;
    while manager.is_connection_down() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }
    assert!(!manager.is_connection_down());
    assert_eq!(observer.up.load(Ordering::SeqCst), 1);
    assert!(log.to_path("/tests/ping").len() >= 1);

    manager.ping(&ctx).await.unwrap();
    assert_eq!(observer.down.load(Ordering::SeqCst), 1);
    assert_eq!(observer.up.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_api_errors_do_not_mark_connection_down() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let _log = server.start(|_| MockResponse::status(500));

    let config = Config::new("Other")
        .with_host_url(url)
        .without_reports()
        .with_retry(RetryPolicy::none());
    let manager = Manager::new(config).unwrap();
    let observer = Arc::new(CountingObserver::default());
    manager.add_connection_observer(observer.clone());

    let result = manager.ping(&RequestContext::new()).await;
    assert!(matches!(result, Err(Error::ApiFailure { status: 500, .. })));
    assert!(!manager.is_connection_down());
    assert_eq!(observer.down.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_stops_prober() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let log = server.start(|_| MockResponse::ok());

    let dialer = SwitchableDialer::new(true);
    let config = Config::new("Other")
        .with_host_url(url)
        .without_reports()
        .with_retry(RetryPolicy::none())
        .with_ping_interval(Duration::from_millis(50));
    let manager = Manager::builder(config)
        .base_dialer(dialer.clone())
        .build()
        .unwrap();

    assert!(manager.ping(&RequestContext::new()).await.is_err());
    manager.shutdown();
    dialer.offline.store(false, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(manager.is_connection_down());
    assert_eq!(log.count(), 0);
}

#[tokio::test]
async fn test_malformed_request_is_not_an_outage() {
    helpers::init_tracing();

    let server = MockApiServer::new().await.unwrap();
    let url = server.url();
    let log = server.start(|_| MockResponse::ok());

    let dialer = SwitchableDialer::new(false);
    let config = Config::new("Other")
        .with_host_url(url)
        .without_reports()
        .with_retry(RetryPolicy::default().dial_retry_wait(Duration::from_millis(10)));
    let manager = Manager::builder(config)
        .base_dialer(dialer.clone())
        .build()
        .unwrap();
    let observer = Arc::new(CountingObserver::default());
    manager.add_connection_observer(observer.clone());

    let client = manager.new_client(Auth::new("user", "uid", "access", "refresh", 3600));
    let result = client
        .do_request(&RequestContext::new(), || {
            Request::get("/events/latest").header("X-Trace", "a\r\nInjected: 1")
        })
        .await;

    assert!(matches!(result, Err(Error::InvalidRequest(_))));
    assert_eq!(dialer.dials.load(Ordering::SeqCst), 0);
    assert_eq!(log.count(), 0);
    assert!(!manager.is_connection_down());
    assert_eq!(observer.down.load(Ordering::SeqCst), 0);
}
