//! Assembly of the transport stack and the factory of per-user clients.
//!
//! ```text
//! Client ──► HttpClient ──► ProxyDialer ──► PinningDialer ──► BasicTlsDialer
//!   │              │                             │
//! AuthSession  ConnectionMonitor             TlsReporter
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{Auth, AuthSession};
use crate::client::Client;
use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Result;
use crate::observer::{ConnectionMonitor, ConnectionObserver};
use crate::pinning::{PinChecker, PinningDialer, TlsIssueNotifier, TlsReporter};
use crate::proxy::{DohLookup, HttpsDohLookup, PingProbe, ProxyDialer, ProxyProvider, ReachabilityProbe};
use crate::transport::{Address, BasicTlsDialer, HttpClient, TlsDialer, Verification};

/// Builder for [`Manager`]. Every component can be replaced, which is how
/// tests run the stack against local servers.
pub struct ManagerBuilder {
    config: Config,
    base_dialer: Option<Arc<dyn TlsDialer>>,
    doh: Option<Arc<dyn DohLookup>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    notifier: Option<TlsIssueNotifier>,
}

impl ManagerBuilder {
    /// Dialer at the bottom of the chain, below pinning.
    pub fn base_dialer(mut self, dialer: Arc<dyn TlsDialer>) -> Self {
        self.base_dialer = Some(dialer);
        self
    }

    pub fn doh_lookup(mut self, doh: Arc<dyn DohLookup>) -> Self {
        self.doh = Some(doh);
        self
    }

    pub fn reachability_probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Callback fired whenever a connection fails pin validation.
    pub fn tls_issue_notifier(mut self, notifier: TlsIssueNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Manager> {
        let config = self.config;
        let shutdown = CancellationToken::new();
        let monitor = Arc::new(ConnectionMonitor::new());

        let base: Arc<dyn TlsDialer> = match self.base_dialer {
            Some(dialer) => dialer,
            None => {
                let canonical = Address::from_url(&config.host_url)?.host;
                Arc::new(
                    BasicTlsDialer::new(Verification::CanonicalHostOnly(canonical))
                        .with_root_certificates(&config.root_certificates),
                )
            }
        };

        let mut pinning = PinningDialer::new(
            Arc::clone(&base),
            PinChecker::new(config.trusted_pins.clone()),
        );
        if let Some(report_uri) = &config.report_uri {
            pinning = pinning.with_reporter(Arc::new(TlsReporter::new(
                report_uri,
                &config.app_version,
                &config.user_agent,
                config.trusted_pins.clone(),
                &config.root_certificates,
            )?));
        }
        if let Some(notifier) = self.notifier {
            pinning = pinning.with_notifier(notifier);
        }

        let doh: Arc<dyn DohLookup> = match self.doh {
            Some(doh) => doh,
            None => Arc::new(
                HttpsDohLookup::new(config.proxy.doh_timeout)
                    .with_root_certificates(&config.root_certificates),
            ),
        };
        let probe: Arc<dyn ReachabilityProbe> = match self.probe {
            Some(probe) => probe,
            None => {
                let pinned = PinningDialer::new(base, PinChecker::new(config.trusted_pins.clone()));
                Arc::new(PingProbe::new(config.proxy.can_reach_timeout, Arc::new(pinned)))
            }
        };
        let provider = ProxyProvider::new(
            config.host_url.clone(),
            config.doh_providers.clone(),
            config.proxy_query.clone(),
            config.proxy.clone(),
            doh,
            probe,
        );

        let proxy_dialer = Arc::new(
            ProxyDialer::new(
                Arc::new(pinning),
                Arc::new(provider),
                config.proxy.use_duration,
                config.allow_proxy,
            )?
            .with_shutdown(&shutdown),
        );

        let http = HttpClient::builder(&config.host_url, proxy_dialer.clone())?
            .app_headers(&config.app_version, &config.user_agent)
            .timeouts(config.timeouts.clone())
            .retry(config.retry.clone())
            .monitor(Arc::clone(&monitor), config.ping_interval, shutdown.clone())
            .build();

        tracing::debug!(host = %config.host_url, allow_proxy = config.allow_proxy, "Transport ready");
        Ok(Manager {
            config,
            http,
            proxy_dialer,
            monitor,
            shutdown,
        })
    }
}

/// Owns the shared transport and hands out per-user [`Client`]s.
pub struct Manager {
    config: Config,
    http: HttpClient,
    proxy_dialer: Arc<ProxyDialer>,
    monitor: Arc<ConnectionMonitor>,
    shutdown: CancellationToken,
}

impl Manager {
    pub fn builder(config: Config) -> ManagerBuilder {
        ManagerBuilder {
            config,
            base_dialer: None,
            doh: None,
            probe: None,
            notifier: None,
        }
    }

    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Client for a session whose tokens are already known.
    pub fn new_client(&self, auth: Auth) -> Client {
        let session = AuthSession::new(self.http.clone(), self.config.redirect_uri.clone(), auth);
        Client::new(self.http.clone(), Arc::new(session))
    }

    /// Client for a persisted `uid` and refresh token; the first call refreshes.
    pub fn new_client_with_refresh(
        &self,
        uid: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Client {
        let session = AuthSession::from_refresh_token(
            self.http.clone(),
            self.config.redirect_uri.clone(),
            uid,
            refresh_token,
        );
        Client::new(self.http.clone(), Arc::new(session))
    }

    pub fn add_connection_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.monitor.add_observer(observer);
    }

    pub fn is_connection_down(&self) -> bool {
        self.monitor.is_down()
    }

    pub fn allow_proxy(&self) {
        tracing::info!("Allowing proxy fallback");
        self.proxy_dialer.allow_proxy();
    }

    pub fn disallow_proxy(&self) {
        tracing::info!("Disallowing proxy fallback");
        self.proxy_dialer.disallow_proxy();
    }

    /// Whether API traffic currently goes through a proxy.
    pub fn is_proxy_enabled(&self) -> bool {
        self.proxy_dialer.is_proxy_enabled()
    }

    /// Unauthenticated liveness check of the API.
    pub async fn ping(&self, ctx: &RequestContext) -> Result<()> {
        self.http.ping(ctx.cancellation()).await
    }

    /// Stop background work: liveness probing and the proxy revert timer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
