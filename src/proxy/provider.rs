//! Discovery of a reachable API server: the canonical host or one of the
//! alternative routing proxies published over DoH.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::ProxySettings;
use crate::error::{Error, Result};
use crate::proxy::doh::DohLookup;
use crate::request::Request;
use crate::retry::RetryPolicy;
use crate::timeouts::Timeouts;
use crate::transport::client::PING_PATH;
use crate::transport::{HttpClient, TlsDialer};

/// Boxed future returned by [`ReachabilityProbe::can_reach`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Liveness check of a candidate server.
pub trait ReachabilityProbe: Send + Sync {
    fn can_reach<'a>(&'a self, url: &'a str) -> ProbeFuture<'a>;
}

/// `GET /tests/ping` on a fresh connection, without retries.
///
/// `dialer` should trust servers the way API traffic does, so a proxy is
/// only chosen when the real dial path would accept it. Mismatches seen here
/// are not reported.
pub struct PingProbe {
    timeout: Duration,
    dialer: Arc<dyn TlsDialer>,
}

impl PingProbe {
    pub fn new(timeout: Duration, dialer: Arc<dyn TlsDialer>) -> Self {
        Self { timeout, dialer }
    }

    async fn ping(&self, url: &str) -> Result<()> {
        let client = HttpClient::builder(url, self.dialer.clone())?
            .timeouts(Timeouts::api_defaults().total(self.timeout))
            .retry(RetryPolicy::none())
            .build();
        let response = client.send_once(&Request::get(PING_PATH)).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(response.into_api_error())
        }
    }
}

impl ReachabilityProbe for PingProbe {
    fn can_reach<'a>(&'a self, url: &'a str) -> ProbeFuture<'a> {
        Box::pin(async move {
            tracing::debug!(url, "Trying to ping server");
            match self.ping(url).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(url, error = %e, "Failed to ping server");
                    false
                }
            }
        })
    }
}

#[derive(Default)]
struct ProviderState {
    cache: Vec<String>,
    last_lookup: Option<Instant>,
}

/// Finds a reachable server and keeps the list of known proxies.
pub struct ProxyProvider {
    host_url: String,
    providers: Vec<String>,
    query: String,
    settings: ProxySettings,
    doh: Arc<dyn DohLookup>,
    probe: Arc<dyn ReachabilityProbe>,
    state: Mutex<ProviderState>,
}

impl ProxyProvider {
    pub fn new(
        host_url: impl Into<String>,
        providers: Vec<String>,
        query: impl Into<String>,
        settings: ProxySettings,
        doh: Arc<dyn DohLookup>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            host_url: host_url.into(),
            providers,
            query: query.into(),
            settings,
            doh,
            probe,
            state: Mutex::new(ProviderState::default()),
        }
    }

    pub fn host_url(&self) -> &str {
        &self.host_url
    }

    /// Proxies known from the last successful lookup.
    pub fn cached_proxies(&self) -> Vec<String> {
        self.state.lock().expect("proxy cache lock poisoned").cache.clone()
    }

    /// Return a reachable server URL, preferring the canonical host.
    pub async fn find_reachable_server(&self) -> Result<String> {
        {
            let mut state = self.state.lock().expect("proxy cache lock poisoned");
            if let Some(last) = state.last_lookup {
                if last.elapsed() < self.settings.lookup_wait {
                    return Err(Error::ProxyTooSoon);
                }
            }
            state.last_lookup = Some(Instant::now());
        }

        tracing::debug!("Trying to find a reachable server");
        match tokio::time::timeout(self.settings.search_timeout, self.search()).await {
            Ok(result) => result,
            Err(_) => Err(Error::ProxySearchTimeout),
        }
    }

    async fn search(&self) -> Result<String> {
        let (api_reachable, refreshed) =
            tokio::join!(self.probe.can_reach(&self.host_url), self.refresh_cache());

        if api_reachable {
            return Ok(self.host_url.clone());
        }
        if let Err(e) = refreshed {
            tracing::warn!(error = %e, "Proxy cache refresh failed, using cached proxies");
        }

        for proxy in self.cached_proxies() {
            if self.probe.can_reach(&proxy).await {
                return Ok(proxy);
            }
        }
        Err(Error::NoReachableServer)
    }

    /// Replace the cache with the answer of the first DoH provider that succeeds.
    async fn refresh_cache(&self) -> Result<()> {
        tracing::info!("Refreshing proxy cache");

        let lookup = async {
            for provider in &self.providers {
                match tokio::time::timeout(
                    self.settings.doh_timeout,
                    self.doh.lookup(&self.query, provider),
                )
                .await
                {
                    Ok(Ok(proxies)) => return Ok(proxies),
                    Ok(Err(e)) => tracing::debug!(provider = %provider, error = %e, "DoH lookup failed"),
                    Err(_) => tracing::debug!(provider = %provider, "DoH lookup timed out"),
                }
            }
            Err(Error::dns("no DoH provider answered"))
        };

        let proxies = tokio::time::timeout(self.settings.cache_refresh_timeout, lookup)
            .await
            .map_err(|_| Error::timeout("timed out while refreshing proxy cache"))??;

        self.state.lock().expect("proxy cache lock poisoned").cache = proxies;
        Ok(())
    }
}
