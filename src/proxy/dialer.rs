//! Dialer layer that falls back to an alternative route for the API host.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::proxy::provider::ProxyProvider;
use crate::transport::dialer::parse_lenient;
use crate::transport::{Address, DialFuture, MaybeHttpsStream, TlsDialer};

#[derive(Debug)]
struct RouteState {
    /// Address dialed in place of the direct API address.
    current: Address,
    allow_proxy: bool,
}

/// Wraps the pinning dialer; when a dial to the API host fails and proxying
/// is allowed, switches to a reachable alternative host.
pub struct ProxyDialer {
    inner: Arc<dyn TlsDialer>,
    provider: Arc<ProxyProvider>,
    direct: Address,
    route: Arc<RwLock<RouteState>>,
    switching: Mutex<()>,
    use_duration: Duration,
    shutdown: CancellationToken,
}

impl ProxyDialer {
    pub fn new(
        inner: Arc<dyn TlsDialer>,
        provider: Arc<ProxyProvider>,
        use_duration: Duration,
        allow_proxy: bool,
    ) -> Result<Self> {
        let direct = Address::from_url(provider.host_url())?;
        Ok(Self {
            inner,
            provider,
            route: Arc::new(RwLock::new(RouteState {
                current: direct.clone(),
                allow_proxy,
            })),
            direct,
            switching: Mutex::new(()),
            use_duration,
            shutdown: CancellationToken::new(),
        })
    }

    /// Tie the revert timer to `shutdown` as well as to this dialer's lifetime.
    pub fn with_shutdown(mut self, shutdown: &CancellationToken) -> Self {
        self.shutdown = shutdown.child_token();
        self
    }

    pub fn allow_proxy(&self) {
        self.route.write().expect("route lock poisoned").allow_proxy = true;
    }

    /// Disable fallback and go back to the direct route.
    pub fn disallow_proxy(&self) {
        let mut route = self.route.write().expect("route lock poisoned");
        route.allow_proxy = false;
        route.current = self.direct.clone();
    }

    pub fn is_proxy_allowed(&self) -> bool {
        self.route.read().expect("route lock poisoned").allow_proxy
    }

    /// Whether API traffic currently goes through a proxy.
    pub fn is_proxy_enabled(&self) -> bool {
        self.current_route() != self.direct
    }

    /// Address dialed for the API host right now.
    pub fn current_route(&self) -> Address {
        self.route.read().expect("route lock poisoned").current.clone()
    }

    async fn dial_with_fallback(&self, address: &Address) -> Result<MaybeHttpsStream> {
        let is_api = *address == self.direct;
        let target = if is_api {
            self.current_route()
        } else {
            address.clone()
        };

        let err = match self.inner.dial(&target).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };
        if !is_api || !self.is_proxy_allowed() || matches!(err, Error::Cancelled) {
            return Err(err);
        }

        tracing::debug!(error = %err, address = %target, "Dial failed, trying proxy");
        let proxy = match self.switch_to_reachable_server(&target).await {
            Ok(proxy) => proxy,
            Err(Error::NoConnection) => return Err(Error::NoConnection),
            Err(e) => {
                tracing::debug!(error = %e, "No proxy available");
                return Err(err);
            }
        };
        self.inner.dial(&proxy).await
    }

    async fn switch_to_reachable_server(&self, failed: &Address) -> Result<Address> {
        let _switching = self.switching.lock().await;

        // Another dial switched routes while this one waited.
        let current = self.current_route();
        if current != *failed {
            return Ok(current);
        }

        tracing::info!("Attempting to switch to a proxy");
        let url = self.provider.find_reachable_server().await?;
        let mut proxy = Address::from_url(&url)?;
        if parse_lenient(&url)?.port().is_none() {
            proxy.port = self.direct.port;
        }

        if proxy == self.direct {
            tracing::info!("The API is reachable again; connection drop was only intermittent");
            self.route.write().expect("route lock poisoned").current = proxy;
            return Err(Error::NoConnection);
        }

        tracing::info!(proxy = %proxy, "Switching to a proxy");
        let first_switch = {
            let mut route = self.route.write().expect("route lock poisoned");
            let first = route.current == self.direct;
            route.current = proxy.clone();
            first
        };
        if first_switch {
            self.schedule_revert();
        }
        Ok(proxy)
    }

    /// Go back to the direct route once the proxy has been used long enough.
    fn schedule_revert(&self) {
        let route = Arc::clone(&self.route);
        let direct = self.direct.clone();
        let shutdown = self.shutdown.clone();
        let after = self.use_duration;
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    tracing::info!("Proxy use period over, reverting to the direct route");
                    route.write().expect("route lock poisoned").current = direct;
                }
            }
        });
    }
}

impl TlsDialer for ProxyDialer {
    fn dial<'a>(&'a self, address: &'a Address) -> DialFuture<'a> {
        Box::pin(self.dial_with_fallback(address))
    }
}

impl Drop for ProxyDialer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
