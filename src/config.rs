//! Immutable configuration for a [`Manager`](crate::manager::Manager).
//!
//! Everything the transport needs is passed in explicitly. State that changes
//! at runtime (proxy toggle, proxy cache, sent reports) lives in the
//! component that owns it.

use std::time::Duration;

use crate::pinning::{TrustedPinSet, DEFAULT_REPORT_URI};
use crate::proxy::doh::{DEFAULT_DOH_PROVIDERS, DEFAULT_PROXY_QUERY};
use crate::retry::RetryPolicy;
use crate::timeouts::Timeouts;

/// Canonical API host.
pub const DEFAULT_HOST_URL: &str = "https://mail-api.proton.me";

/// Redirect URI sent with token refresh requests.
pub const DEFAULT_REDIRECT_URI: &str = "https://protonmail.ch";

/// Timing of alternative-routing discovery.
#[derive(Clone, Debug)]
pub struct ProxySettings {
    /// Minimum spacing between two lookups.
    pub lookup_wait: Duration,
    /// Deadline of one DoH lookup.
    pub doh_timeout: Duration,
    /// Deadline of a whole cache refresh across providers.
    pub cache_refresh_timeout: Duration,
    /// Deadline of one reachability probe.
    pub can_reach_timeout: Duration,
    /// Deadline of one complete search for a reachable server.
    pub search_timeout: Duration,
    /// How long a selected proxy is used before reverting to the direct route.
    pub use_duration: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            lookup_wait: Duration::from_secs(5),
            doh_timeout: Duration::from_secs(20),
            cache_refresh_timeout: Duration::from_secs(20),
            can_reach_timeout: Duration::from_secs(20),
            search_timeout: Duration::from_secs(40),
            use_duration: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Transport configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub host_url: String,
    pub app_version: String,
    pub user_agent: String,
    pub redirect_uri: String,
    pub trusted_pins: TrustedPinSet,
    /// Where pin mismatch reports go; `None` disables reporting.
    pub report_uri: Option<String>,
    pub doh_providers: Vec<String>,
    pub proxy_query: String,
    /// Whether proxy fallback starts enabled.
    pub allow_proxy: bool,
    pub proxy: ProxySettings,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    /// Interval of liveness pings while the connection is down.
    pub ping_interval: Duration,
    /// Extra trust anchors (DER or PEM) for every TLS connection.
    pub root_certificates: Vec<Vec<u8>>,
}

impl Config {
    pub fn new(app_version: impl Into<String>) -> Self {
        let app_version = app_version.into();
        Self {
            host_url: DEFAULT_HOST_URL.to_string(),
            user_agent: format!("bridge-transport/{}", env!("CARGO_PKG_VERSION")),
            app_version,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            trusted_pins: TrustedPinSet::default(),
            report_uri: Some(DEFAULT_REPORT_URI.to_string()),
            doh_providers: DEFAULT_DOH_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            proxy_query: DEFAULT_PROXY_QUERY.to_string(),
            allow_proxy: false,
            proxy: ProxySettings::default(),
            retry: RetryPolicy::default(),
            timeouts: Timeouts::api_defaults(),
            ping_interval: Duration::from_secs(30),
            root_certificates: Vec::new(),
        }
    }

    pub fn with_host_url(mut self, url: impl Into<String>) -> Self {
        self.host_url = url.into();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    pub fn with_trusted_pins(mut self, pins: TrustedPinSet) -> Self {
        self.trusted_pins = pins;
        self
    }

    pub fn with_report_uri(mut self, uri: impl Into<String>) -> Self {
        self.report_uri = Some(uri.into());
        self
    }

    pub fn without_reports(mut self) -> Self {
        self.report_uri = None;
        self
    }

    pub fn with_doh_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.doh_providers = providers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_proxy_query(mut self, query: impl Into<String>) -> Self {
        self.proxy_query = query.into();
        self
    }

    pub fn with_allow_proxy(mut self, allow: bool) -> Self {
        self.allow_proxy = allow;
        self
    }

    pub fn with_proxy_settings(mut self, settings: ProxySettings) -> Self {
        self.proxy = settings;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Add a trust anchor (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certificates.push(cert.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("Other");
        assert_eq!(config.host_url, DEFAULT_HOST_URL);
        assert_eq!(config.doh_providers.len(), 3);
        assert_eq!(config.doh_providers[0], "https://dns11.quad9.net/dns-query");
        assert_eq!(config.proxy.lookup_wait, Duration::from_secs(5));
        assert_eq!(config.proxy.use_duration, Duration::from_secs(86400));
        assert!(config.report_uri.is_some());
        assert!(!config.allow_proxy);
    }

    #[test]
    fn test_search_timeout_below_provider_sum() {
        let settings = ProxySettings::default();
        let providers = DEFAULT_DOH_PROVIDERS.len() as u32;
        assert!(settings.search_timeout < settings.doh_timeout * providers);
    }
}
