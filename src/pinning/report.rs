//! TLS pin-mismatch reports (RFC 7469 §3 style).
//!
//! Reports are deduplicated over a 24 hour window and delivered on detached
//! tasks; delivery failures are logged and never reach the caller.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use boring::ssl::{NameType, SslRef};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::pinning::checker::TrustedPinSet;
use crate::request::Request;
use crate::retry::RetryPolicy;
use crate::timeouts::Timeouts;
use crate::transport::{BasicTlsDialer, HttpClient, Verification};

/// Default endpoint for TLS mismatch reports.
pub const DEFAULT_REPORT_URI: &str = "https://reports.protonmail.ch/reports/tls";

/// Window in which an identical report is sent at most once.
pub const REPORT_DEDUP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

const PIN_VALIDITY_DAYS: i64 = 365;

/// Body of a TLS mismatch report.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsReport {
    /// Observation time, RFC 3339.
    pub date_time: String,
    pub hostname: String,
    pub port: String,
    /// Expiration of the noted pins, RFC 3339.
    pub effective_expiration_date: String,
    pub include_subdomains: bool,
    /// Server name the client asked for during the handshake.
    pub noted_hostname: String,
    /// PEM certificates as served by the peer.
    pub served_certificate_chain: Vec<String>,
    /// PEM certificates of the chain the client validated.
    pub validated_certificate_chain: Vec<String>,
    pub known_pins: Vec<String>,
    pub app_version: String,
}

impl TlsReport {
    /// Equality over every field except the timestamps.
    pub fn same_issue(&self, other: &TlsReport) -> bool {
        self.hostname == other.hostname
            && self.port == other.port
            && self.include_subdomains == other.include_subdomains
            && self.noted_hostname == other.noted_hostname
            && self.served_certificate_chain == other.served_certificate_chain
            && self.validated_certificate_chain == other.validated_certificate_chain
            && self.known_pins == other.known_pins
            && self.app_version == other.app_version
    }
}

struct SentReport {
    report: TlsReport,
    sent_at: Instant,
}

/// Builds, deduplicates and sends TLS mismatch reports.
pub struct TlsReporter {
    client: HttpClient,
    known_pins: TrustedPinSet,
    app_version: String,
    sent: Mutex<Vec<SentReport>>,
}

impl TlsReporter {
    /// Reporter posting to `report_uri` over an unpinned connection.
    pub fn new(
        report_uri: &str,
        app_version: &str,
        user_agent: &str,
        known_pins: TrustedPinSet,
        root_certificates: &[Vec<u8>],
    ) -> Result<Self> {
        let dialer =
            Arc::new(BasicTlsDialer::new(Verification::Full).with_root_certificates(root_certificates));
        let client = HttpClient::builder(report_uri, dialer)?
            .app_headers(app_version, user_agent)
            .timeouts(Timeouts::api_defaults())
            .retry(RetryPolicy::none())
            .build();
        Ok(Self {
            client,
            known_pins,
            app_version: app_version.to_string(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Report a mismatch observed on an established TLS session.
    pub fn report_cert_issue(&self, host: &str, port: u16, ssl: &SslRef) -> Option<JoinHandle<()>> {
        let chain: Vec<String> = ssl
            .peer_cert_chain()
            .map(|chain| {
                chain
                    .iter()
                    .filter_map(|cert| cert.to_pem().ok())
                    .map(|pem| String::from_utf8_lossy(&pem).into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let noted = ssl
            .servername(NameType::HOST_NAME)
            .unwrap_or(host)
            .to_string();
        self.report(self.build_report(host, port, &noted, chain))
    }

    /// Assemble a report stamped with the current time.
    pub fn build_report(
        &self,
        host: &str,
        port: u16,
        noted_hostname: &str,
        chain: Vec<String>,
    ) -> TlsReport {
        let now = Utc::now();
        TlsReport {
            date_time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            hostname: host.to_string(),
            port: port.to_string(),
            effective_expiration_date: (now + chrono::Duration::days(PIN_VALIDITY_DAYS))
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            include_subdomains: false,
            noted_hostname: noted_hostname.to_string(),
            validated_certificate_chain: chain.clone(),
            served_certificate_chain: chain,
            known_pins: self.known_pins.pins().to_vec(),
            app_version: self.app_version.clone(),
        }
    }

    /// Send `report` unless an identical one went out inside the window.
    ///
    /// Returns the handle of the detached send task, or `None` when the
    /// report was suppressed.
    pub fn report(&self, report: TlsReport) -> Option<JoinHandle<()>> {
        if !self.record(&report) {
            tracing::debug!(host = %report.hostname, "Identical TLS report already sent, skipping");
            return None;
        }

        let client = self.client.clone();
        Some(tokio::spawn(async move {
            let request = match Request::post("").json(&report) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode TLS report");
                    return;
                }
            };
            match client.send(&request, &CancellationToken::new()).await {
                Ok(response) if response.is_success() => {
                    tracing::info!(host = %report.hostname, "TLS report sent");
                }
                Ok(response) => {
                    tracing::warn!(status = response.status, "TLS report rejected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to send TLS report");
                }
            }
        }))
    }

    /// Prune expired entries and record `report` if it is new.
    fn record(&self, report: &TlsReport) -> bool {
        let mut sent = self.sent.lock().expect("sent reports lock poisoned");
        sent.retain(|entry| entry.sent_at.elapsed() < REPORT_DEDUP_WINDOW);
        if sent.iter().any(|entry| entry.report.same_issue(report)) {
            return false;
        }
        sent.push(SentReport {
            report: report.clone(),
            sent_at: Instant::now(),
        });
        true
    }
}
