//! Dialer abstraction and the BoringSSL base dialer.
//!
//! Every layer of the dial chain (pinning, proxy fallback) implements
//! [`TlsDialer`] and wraps another one, so layers compose at construction
//! time without knowing what sits underneath.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use boring::ssl::{SslConnector, SslMethod, SslRef, SslVerifyMode, SslVersion};
use boring::x509::X509;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

use crate::error::{Error, Result};

/// Network address of a server: host, port and whether TLS is used.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
        }
    }

    /// Parse an address from a URL. A bare host is treated as `https://host`.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = parse_lenient(raw)?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::connection(format!("Missing host in {}", raw)))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::connection(format!("Missing port in {}", raw)))?;
        Ok(Self::new(
            host.trim_start_matches('[').trim_end_matches(']'),
            port,
            url.scheme() == "https",
        ))
    }

    /// Value of the HTTP `Host` header for this address.
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.socket_addr())
    }
}

/// Parse a URL, defaulting the scheme to https when none is given.
pub(crate) fn parse_lenient(raw: &str) -> Result<url::Url> {
    if raw.starts_with("https://") || raw.starts_with("http://") {
        Ok(url::Url::parse(raw)?)
    } else {
        Ok(url::Url::parse(&format!("https://{}", raw))?)
    }
}

/// Stream that can be either HTTP (plain TCP) or HTTPS (TLS).
#[derive(Debug)]
pub enum MaybeHttpsStream {
    /// Plain TCP stream for HTTP.
    Http(TcpStream),
    /// TLS-wrapped stream for HTTPS.
    Https(SslStream<TcpStream>),
}

impl MaybeHttpsStream {
    /// TLS session state, for HTTPS streams.
    pub fn ssl(&self) -> Option<&SslRef> {
        match self {
            MaybeHttpsStream::Http(_) => None,
            MaybeHttpsStream::Https(stream) => Some(stream.ssl()),
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Boxed future returned by [`TlsDialer::dial`].
pub type DialFuture<'a> = Pin<Box<dyn Future<Output = Result<MaybeHttpsStream>> + Send + 'a>>;

/// A layer of the dial chain.
pub trait TlsDialer: Send + Sync {
    /// Open a connection to `address`, performing the TLS handshake for
    /// secure addresses.
    fn dial<'a>(&'a self, address: &'a Address) -> DialFuture<'a>;
}

/// How the base dialer validates server certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Verify the chain and the hostname.
    Full,
    /// Full verification for the given host; no verification for any other
    /// host, whose trust comes from the pinning layer instead.
    CanonicalHostOnly(String),
}

/// Plain TCP + BoringSSL dialer at the bottom of every chain.
#[derive(Clone)]
pub struct BasicTlsDialer {
    root_certs: Vec<X509>,
    verification: Verification,
}

impl BasicTlsDialer {
    pub fn new(verification: Verification) -> Self {
        Self {
            root_certs: Vec::new(),
            verification,
        }
    }

    /// Add custom root certificates (DER or PEM). Invalid entries are skipped.
    pub fn with_root_certificates(mut self, certs: &[Vec<u8>]) -> Self {
        for bytes in certs {
            match X509::from_der(bytes).or_else(|_| X509::from_pem(bytes)) {
                Ok(cert) => self.root_certs.push(cert),
                Err(e) => tracing::warn!("Ignoring invalid root certificate: {}", e),
            }
        }
        self
    }

    fn configure_ssl(&self) -> Result<SslConnector> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL connector: {}", e)))?;

        for cert in &self.root_certs {
            builder
                .cert_store_mut()
                .add_cert(cert.clone())
                .map_err(|e| Error::tls(format!("Failed to add root certificate: {}", e)))?;
        }

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::tls(format!("Failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::tls(format!("Failed to set max TLS version: {}", e)))?;
        builder
            .set_alpn_protos(b"\x08http/1.1")
            .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;

        Ok(builder.build())
    }

    async fn connect(&self, address: &Address) -> Result<MaybeHttpsStream> {
        let addr = address.socket_addr();
        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| Error::connection(format!("Failed to connect to {}: {}", addr, e)))?;

        if !address.secure {
            return Ok(MaybeHttpsStream::Http(tcp_stream));
        }

        let mut ssl_config = self
            .configure_ssl()?
            .configure()
            .map_err(|e| Error::tls(format!("Failed to configure SSL: {}", e)))?;

        match &self.verification {
            Verification::Full => {}
            Verification::CanonicalHostOnly(canonical) => {
                if !canonical.eq_ignore_ascii_case(&address.host) {
                    ssl_config.set_verify_hostname(false);
                    ssl_config.set_verify(SslVerifyMode::NONE);
                }
            }
        }

        let ssl_stream = tokio_boring::connect(ssl_config, &address.host, tcp_stream)
            .await
            .map_err(|e| Error::tls(format!("TLS handshake with {} failed: {}", addr, e)))?;

        Ok(MaybeHttpsStream::Https(ssl_stream))
    }
}

impl TlsDialer for BasicTlsDialer {
    fn dial<'a>(&'a self, address: &'a Address) -> DialFuture<'a> {
        Box::pin(self.connect(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_url() {
        let addr = Address::from_url("https://mail-api.proton.me").unwrap();
        assert_eq!(addr, Address::new("mail-api.proton.me", 443, true));
        assert_eq!(addr.host_header(), "mail-api.proton.me");

        let addr = Address::from_url("http://127.0.0.1:8080/api").unwrap();
        assert_eq!(addr, Address::new("127.0.0.1", 8080, false));
        assert_eq!(addr.host_header(), "127.0.0.1:8080");
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_bare_host_defaults_to_https() {
        let addr = Address::from_url("proxy.example.net").unwrap();
        assert_eq!(addr, Address::new("proxy.example.net", 443, true));
    }

    #[tokio::test]
    async fn test_plain_dial_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = BasicTlsDialer::new(Verification::Full);
        let result = dialer.dial(&Address::new("127.0.0.1", port, false)).await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
