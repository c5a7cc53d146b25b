//! DNS-over-HTTPS TXT lookups (RFC 8484, GET form).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::headers;
use crate::request::Request;
use crate::retry::RetryPolicy;
use crate::timeouts::Timeouts;
use crate::transport::{BasicTlsDialer, HttpClient, Verification};

/// Obfuscated name whose TXT records list the alternative routing hosts.
pub const DEFAULT_PROXY_QUERY: &str = "dMFYGSLTQOJXXI33ONVQWS3BOMNUA.protonpro.xyz";

pub const QUAD9_PROVIDER: &str = "https://dns11.quad9.net/dns-query";
pub const QUAD9_PORT_PROVIDER: &str = "https://dns11.quad9.net:5053/dns-query";
pub const GOOGLE_PROVIDER: &str = "https://dns.google/dns-query";

/// DoH providers, queried in this order.
pub const DEFAULT_DOH_PROVIDERS: &[&str] = &[QUAD9_PROVIDER, QUAD9_PORT_PROVIDER, GOOGLE_PROVIDER];

const DNS_MESSAGE: &str = "application/dns-message";

/// Boxed future returned by [`DohLookup::lookup`].
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;

/// Resolves the TXT records of `query` at one DoH provider.
pub trait DohLookup: Send + Sync {
    fn lookup<'a>(&'a self, query: &'a str, provider: &'a str) -> LookupFuture<'a>;
}

/// Pack a TXT question for `query` into DNS wire format.
pub fn encode_txt_query(query: &str) -> Result<Vec<u8>> {
    let fqdn = if query.ends_with('.') {
        query.to_string()
    } else {
        format!("{}.", query)
    };
    let name = Name::from_ascii(&fqdn)
        .map_err(|e| Error::dns(format!("Invalid query name {}: {}", query, e)))?;

    let mut message = Message::new();
    // RFC 8484 recommends id 0 for cache friendliness.
    message
        .set_id(0)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, RecordType::TXT));

    message
        .to_vec()
        .map_err(|e| Error::dns(format!("Failed to pack DNS request: {}", e)))
}

/// Collect every TXT string of the answer section of a wire-format response.
pub fn decode_txt_answers(wire: &[u8]) -> Result<Vec<String>> {
    let message = Message::from_vec(wire)
        .map_err(|e| Error::dns(format!("Failed to unpack DNS response: {}", e)))?;
    let mut records = Vec::new();
    for answer in message.answers() {
        if let Some(RData::TXT(txt)) = answer.data() {
            records.extend(
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).into_owned()),
            );
        }
    }
    Ok(records)
}

/// DoH lookups over HTTPS GET.
pub struct HttpsDohLookup {
    timeout: Duration,
    root_certificates: Arc<[Vec<u8>]>,
}

impl HttpsDohLookup {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            root_certificates: Arc::from(Vec::new()),
        }
    }

    pub fn with_root_certificates(mut self, certs: &[Vec<u8>]) -> Self {
        self.root_certificates = Arc::from(certs.to_vec());
        self
    }

    async fn query(&self, query: &str, provider: &str) -> Result<Vec<String>> {
        let encoded = URL_SAFE_NO_PAD.encode(encode_txt_query(query)?);
        let dialer = Arc::new(
            BasicTlsDialer::new(Verification::Full)
                .with_root_certificates(&self.root_certificates),
        );
        let client = HttpClient::builder(provider, dialer)?
            .timeouts(Timeouts::api_defaults().total(self.timeout))
            .retry(RetryPolicy::none())
            .build();

        let request = Request::get(format!("?dns={}", encoded)).header(headers::ACCEPT, DNS_MESSAGE);
        let response = client.send(&request, &CancellationToken::new()).await?;
        if !response.is_success() {
            return Err(Error::dns(format!(
                "DoH provider {} answered {}",
                provider, response.status
            )));
        }

        let content_type = response.content_type().unwrap_or_default();
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if !media_type.eq_ignore_ascii_case(DNS_MESSAGE) {
            return Err(Error::dns(format!(
                "DoH provider {} answered with {:?}",
                provider, content_type
            )));
        }

        let records = decode_txt_answers(response.body())?;
        tracing::info!(provider, count = records.len(), "Received TXT records");
        Ok(records)
    }
}

impl DohLookup for HttpsDohLookup {
    fn lookup<'a>(&'a self, query: &'a str, provider: &'a str) -> LookupFuture<'a> {
        Box::pin(self.query(query, provider))
    }
}
