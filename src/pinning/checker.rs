//! SPKI public-key pin checking.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use boring::ssl::SslRef;
use boring::x509::X509Ref;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Pins of the API hosts and of the alternative routing proxies.
///
/// Per host: current, hot backup, cold backup. All proxies share one key set.
pub const DEFAULT_TRUSTED_PINS: &[&str] = &[
    // api.protonmail.ch
    r#"pin-sha256="drtmcR2kFkM8qJClsuWgUzxgBkePfRCkRpqUesyDmeE=""#,
    r#"pin-sha256="YRGlaY0jyJ4Jw2/4M8FIftwbDIQfh8Sdro96CeEel54=""#,
    r#"pin-sha256="AfMENBVvOS8MnISprtvyPsjKlPooqh8nMB/pvCrpJpw=""#,
    // protonmail.com
    r#"pin-sha256="8joiNBdqaYiQpKskgtkJsqRxF7zN0C0aqfi8DacknnI=""#,
    r#"pin-sha256="JMI8yrbc6jB1FYGyyWRLFTmDNgIszrNEMGlgy972e7w=""#,
    r#"pin-sha256="Iu44zU84EOCZ9vx/vz67/MRVrxF1IO4i4NIa8ETwiIY=""#,
    // proton.me
    r#"pin-sha256="CT56BhOTmj5ZIPgb/xD5mH8rY3BLo/MlhP7oPyJUEDo=""#,
    r#"pin-sha256="35Dx28/uzN3LeltkCBQ8RHK0tlNSa2kCpCRGNp34Gxc=""#,
    r#"pin-sha256="qYIukVc63DEITct8sFT7ebIq5qsWmuscaIKeJx+5J5A=""#,
    // proxies
    r#"pin-sha256="EU6TS9MO0L/GsDHvVc9D5fChYLNy5JdGYpJw0ccgetM=""#,
    r#"pin-sha256="iKPIHPnDNqdkvOnTClQ8zQAIKG0XavaPkcEo0LBAABA=""#,
    r#"pin-sha256="MSlVrBCdL0hKyczvgYVSRNm88RicyY04Q2y5qrBt0xA=""#,
    r#"pin-sha256="C2UxW0T1Ckl9s+8cXfjXxlEqwAfPM4HiW2y3UdtBeCw=""#,
];

/// Ordered, immutable list of trusted pins.
///
/// Cloning is cheap; the list is shared. Use [`TrustedPinSet::with_pin`] to
/// derive a modified copy.
#[derive(Clone, Debug)]
pub struct TrustedPinSet {
    pins: Arc<[String]>,
}

impl TrustedPinSet {
    pub fn new<I, S>(pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pins: pins.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pins(&self) -> &[String] {
        &self.pins
    }

    /// Index of `pin` in the trusted list.
    pub fn position(&self, pin: &str) -> Option<usize> {
        self.pins.iter().position(|p| p == pin)
    }

    /// Copy of this set with `pin` appended.
    pub fn with_pin(&self, pin: impl Into<String>) -> Self {
        let mut pins = self.pins.to_vec();
        pins.push(pin.into());
        Self { pins: pins.into() }
    }
}

impl Default for TrustedPinSet {
    fn default() -> Self {
        Self::new(DEFAULT_TRUSTED_PINS.iter().copied())
    }
}

/// Compute the `pin-sha256="…"` string for a certificate's public key.
pub fn certificate_pin(cert: &X509Ref) -> Result<String> {
    let spki = cert
        .public_key()
        .and_then(|key| key.public_key_to_der())
        .map_err(|e| Error::tls(format!("Failed to encode public key: {}", e)))?;
    Ok(format!(
        "pin-sha256=\"{}\"",
        BASE64.encode(Sha256::digest(&spki))
    ))
}

/// Checks peer certificate chains against a [`TrustedPinSet`].
#[derive(Clone, Debug)]
pub struct PinChecker {
    trusted: TrustedPinSet,
}

impl PinChecker {
    pub fn new(trusted: TrustedPinSet) -> Self {
        Self { trusted }
    }

    pub fn trusted_pins(&self) -> &TrustedPinSet {
        &self.trusted
    }

    /// Succeed if any certificate in `chain` carries a trusted key.
    pub fn check_certificates<'a, I>(&self, chain: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a X509Ref>,
    {
        for cert in chain {
            let pin = certificate_pin(cert)?;
            match self.trusted.position(&pin) {
                Some(0) => return Ok(()),
                Some(index) => {
                    tracing::warn!(pin = %pin, index, "Certificate matched a non-primary pin");
                    return Ok(());
                }
                None => continue,
            }
        }
        Err(Error::TlsMismatch)
    }

    /// Check the peer chain of an established TLS session.
    pub fn check_connection(&self, ssl: &SslRef) -> Result<()> {
        if let Some(chain) = ssl.peer_cert_chain() {
            return self.check_certificates(chain.iter());
        }
        match ssl.peer_certificate() {
            Some(cert) => self.check_certificates(std::iter::once(&*cert)),
            None => Err(Error::TlsMismatch),
        }
    }
}
