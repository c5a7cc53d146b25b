use boring::pkey::PKey;
use boring::ssl::{SslAcceptor, SslAcceptorBuilder, SslMethod};
use boring::x509::X509;

/// Self-signed certificate for 127.0.0.1, ready to serve.
pub struct CertBundle {
    pub acceptor: SslAcceptorBuilder,
    /// PEM of the certificate, which doubles as its own CA.
    pub ca_pem: Vec<u8>,
    /// `pin-sha256="..."` of the certificate's public key.
    pub pin: String,
}

pub fn generate_cert_bundle() -> CertBundle {
    let subject_alt_names = vec!["127.0.0.1".to_string(), "localhost".to_string()];

    let cert =
        rcgen::generate_simple_self_signed(subject_alt_names).expect("Failed to generate cert");
    let cert_pem = cert.cert.pem();
    let key_pem = cert.signing_key.serialize_pem();

    let pkey = PKey::private_key_from_pem(key_pem.as_bytes()).expect("Failed to parse private key");
    let x509 = X509::from_pem(cert_pem.as_bytes()).expect("Failed to parse certificate");
    let pin = bridge_transport::pinning::certificate_pin(&x509).expect("Failed to compute pin");

    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
        .expect("Failed to create SslAcceptor builder");
    builder
        .set_private_key(&pkey)
        .expect("Failed to set private key");
    builder
        .set_certificate(&x509)
        .expect("Failed to set certificate");

    CertBundle {
        acceptor: builder,
        ca_pem: cert_pem.into_bytes(),
        pin,
    }
}
