// Unit tests for certificate fingerprints and peer identity extraction

use crate::trust::{certificate_fingerprint, peer_identity};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::CertificateDer;

fn certificate(common_name: Option<&str>, dns_names: &[&str]) -> CertificateDer<'static> {
    let mut params = CertificateParams::new(
        dns_names.iter().map(|name| name.to_string()).collect::<Vec<_>>(),
    )
    .expect("params");
    let mut dn = DistinguishedName::new();
    if let Some(cn) = common_name {
        dn.push(DnType::CommonName, cn);
    }
    params.distinguished_name = dn;

    let key = KeyPair::generate().expect("key");
    params.self_signed(&key).expect("cert").der().clone()
}

/// **VALUE**: Verifies the subject common name is the peer identity.
///
/// **WHY THIS MATTERS**: Pins are keyed by identity; the daemon advertises its name in
/// the certificate subject.
///
/// **BUG THIS CATCHES**: Would catch the SAN or address being preferred over the CN.
#[test]
fn given_certificate_with_cn_when_identity_then_cn() {
    let cert = certificate(Some("linkd-prod-1"), &["daemon.example"]);

    assert_eq!(peer_identity(&cert, "10.0.0.5:7443"), "linkd-prod-1");
}

/// **VALUE**: Verifies the first DNS SAN is used when there is no CN.
///
/// **WHY THIS MATTERS**: Modern certificates often omit the CN entirely.
///
/// **BUG THIS CATCHES**: Would catch every CN-less daemon falling back to its address,
/// which changes whenever the daemon moves.
#[test]
fn given_certificate_without_cn_when_identity_then_first_dns_san() {
    let cert = certificate(None, &["daemon.example", "alt.example"]);

    assert_eq!(peer_identity(&cert, "10.0.0.5:7443"), "daemon.example");
}

/// **VALUE**: Verifies unparseable certificates fall back to the dial address.
///
/// **WHY THIS MATTERS**: Identity extraction must never panic inside a TLS handshake.
///
/// **BUG THIS CATCHES**: Would catch an unwrap on the x509 parse.
#[test]
fn given_garbage_der_when_identity_then_address() {
    let cert = CertificateDer::from(vec![0x30, 0x03, 0x01, 0x02, 0x03]);

    assert_eq!(peer_identity(&cert, "10.0.0.5:7443"), "10.0.0.5:7443");
}

/// **VALUE**: Verifies the fingerprint format and that it differs per certificate.
///
/// **WHY THIS MATTERS**: Fingerprints are what pins compare; two keys for the same
/// name must not collide.
///
/// **BUG THIS CATCHES**: Would catch hashing the subject instead of the whole DER.
#[test]
fn given_two_certificates_with_same_name_when_fingerprinted_then_distinct_sha256_hex() {
    let first = certificate(Some("linkd"), &[]);
    let second = certificate(Some("linkd"), &[]);

    let a = certificate_fingerprint(&first);
    let b = certificate_fingerprint(&second);

    assert!(a.starts_with("SHA256:"));
    assert_eq!(a.len(), "SHA256:".len() + 64);
    assert_ne!(a, b);
    assert_eq!(a, certificate_fingerprint(&first));
}
