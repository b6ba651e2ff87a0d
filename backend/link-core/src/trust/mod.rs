//! TLS trust: pinned certificates, the trust-on-first-use policy, and the
//! rustls verifiers that enforce it.

pub mod store;
pub mod tofu;
pub mod verifier;

use models::trust_record::FINGERPRINT_PREFIX;

use log::debug;
use rustls::pki_types::CertificateDer;
use sha2::{Digest, Sha256};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::parse_x509_certificate;

/// `SHA256:<hex>` over the DER encoding of the whole certificate.
pub fn certificate_fingerprint(cert: &CertificateDer<'_>) -> String {
    let digest = Sha256::digest(cert.as_ref());
    format!("{FINGERPRINT_PREFIX}{}", hex::encode(digest))
}

/// Identity the peer advertises: subject CN, then first DNS SAN, then the dial address.
pub fn peer_identity(cert: &CertificateDer<'_>, address: &str) -> String {
    let parsed = match parse_x509_certificate(cert.as_ref()) {
        Ok((_, parsed)) => parsed,
        Err(e) => {
            debug!("Could not parse peer certificate for {address}: {e}");
            return address.to_string();
        }
    };

    if let Some(cn) = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .filter(|cn| !cn.trim().is_empty())
    {
        return cn.to_string();
    }

    let dns_name = parsed
        .subject_alternative_name()
        .ok()
        .flatten()
        .and_then(|san| {
            san.value.general_names.iter().find_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
        });

    dns_name.unwrap_or_else(|| address.to_string())
}
