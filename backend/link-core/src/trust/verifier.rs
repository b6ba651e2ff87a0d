//! rustls certificate verifiers.
//!
//! [`TofuVerifier`] pins whatever certificate the daemon presents (subject to
//! the [`TofuPolicy`]) and still checks handshake signatures with the crypto
//! provider. [`SkipVerification`] is the explicit opt-out and never consults
//! the trust store.

use crate::error::ClientError;
use crate::options::ClientOptions;
use crate::trust::tofu::{TofuOutcome, TofuPolicy};
use crate::trust::{certificate_fingerprint, peer_identity};

use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};

const ALPN_H2: &[u8] = b"h2";

/// Carries a non-accepting TOFU outcome out of the handshake, which rustls
/// can only report as an opaque error.
#[derive(Debug, Clone, Default)]
pub(crate) struct VerdictSlot(Arc<Mutex<Option<TofuOutcome>>>);

impl VerdictSlot {
    fn put(&self, outcome: TofuOutcome) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }

    pub(crate) fn take(&self) -> Option<TofuOutcome> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

pub struct TofuVerifier {
    policy: TofuPolicy,
    address: String,
    ca: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    slot: VerdictSlot,
}

impl Debug for TofuVerifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("TofuVerifier")
            .field("policy", &self.policy)
            .field("address", &self.address)
            .field("ca", &self.ca.is_some())
            .finish()
    }
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        if let Some(ca) = &self.ca {
            ca.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;
        }

        let presented = certificate_fingerprint(end_entity);
        let identity = peer_identity(end_entity, &self.address);

        let outcome = self
            .policy
            .evaluate(&identity, &self.address, &presented)
            .map_err(|e| TlsError::General(e.to_string()))?;

        match outcome {
            TofuOutcome::Accepted => Ok(ServerCertVerified::assertion()),
            TofuOutcome::NeedsConfirmation(prompt) => {
                debug!("Deferring handshake with '{identity}' for confirmation");
                self.slot.put(TofuOutcome::NeedsConfirmation(prompt));
                Err(TlsError::General(format!(
                    "certificate for '{identity}' needs confirmation"
                )))
            }
            TofuOutcome::Rejected(rejection) => {
                let message = rejection.to_string();
                self.slot.put(TofuOutcome::Rejected(rejection));
                Err(TlsError::General(message))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any certificate. Only built when `skip_verify` is set.
#[derive(Debug)]
pub struct SkipVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// rustls client configuration for one dial to `address`.
pub(crate) fn tls_client_config(
    options: &ClientOptions,
    address: &str,
    slot: &VerdictSlot,
) -> Result<ClientConfig, ClientError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let tls = options.tls();

    let verifier: Arc<dyn ServerCertVerifier> = if tls.skip_verify {
        warn!("TLS verification is DISABLED for {address}; the daemon's identity is not checked");
        Arc::new(SkipVerification {
            provider: Arc::clone(&provider),
        })
    } else {
        let ca = tls
            .ca_file
            .as_deref()
            .map(|path| load_ca_verifier(path, Arc::clone(&provider)))
            .transpose()?;

        Arc::new(TofuVerifier {
            policy: options.tofu_policy()?,
            address: address.to_string(),
            ca,
            provider: Arc::clone(&provider),
            slot: slot.clone(),
        })
    };

    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ClientError::internal(format!("TLS protocol setup failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(config)
}

fn load_ca_verifier(
    path: &Path,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<WebPkiServerVerifier>, ClientError> {
    let invalid = |reason: String| {
        ClientError::invalid_argument(format!("CA file {}: {reason}", path.display()))
    };

    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(path).map_err(|e| invalid(e.to_string()))? {
        let cert = cert.map_err(|e| invalid(e.to_string()))?;
        roots.add(cert).map_err(|e| invalid(e.to_string()))?;
    }

    if roots.is_empty() {
        return Err(invalid(String::from("no certificates found")));
    }

    WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| invalid(e.to_string()))
}
