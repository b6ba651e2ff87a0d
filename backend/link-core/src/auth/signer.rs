//! Signing identities: the [`AuthSigner`] trait, OpenSSH key files, and discovery.

use crate::auth::agent::agent_signers;
use crate::error::SignerError;
use crate::options::AuthOptions;

use common::RedactedToken;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use signature::Signer;
use ssh_encoding::Encode;
use ssh_key::{HashAlg, PrivateKey, Signature};

const DEFAULT_KEY_FILES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// An asymmetric key that can answer a challenge. Private key material stays
/// inside the implementation.
#[async_trait]
pub trait AuthSigner: Send + Sync {
    /// SSH wire-format public key.
    fn public_key_blob(&self) -> &[u8];

    /// `SHA256:<base64>` as printed by `ssh-keygen -l`.
    fn fingerprint(&self) -> &str;

    /// Where the key came from, for logs.
    fn description(&self) -> &str;

    /// SSH wire-format signature over `challenge`.
    async fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// An OpenSSH private key loaded from disk.
pub struct FileSigner {
    key: PrivateKey,
    key_blob: Vec<u8>,
    fingerprint: String,
    description: String,
}

impl FileSigner {
    /// `Ok(None)` when the key is encrypted and no passphrase was supplied.
    pub fn from_file(
        path: &Path,
        passphrase: Option<&RedactedToken>,
    ) -> Result<Option<Self>, SignerError> {
        let key = PrivateKey::read_openssh_file(path)
            .map_err(|e| SignerError::key_file(path, e.to_string()))?;

        let key = if key.is_encrypted() {
            let Some(passphrase) = passphrase else {
                return Ok(None);
            };
            key.decrypt(passphrase.as_str().as_bytes())
                .map_err(|e| SignerError::key_file(path, format!("decryption failed: {e}")))?
        } else {
            key
        };

        Self::from_private_key(key, format!("file:{}", path.display())).map(Some)
    }

    pub fn from_private_key(key: PrivateKey, description: impl Into<String>) -> Result<Self, SignerError> {
        let public_key = key.public_key();
        Ok(Self {
            key_blob: public_key.to_bytes()?,
            fingerprint: public_key.fingerprint(HashAlg::Sha256).to_string(),
            description: description.into(),
            key,
        })
    }
}

#[async_trait]
impl AuthSigner for FileSigner {
    fn public_key_blob(&self) -> &[u8] {
        &self.key_blob
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn sign(&self, challenge: &[u8]) -> Result<Vec<u8>, SignerError> {
        let signature: Signature = self
            .key
            .try_sign(challenge)
            .map_err(|e| SignerError::sign(e.to_string()))?;

        let mut encoded = Vec::new();
        signature.encode(&mut encoded)?;
        Ok(encoded)
    }
}

/// Signers in the order they are tried: injected signers alone when any are
/// configured; otherwise agent keys, then key files. Duplicate keys are dropped.
pub async fn discover_signers(options: &AuthOptions) -> Vec<Arc<dyn AuthSigner>> {
    if !options.signers.is_empty() {
        debug!("Using {} injected signer(s)", options.signers.len());
        return options.signers.clone();
    }

    let mut signers: Vec<Arc<dyn AuthSigner>> = Vec::new();

    if options.use_agent {
        match agent_signers(options.agent_socket.as_deref()).await {
            Ok(found) => signers.extend(
                found
                    .into_iter()
                    .map(|signer| Arc::new(signer) as Arc<dyn AuthSigner>),
            ),
            Err(e) => warn!("ssh-agent discovery failed: {e}"),
        }
    }

    for path in key_file_candidates(options) {
        if !path.exists() {
            if options.key_file.is_some() {
                warn!("Key file {} does not exist", path.display());
            }
            continue;
        }

        match FileSigner::from_file(&path, options.passphrase.as_ref()) {
            Ok(Some(signer)) => signers.push(Arc::new(signer)),
            Ok(None) => info!(
                "Skipping encrypted key {} (no passphrase supplied)",
                path.display()
            ),
            Err(e) => warn!("Skipping key {}: {e}", path.display()),
        }
    }

    let mut seen = HashSet::new();
    signers.retain(|signer| seen.insert(signer.public_key_blob().to_vec()));

    info!("Discovered {} signing key(s)", signers.len());
    signers
}

fn key_file_candidates(options: &AuthOptions) -> Vec<PathBuf> {
    if let Some(path) = &options.key_file {
        return vec![path.clone()];
    }

    dirs::home_dir()
        .map(|home| {
            DEFAULT_KEY_FILES
                .iter()
                .map(|name| home.join(".ssh").join(name))
                .collect()
        })
        .unwrap_or_default()
}
