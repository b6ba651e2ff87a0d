//! Session token state and its encrypted on-disk cache.
//!
//! File format: `nonce (12 bytes) || ChaCha20-Poly1305(token)`.
//!
//! The key is `SHA-256(domain || public key blob)` of the first available
//! signer. Without a signer the key falls back to
//! `SHA-256(fallback domain || hostname || user)`, which anyone on the same
//! machine and account can recompute; it only keeps the token out of casual
//! view.

use crate::error::SessionCacheError;
use crate::{SESSION_TOKEN_FILE, app_config_dir};

use common::{ErrorLocation, RedactedToken};

use std::io::{ErrorKind, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use sysinfo::System;
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

const SESSION_KEY_DOMAIN: &[u8] = b"linkd-session-key-v1";
const FALLBACK_KEY_DOMAIN: &[u8] = b"linkd-session-fallback-v1";
const NONCE_LEN: usize = 12;

/// In-memory session token. Readers never observe a torn value.
#[derive(Debug, Default)]
pub struct SessionState {
    token: RwLock<Option<RedactedToken>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<RedactedToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: RedactedToken) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Signer,
    MachineFallback,
}

pub struct SessionCache {
    path: PathBuf,
    key: Zeroizing<[u8; 32]>,
    source: KeySource,
    io_timeout: Duration,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("path", &self.path)
            .field("source", &self.source)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionCache {
    /// `{config_dir}/linkctl/session.token`.
    pub fn default_path() -> Option<PathBuf> {
        app_config_dir().map(|dir| dir.join(SESSION_TOKEN_FILE))
    }

    pub fn for_signer(path: impl Into<PathBuf>, public_key_blob: &[u8], io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            key: derive_key(SESSION_KEY_DOMAIN, &[public_key_blob]),
            source: KeySource::Signer,
            io_timeout,
        }
    }

    pub fn machine_fallback(path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        warn!(
            "No signing key available; the session cache uses a machine-derived key \
             (hostname + user), which is weaker than a key-derived one"
        );

        let host = System::host_name().unwrap_or_default();
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();

        Self {
            path: path.into(),
            key: derive_key(FALLBACK_KEY_DOMAIN, &[host.as_bytes(), user.as_bytes()]),
            source: KeySource::MachineFallback,
            io_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key_source(&self) -> KeySource {
        self.source
    }

    /// Encrypt under a fresh random nonce.
    pub fn seal(&self, token: &RedactedToken) -> Result<Vec<u8>, SessionCacheError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, token.as_str().as_bytes())
            .map_err(|e| SessionCacheError::Encrypt {
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            })?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Fails with [`SessionCacheError::Decrypt`] on any tampering or key mismatch.
    pub fn open_sealed(&self, sealed: &[u8]) -> Result<RedactedToken, SessionCacheError> {
        if sealed.len() <= NONCE_LEN {
            return Err(SessionCacheError::decrypt(&self.path, "token file is truncated"));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(self.key.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| {
                    SessionCacheError::decrypt(&self.path, "authentication tag mismatch")
                })?,
        );

        let token = std::str::from_utf8(&plaintext)
            .map_err(|_| SessionCacheError::decrypt(&self.path, "token is not UTF-8"))?;
        Ok(RedactedToken::new(token))
    }

    /// `Ok(None)` when no token file exists.
    pub async fn load(&self) -> Result<Option<RedactedToken>, SessionCacheError> {
        let read = tokio::time::timeout(self.io_timeout, tokio::fs::read(&self.path))
            .await
            .map_err(|_| SessionCacheError::timeout(&self.path, self.io_timeout))?;

        let sealed = match read {
            Ok(sealed) => sealed,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cached session at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(SessionCacheError::io(&self.path, e)),
        };

        let token = self.open_sealed(&sealed)?;
        debug!("Loaded cached session from {}", self.path.display());
        Ok(Some(token))
    }

    /// Atomic owner-only write (temp file + rename).
    pub async fn store(&self, token: &RedactedToken) -> Result<(), SessionCacheError> {
        let sealed = self.seal(token)?;
        let write = tokio::time::timeout(self.io_timeout, self.write_atomic(&sealed))
            .await
            .map_err(|_| SessionCacheError::timeout(&self.path, self.io_timeout))?;
        write?;

        info!("Session cached at {}", self.path.display());
        Ok(())
    }

    /// Returns whether a token file was removed.
    pub async fn clear(&self) -> Result<bool, SessionCacheError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed cached session at {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionCacheError::io(&self.path, e)),
        }
    }

    async fn write_atomic(&self, sealed: &[u8]) -> Result<(), SessionCacheError> {
        let path = self.path.clone();
        let sealed = sealed.to_vec();
        tokio::task::spawn_blocking(move || write_sealed(&path, &sealed))
            .await
            .map_err(|e| SessionCacheError::io(&self.path, std::io::Error::other(e)))?
    }
}

/// Write to a uniquely named sibling, then rename over `path`. The temp file
/// is created owner-only, so the result is 0600 even when replacing a file
/// with looser permissions.
fn write_sealed(path: &Path, sealed: &[u8]) -> Result<(), SessionCacheError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| SessionCacheError::io(parent, e))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| SessionCacheError::io(parent, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SessionCacheError::io(temp.path(), e))?;
    }
    temp.write_all(sealed)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| SessionCacheError::io(temp.path(), e))?;

    temp.persist(path)
        .map(drop)
        .map_err(|e| SessionCacheError::io(path, e.error))
}

fn derive_key(domain: &[u8], parts: &[&[u8]]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    Zeroizing::new(hasher.finalize().into())
}
