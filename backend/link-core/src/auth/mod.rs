//! SSH-key challenge-response authentication and session management.
//!
//! Per signer, one round trip: request a challenge for the public key, sign
//! it, submit the signature, receive a session token. A rejected signer is
//! never retried; the next one is tried instead.

pub mod agent;
pub mod session;
pub mod signer;
pub mod transport;

use crate::auth::session::{SessionCache, SessionState};
use crate::auth::signer::{AuthSigner, discover_signers};
use crate::auth::transport::AuthTransport;
use crate::classify::ErrorKind;
use crate::error::ClientError;
use crate::options::AuthOptions;
use crate::SESSION_TOKEN_FILE;

use common::RedactedToken;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::OnceCell;
use tonic::Code;

pub struct Authenticator {
    options: AuthOptions,
    session: Arc<SessionState>,
    signers: OnceCell<Vec<Arc<dyn AuthSigner>>>,
    cache: OnceCell<SessionCache>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("options", &self.options)
            .field("signers", &self.signers.get().map(Vec::len))
            .field("cache", &self.cache.get())
            .finish()
    }
}

impl Authenticator {
    pub fn new(options: AuthOptions, session: Arc<SessionState>) -> Self {
        Self {
            options,
            session,
            signers: OnceCell::new(),
            cache: OnceCell::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Discovered once, then reused.
    pub async fn signers(&self) -> &[Arc<dyn AuthSigner>] {
        self.signers
            .get_or_init(|| discover_signers(&self.options))
            .await
    }

    /// Keyed by the first signer, or the machine fallback when there is none.
    pub async fn cache(&self) -> &SessionCache {
        self.cache
            .get_or_init(|| async {
                let path = self
                    .options
                    .token_path
                    .clone()
                    .or_else(SessionCache::default_path)
                    .unwrap_or_else(|| SESSION_TOKEN_FILE.into());
                let io_timeout = self.options.session_io_timeout;

                match self.signers().await.first() {
                    Some(signer) => {
                        SessionCache::for_signer(path, signer.public_key_blob(), io_timeout)
                    }
                    None => SessionCache::machine_fallback(path, io_timeout),
                }
            })
            .await
    }

    /// Full handshake across all signers; stores the token on success.
    pub async fn authenticate(
        &self,
        transport: &dyn AuthTransport,
    ) -> Result<RedactedToken, ClientError> {
        let signers = self.signers().await;
        if signers.is_empty() {
            return Err(ClientError::no_signing_keys(
                "no ssh-agent keys or usable key files found",
            ));
        }

        let mut last_error = None;
        for signer in signers {
            debug!("Authenticating with {} ({})", signer.description(), signer.fingerprint());
            match self.handshake(transport, signer.as_ref()).await {
                Ok(token) => {
                    info!("Authenticated with {}", signer.fingerprint());
                    self.session.set(token.clone());
                    self.persist(&token).await;
                    return Ok(token);
                }
                Err(e) => {
                    warn!("Signer {} was not accepted: {e}", signer.description());
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(ClientError::Rpc {
                code: Code::Unauthenticated | Code::PermissionDenied,
                message,
                ..
            }) => ClientError::authentication_failed(format!(
                "none of {} key(s) were accepted: {message}",
                signers.len()
            )),
            Some(other) => other,
            None => ClientError::authentication_failed("no signer produced a result"),
        })
    }

    /// Reuse a valid session if one exists; otherwise run the handshake when
    /// `auto_auth` is set.
    pub async fn ensure_authenticated(
        &self,
        transport: &dyn AuthTransport,
        auto_auth: bool,
    ) -> Result<RedactedToken, ClientError> {
        let current = match self.session.get() {
            Some(token) => Some(token),
            None => self.cache().await.load().await?,
        };

        if let Some(token) = current {
            let refreshed = self
                .with_rpc_timeout("RefreshSession", transport.refresh_session(&token))
                .await;

            match refreshed {
                Ok(rotated) => {
                    let token = match rotated {
                        Some(rotated) => {
                            debug!("Daemon rotated the session token");
                            self.persist(&rotated).await;
                            rotated
                        }
                        None => token,
                    };
                    self.session.set(token.clone());
                    return Ok(token);
                }
                Err(e) if matches!(e.kind(), ErrorKind::SessionExpired | ErrorKind::PermissionDenied) => {
                    info!("Cached session was rejected: {e}");
                    self.session.clear();
                    if let Err(e) = self.cache().await.clear().await {
                        warn!("Could not remove rejected session: {e}");
                    }
                }
                Err(e) => return Err(e),
            }
        }

        if auto_auth {
            self.authenticate(transport).await
        } else {
            Err(ClientError::not_authenticated(
                "no valid session; run the login flow",
            ))
        }
    }

    /// Forget the session in memory and on disk.
    pub async fn clear_session(&self) -> Result<(), ClientError> {
        self.session.clear();
        self.cache().await.clear().await?;
        Ok(())
    }

    async fn handshake(
        &self,
        transport: &dyn AuthTransport,
        signer: &dyn AuthSigner,
    ) -> Result<RedactedToken, ClientError> {
        let blob = signer.public_key_blob();

        let challenge = self
            .with_rpc_timeout(
                "GetChallenge",
                transport.request_challenge(blob, signer.fingerprint()),
            )
            .await?;

        let signature = signer.sign(&challenge.nonce).await?;

        self.with_rpc_timeout(
            "VerifyChallenge",
            transport.verify_challenge(&challenge.id, blob, &signature),
        )
        .await
    }

    async fn with_rpc_timeout<T>(
        &self,
        method: &str,
        call: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let limit: Duration = self.options.rpc_timeout;
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(ClientError::rpc(
                Code::DeadlineExceeded,
                format!("{method} timed out after {limit:?}"),
            ))
        })
    }

    /// A session that cannot be cached still works for this process.
    async fn persist(&self, token: &RedactedToken) {
        if let Err(e) = self.cache().await.store(token).await {
            error!("Could not cache session token: {e}");
        }
    }
}
