//! [`LinkClient`], the handle a caller holds for one daemon connection.
//!
//! A client is either disconnected (empty pool) or holds every channel of one
//! connection. `connect` is idempotent and serialized; `close` empties the
//! pool. Session state lives alongside the pool and is shared with the
//! metadata pipeline so every call carries the current token.

use crate::auth::Authenticator;
use crate::auth::session::SessionState;
use crate::auth::transport::AuthTransport;
use crate::dial::connector::{Attempt, open_channel};
use crate::dial::{dial, resolve};
use crate::error::ClientError;
use crate::interceptor::{RpcChannel, build_pipeline};
use crate::options::ClientOptions;
use crate::pool::{ConnectionPool, PoolDispatch};
use crate::proto::auth_service_client::AuthServiceClient;
use crate::services::ServiceRegistry;

use common::RedactedToken;
use models::Target;

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct LinkClient {
    options: ClientOptions,
    pool: Arc<ConnectionPool>,
    authenticator: Authenticator,
    rpc: RpcChannel,
    services: ServiceRegistry,
    connect_lock: AsyncMutex<()>,
}

impl LinkClient {
    pub fn new(options: ClientOptions) -> Self {
        let pool = Arc::new(ConnectionPool::new());
        let session = Arc::new(SessionState::new());
        let rpc = build_pipeline(
            PoolDispatch::new(Arc::clone(&pool)),
            Arc::clone(&session),
            options.log_calls(),
        );

        Self {
            authenticator: Authenticator::new(options.auth().clone(), session),
            options,
            pool,
            rpc,
            services: ServiceRegistry::new(),
            connect_lock: AsyncMutex::new(()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Connect with no caller cancellation beyond the configured timeouts.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connect_with_cancel(&CancellationToken::new()).await
    }

    /// Resolve targets, dial, and fill the pool. A no-op when already connected.
    ///
    /// The pool is installed in one step, so a failed connect leaves the
    /// client fully disconnected.
    pub async fn connect_with_cancel(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;
        if !self.pool.is_empty() {
            debug!("Already connected; connect is a no-op");
            return Ok(());
        }

        let targets = resolve(&self.options);
        let dialed = dial(&targets, &self.options, cancel).await?;

        let mut channels = vec![dialed.channel];
        for extra in 1..self.options.pool_size() {
            if cancel.is_cancelled() {
                return Err(ClientError::cancelled("connect cancelled by caller"));
            }
            match self.open_extra(&dialed.target, cancel).await {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    warn!("Pooled channel {extra} to {} failed: {e}", dialed.target);
                }
            }
        }

        let size = self.pool.install(dialed.target.clone(), channels);
        info!(
            "Connected to {} with {size}/{} pooled channel(s)",
            dialed.target,
            self.options.pool_size()
        );
        Ok(())
    }

    /// Drop every pooled channel. Session state is kept.
    pub async fn close(&self) {
        let _guard = self.connect_lock.lock().await;
        let dropped = self.pool.clear();
        if dropped > 0 {
            info!("Closed {dropped} pooled channel(s)");
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.pool.is_empty()
    }

    pub fn connected_target(&self) -> Option<Target> {
        self.pool.target()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Pipeline-wrapped pooled channel for service stubs.
    pub fn channel(&self) -> Result<RpcChannel, ClientError> {
        if self.pool.is_empty() {
            return Err(ClientError::not_connected(
                "no connected channel; call connect first",
            ));
        }
        Ok(self.rpc.clone())
    }

    /// One `S` per client, built on first use from the pipeline channel.
    ///
    /// Accessors survive reconnects: they dispatch through the pool, not a
    /// fixed channel.
    pub fn service<S, F>(&self, factory: F) -> Result<S, ClientError>
    where
        S: Clone + Send + Sync + 'static,
        F: FnOnce(RpcChannel) -> S,
    {
        let channel = self.channel()?;
        self.services.get_or_init(|| factory(channel))
    }

    pub fn auth_service(&self) -> Result<AuthServiceClient<RpcChannel>, ClientError> {
        self.service(AuthServiceClient::new)
    }

    /// Run the full handshake, ignoring any cached session.
    pub async fn authenticate(&self) -> Result<RedactedToken, ClientError> {
        let transport = self.auth_service()?;
        self.authenticator.authenticate(&transport).await
    }

    /// Reuse the cached session if the daemon still accepts it; otherwise
    /// authenticate when auto-auth is enabled.
    pub async fn ensure_authenticated(&self) -> Result<RedactedToken, ClientError> {
        let transport = self.auth_service()?;
        self.ensure_authenticated_with(&transport).await
    }

    /// [`Self::ensure_authenticated`] over a caller-supplied transport.
    pub async fn ensure_authenticated_with(
        &self,
        transport: &dyn AuthTransport,
    ) -> Result<RedactedToken, ClientError> {
        self.authenticator
            .ensure_authenticated(transport, self.options.auth().auto_auth)
            .await
    }

    /// Forget the session in memory and on disk.
    pub async fn clear_session(&self) -> Result<(), ClientError> {
        self.authenticator.clear_session().await
    }

    pub fn session_token(&self) -> Option<RedactedToken> {
        self.authenticator.session().get()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticator.session().is_authenticated()
    }

    async fn open_extra(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<tonic::transport::Channel, ClientError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::cancelled("connect cancelled by caller")),
            opened = tokio::time::timeout(self.options.timeout(), open_channel(target, &self.options)) => {
                match opened {
                    Ok(Ok(Attempt::Connected(channel))) => Ok(channel),
                    // The first channel settled trust; a prompt now means the certificate moved.
                    Ok(Ok(Attempt::NeedsConfirmation(prompt))) => Err(ClientError::connection_failed(
                        target.to_string(),
                        format!("certificate for '{}' changed while filling the pool", prompt.identity()),
                    )),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ClientError::connection_failed(target.to_string(), "timed out")),
                }
            }
        }
    }
}
