//! Immutable client configuration.
//!
//! Built once per process with [`ClientOptions::builder`]; the configuration
//! collaborator maps its own file/env/flag values onto the builder.

use crate::auth::signer::AuthSigner;
use crate::error::ClientError;
use crate::trust::store::TrustStore;
use crate::trust::tofu::{TofuCallback, TofuDecision, TofuPolicy, TofuPrompt};
use crate::{TRUST_STORE_DIR, app_config_dir};

use common::RedactedToken;
use models::{Target, TargetKind};

use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_SEED: Duration = Duration::from_millis(200);
const DEFAULT_POOL_SIZE: usize = 1;
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SESSION_IO_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialMode {
    /// Try targets in priority order.
    #[default]
    Sequential,
    /// Dial every target at once; first success wins.
    Racing,
}

#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// Applies to network and overlay targets. Local sockets never use TLS.
    pub enabled: bool,
    /// Extra CA check before TOFU.
    pub ca_file: Option<PathBuf>,
    /// SNI override; defaults to the host part of the address.
    pub server_name: Option<String>,
    /// Accept any certificate and bypass the trust store. Dangerous.
    pub skip_verify: bool,
    /// Pin first-contact certificates without asking.
    pub auto_trust: bool,
    pub trust_store: Option<Arc<TrustStore>>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_file: None,
            server_name: None,
            skip_verify: false,
            auto_trust: false,
            trust_store: None,
        }
    }
}

#[derive(Clone)]
pub struct AuthOptions {
    /// Run the handshake from `ensure_authenticated` when no valid session exists.
    pub auto_auth: bool,
    pub use_agent: bool,
    /// Overrides `SSH_AUTH_SOCK`.
    pub agent_socket: Option<PathBuf>,
    /// Overrides the default `~/.ssh/id_*` search.
    pub key_file: Option<PathBuf>,
    pub passphrase: Option<RedactedToken>,
    /// When non-empty, discovery is skipped and only these are used.
    pub signers: Vec<Arc<dyn AuthSigner>>,
    /// Defaults to `{config_dir}/linkctl/session.token`.
    pub token_path: Option<PathBuf>,
    pub rpc_timeout: Duration,
    pub session_io_timeout: Duration,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_auth: true,
            use_agent: true,
            agent_socket: None,
            key_file: None,
            passphrase: None,
            signers: Vec::new(),
            token_path: None,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            session_io_timeout: DEFAULT_SESSION_IO_TIMEOUT,
        }
    }
}

impl Debug for AuthOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("AuthOptions")
            .field("auto_auth", &self.auto_auth)
            .field("use_agent", &self.use_agent)
            .field("agent_socket", &self.agent_socket)
            .field("key_file", &self.key_file)
            .field("passphrase", &self.passphrase)
            .field("signers", &self.signers.len())
            .field("token_path", &self.token_path)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}

#[derive(Clone)]
pub struct ClientOptions {
    local_socket: Option<Target>,
    network_address: Option<Target>,
    overlay_peer: Option<Target>,
    dial_mode: DialMode,
    timeout: Duration,
    retries: u32,
    backoff_seed: Duration,
    pool_size: usize,
    tls: TlsOptions,
    auth: AuthOptions,
    tofu_callback: Option<TofuCallback>,
    log_calls: bool,
}

impl Debug for ClientOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("ClientOptions")
            .field("targets", &self.targets())
            .field("dial_mode", &self.dial_mode)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("backoff_seed", &self.backoff_seed)
            .field("pool_size", &self.pool_size)
            .field("tls", &self.tls)
            .field("auth", &self.auth)
            .field("tofu_callback", &self.tofu_callback.is_some())
            .field("log_calls", &self.log_calls)
            .finish()
    }
}

impl ClientOptions {
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Configured targets, highest priority first.
    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = [&self.local_socket, &self.network_address, &self.overlay_peer]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        targets.sort_by_key(|target| target.kind().priority());
        targets
    }

    pub fn dial_mode(&self) -> DialMode {
        self.dial_mode
    }

    /// Deadline for one target's dial, including all its retries.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn backoff_seed(&self) -> Duration {
        self.backoff_seed
    }

    /// Total channels per connection, including the first.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    pub fn auth(&self) -> &AuthOptions {
        &self.auth
    }

    pub fn tofu_callback(&self) -> Option<&TofuCallback> {
        self.tofu_callback.as_ref()
    }

    pub fn log_calls(&self) -> bool {
        self.log_calls
    }

    /// Whether a dial to `target` should negotiate TLS.
    pub fn uses_tls(&self, target: &Target) -> bool {
        self.tls.enabled && target.uses_tls_by_default()
    }

    pub(crate) fn tofu_policy(&self) -> Result<TofuPolicy, ClientError> {
        let store = self.tls.trust_store.clone().ok_or_else(|| {
            ClientError::invalid_argument("TLS verification needs a trust store")
        })?;
        Ok(TofuPolicy::new(
            store,
            self.tls.auto_trust,
            self.tofu_callback.is_some(),
        ))
    }
}

/// Builder for validated [`ClientOptions`].
#[derive(Default)]
pub struct ClientOptionsBuilder {
    targets: Vec<Target>,
    dial_mode: Option<DialMode>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    backoff_seed: Option<Duration>,
    pool_size: Option<usize>,
    tls: Option<TlsOptions>,
    auth: Option<AuthOptions>,
    tofu_callback: Option<TofuCallback>,
    log_calls: bool,
}

impl ClientOptionsBuilder {
    pub fn with_local_socket(self, path: impl Into<String>) -> Self {
        self.with_target(Target::local_socket(path))
    }

    pub fn with_network_address(self, address: impl Into<String>) -> Self {
        self.with_target(Target::network(address))
    }

    pub fn with_overlay_peer(self, peer_id: impl Into<String>) -> Self {
        self.with_target(Target::overlay_peer(peer_id))
    }

    /// At most one target per kind; a later target of the same kind replaces the earlier one.
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.retain(|existing| existing.kind() != target.kind());
        self.targets.push(target);
        self
    }

    pub fn with_dial_mode(mut self, mode: DialMode) -> Self {
        self.dial_mode = Some(mode);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_backoff_seed(mut self, seed: Duration) -> Self {
        self.backoff_seed = Some(seed);
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = Some(size);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_auth(mut self, auth: AuthOptions) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_tofu_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&TofuPrompt) -> TofuDecision + Send + Sync + 'static,
    {
        self.tofu_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_log_calls(mut self, enabled: bool) -> Self {
        self.log_calls = enabled;
        self
    }

    /// Build the options with validation.
    ///
    /// When TLS verification is needed and no trust store was supplied, the
    /// default store under `{config_dir}/linkctl/known_daemons` is opened.
    #[track_caller]
    pub fn build(self) -> Result<ClientOptions, ClientError> {
        if self.targets.is_empty() {
            return Err(ClientError::invalid_argument(
                "At least one target is required",
            ));
        }

        for target in &self.targets {
            if target.address().trim().is_empty() {
                return Err(ClientError::invalid_argument(format!(
                    "Empty address for {} target",
                    target.kind()
                )));
            }
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(ClientError::invalid_argument("Timeout must be non-zero"));
        }

        let pool_size = self.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
        if pool_size == 0 {
            return Err(ClientError::invalid_argument("Pool size must be at least 1"));
        }

        let retries = self.retries.unwrap_or(DEFAULT_RETRIES);
        if retries > MAX_RETRIES {
            return Err(ClientError::invalid_argument(format!(
                "Retry count {retries} exceeds maximum {MAX_RETRIES}"
            )));
        }

        let backoff_seed = self.backoff_seed.unwrap_or(DEFAULT_BACKOFF_SEED);
        if backoff_seed.is_zero() {
            return Err(ClientError::invalid_argument("Backoff seed must be non-zero"));
        }

        let mut tls = self.tls.unwrap_or_default();
        let needs_store = tls.enabled
            && !tls.skip_verify
            && self
                .targets
                .iter()
                .any(|target| target.kind() != TargetKind::LocalSocket);
        if needs_store && tls.trust_store.is_none() {
            let dir = app_config_dir()
                .map(|dir| dir.join(TRUST_STORE_DIR))
                .ok_or_else(|| {
                    ClientError::invalid_argument("No config directory for the trust store")
                })?;
            tls.trust_store = Some(Arc::new(TrustStore::open(dir)?));
        }

        let mut options = ClientOptions {
            local_socket: None,
            network_address: None,
            overlay_peer: None,
            dial_mode: self.dial_mode.unwrap_or_default(),
            timeout,
            retries,
            backoff_seed,
            pool_size,
            tls,
            auth: self.auth.unwrap_or_default(),
            tofu_callback: self.tofu_callback,
            log_calls: self.log_calls,
        };

        for target in self.targets {
            match target.kind() {
                TargetKind::LocalSocket => options.local_socket = Some(target),
                TargetKind::NetworkAddress => options.network_address = Some(target),
                TargetKind::OverlayPeer => options.overlay_peer = Some(target),
            }
        }

        Ok(options)
    }
}
