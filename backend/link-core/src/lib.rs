//! Connection and authentication core for talking to the `linkd` daemon.
//!
//! The flow a caller drives:
//! 1. Build [`ClientOptions`] once.
//! 2. Create a [`LinkClient`] and call [`LinkClient::connect`] (resolve targets,
//!    dial with retry, fill the channel pool).
//! 3. Call [`LinkClient::ensure_authenticated`] (cached session or SSH-key
//!    challenge-response).
//! 4. Obtain a typed service accessor; every call then passes through the
//!    request-id / auth metadata pipeline.
//!
//! Configuration files are never read here. The `linkctl` binary (or any
//! other collaborator) maps its configuration onto [`ClientOptions`].

pub mod auth;
pub mod classify;
pub mod client;
pub mod dial;
pub mod error;
pub mod interceptor;
pub mod options;
pub mod pool;
pub mod proto;
pub mod services;
pub mod trust;

#[cfg(test)]
mod tests;

pub use classify::ErrorKind;
pub use client::LinkClient;
pub use error::client::ClientError;
pub use options::{AuthOptions, ClientOptions, ClientOptionsBuilder, DialMode, TlsOptions};
pub use trust::store::TrustStore;
pub use trust::tofu::{TofuCallback, TofuDecision, TofuPrompt};

pub const APP_NAME: &str = "linkctl";
pub const SESSION_TOKEN_FILE: &str = "session.token";
pub const TRUST_STORE_DIR: &str = "known_daemons";

/// Authority the HTTP/2 layer sees. The real address is chosen by the connector.
pub const DAEMON_AUTHORITY: &str = "linkd";
pub const DAEMON_ORIGIN: &str = const_format::concatcp!("http://", DAEMON_AUTHORITY);

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const AUTHORIZATION_HEADER: &str = "authorization";
pub const BEARER_PREFIX: &str = "Bearer ";

/// `{config_dir}/linkctl`, the per-user home for session and trust state.
pub fn app_config_dir() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}
