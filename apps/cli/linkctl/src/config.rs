//! `linkctl.toml` loading and the mapping onto [`ClientOptions`].
//!
//! Precedence, lowest first: built-in defaults, the config file, `.env`,
//! `LINKCTL_*` environment variables, command-line flags. clap folds the last
//! three together; this module merges the result over the file.

use crate::cli::ConnectionArgs;
use crate::error::{ConfigError, LinkctlError};
use crate::prompt::confirm_on_terminal;

use link_core::{
    AuthOptions, ClientOptions, DialMode, TRUST_STORE_DIR, TlsOptions, TrustStore,
    app_config_dir,
};

use common::{ErrorLocation, RedactedToken};
use models::Target;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Deserializer};

pub const CONFIG_FILE_NAME: &str = "linkctl.toml";

/// Dialed when neither the file nor the flags name a target.
#[cfg(windows)]
pub const DEFAULT_TARGET: &str = r"pipe:\\.\pipe\linkd";
#[cfg(not(windows))]
pub const DEFAULT_TARGET: &str = "unix:/run/linkd/linkd.sock";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkctlConfig {
    /// Target strings in any order; priority comes from their kind.
    pub targets: Vec<String>,
    pub race: bool,
    #[serde(deserialize_with = "human_duration")]
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    #[serde(deserialize_with = "human_duration")]
    pub backoff_seed: Option<Duration>,
    pub pool_size: Option<usize>,
    pub log_calls: bool,
    pub tls: TlsSection,
    pub auth: AuthSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSection {
    pub enabled: Option<bool>,
    pub ca_file: Option<PathBuf>,
    pub server_name: Option<String>,
    pub skip_verify: bool,
    pub auto_trust: bool,
    pub trust_store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    pub auto_auth: Option<bool>,
    pub use_agent: Option<bool>,
    pub agent_socket: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub token_path: Option<PathBuf>,
    #[serde(deserialize_with = "human_duration")]
    pub rpc_timeout: Option<Duration>,
    /// Only ever set from the environment.
    #[serde(skip)]
    pub passphrase: Option<RedactedToken>,
}

fn human_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|text| humantime::parse_duration(&text).map_err(serde::de::Error::custom))
        .transpose()
}

/// `{config_dir}/linkctl/linkctl.toml`.
pub fn default_path() -> Option<PathBuf> {
    app_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

impl LinkctlConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    #[track_caller]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                debug!("Loading configuration from {}", path.display());
                Self::from_toml(&path, &contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
                debug!("No configuration at {}; using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path,
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    #[track_caller]
    pub fn from_toml(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Layer command-line and environment values over the file.
    pub fn apply_args(&mut self, args: &ConnectionArgs) {
        if !args.targets.is_empty() {
            self.targets = args.targets.iter().map(ToString::to_string).collect();
        }
        self.race |= args.race;
        if let Some(timeout) = args.timeout {
            self.timeout = Some(timeout);
        }
        if args.no_tls {
            self.tls.enabled = Some(false);
        }
        self.tls.auto_trust |= args.auto_trust;
        self.tls.skip_verify |= args.insecure_skip_verify;
        if let Some(key_file) = &args.key_file {
            self.auth.key_file = Some(key_file.clone());
        }
        if let Some(passphrase) = &args.key_passphrase {
            self.auth.passphrase = Some(passphrase.clone());
        }
    }

    /// Parsed targets, or the platform default when none are configured.
    #[track_caller]
    pub fn targets(&self) -> Result<Vec<Target>, ConfigError> {
        if self.targets.is_empty() {
            return Target::from_str(DEFAULT_TARGET)
                .map(|target| vec![target])
                .map_err(|e| ConfigError::invalid("targets", e.to_string()));
        }

        self.targets
            .iter()
            .map(|value| {
                Target::from_str(value).map_err(|e| ConfigError::invalid("targets", e.to_string()))
            })
            .collect()
    }

    pub fn trust_store_dir(&self) -> Option<PathBuf> {
        self.tls
            .trust_store_dir
            .clone()
            .or_else(|| app_config_dir().map(|dir| dir.join(TRUST_STORE_DIR)))
    }

    pub fn open_trust_store(&self) -> Result<TrustStore, LinkctlError> {
        let dir = self
            .trust_store_dir()
            .ok_or_else(|| LinkctlError::linkctl("No config directory for the trust store"))?;
        Ok(TrustStore::open(dir).map_err(link_core::ClientError::from)?)
    }

    pub fn auth_options(&self) -> AuthOptions {
        let defaults = AuthOptions::default();
        AuthOptions {
            auto_auth: self.auth.auto_auth.unwrap_or(defaults.auto_auth),
            use_agent: self.auth.use_agent.unwrap_or(defaults.use_agent),
            agent_socket: self.auth.agent_socket.clone(),
            key_file: self.auth.key_file.clone(),
            passphrase: self.auth.passphrase.clone(),
            token_path: self.auth.token_path.clone(),
            rpc_timeout: self.auth.rpc_timeout.unwrap_or(defaults.rpc_timeout),
            ..defaults
        }
    }

    /// Build validated client options. `interactive` installs the stdin
    /// trust prompt.
    pub fn client_options(&self, interactive: bool) -> Result<ClientOptions, LinkctlError> {
        let mut builder = ClientOptions::builder()
            .with_dial_mode(if self.race {
                DialMode::Racing
            } else {
                DialMode::Sequential
            })
            .with_log_calls(self.log_calls)
            .with_auth(self.auth_options());

        for target in self.targets()? {
            builder = builder.with_target(target);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.with_timeout(timeout);
        }
        if let Some(retries) = self.retries {
            builder = builder.with_retries(retries);
        }
        if let Some(seed) = self.backoff_seed {
            builder = builder.with_backoff_seed(seed);
        }
        if let Some(size) = self.pool_size {
            builder = builder.with_pool_size(size);
        }

        let mut tls = TlsOptions {
            enabled: self.tls.enabled.unwrap_or(true),
            ca_file: self.tls.ca_file.clone(),
            server_name: self.tls.server_name.clone(),
            skip_verify: self.tls.skip_verify,
            auto_trust: self.tls.auto_trust,
            trust_store: None,
        };
        if tls.skip_verify {
            warn!("Certificate verification is disabled; the daemon's identity will not be checked");
        } else if tls.enabled {
            tls.trust_store = Some(Arc::new(self.open_trust_store()?));
        }
        builder = builder.with_tls(tls);

        if interactive {
            builder = builder.with_tofu_callback(confirm_on_terminal);
        }

        Ok(builder.build()?)
    }
}
