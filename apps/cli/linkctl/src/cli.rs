//! Command-line surface. Every connection flag can also come from a
//! `LINKCTL_*` environment variable (or a `.env` file) and falls back to
//! `linkctl.toml`.

use crate::commands;
use crate::config::LinkctlConfig;
use crate::error::LinkctlError;

use common::RedactedToken;
use models::Target;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// linkctl - talk to a linkd daemon
#[derive(Parser, Debug)]
#[command(name = "linkctl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides for `linkctl.toml`.
#[derive(Args, Debug, Default, Clone)]
pub struct ConnectionArgs {
    /// Config file (default: <config dir>/linkctl/linkctl.toml)
    #[arg(long, global = true, env = "LINKCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Daemon target: unix:<path>, pipe:<path>, p2p:<peer-id> or host:port. Repeatable.
    #[arg(long = "target", global = true, env = "LINKCTL_TARGET", value_delimiter = ',', value_parser = parse_target_arg)]
    pub targets: Vec<Target>,

    /// Dial every target at once instead of in priority order
    #[arg(long, global = true, env = "LINKCTL_RACE")]
    pub race: bool,

    /// Per-target dial deadline, e.g. "5s" or "1m"
    #[arg(long, global = true, env = "LINKCTL_TIMEOUT", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Disable TLS for network targets
    #[arg(long, global = true, env = "LINKCTL_NO_TLS")]
    pub no_tls: bool,

    /// Pin a daemon's certificate on first contact without asking
    #[arg(long, global = true, env = "LINKCTL_AUTO_TRUST")]
    pub auto_trust: bool,

    /// DANGEROUS: accept any certificate and bypass the trust store
    #[arg(long, global = true, env = "LINKCTL_INSECURE_SKIP_VERIFY")]
    pub insecure_skip_verify: bool,

    /// SSH private key to authenticate with
    #[arg(long, global = true, env = "LINKCTL_KEY_FILE")]
    pub key_file: Option<PathBuf>,

    /// Passphrase for an encrypted key file
    #[arg(long, global = true, env = "LINKCTL_KEY_PASSPHRASE", hide_env_values = true, value_parser = parse_secret)]
    pub key_passphrase: Option<RedactedToken>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

fn parse_target_arg(value: &str) -> Result<Target, String> {
    link_core::dial::parse_target(value).map_err(|e| e.to_string())
}

fn parse_secret(value: &str) -> Result<RedactedToken, String> {
    Ok(RedactedToken::new(value))
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show which daemon is reachable and whether the session is valid
    Status,

    /// Authenticate with an SSH key and cache the session
    Login,

    /// Forget the cached session
    Logout,

    /// Inspect or edit pinned daemon certificates
    #[command(subcommand)]
    Trust(TrustCommands),
}

#[derive(Subcommand, Debug)]
pub enum TrustCommands {
    /// List pinned daemons
    List,

    /// Remove the pin for one daemon identity
    Forget {
        /// Identity as shown by `trust list`
        identity: String,
    },
}

impl Cli {
    /// Run the command against the loaded configuration.
    pub async fn run(self, config: LinkctlConfig) -> Result<(), LinkctlError> {
        match self.command {
            Commands::Status => commands::status::run(&config).await,
            Commands::Login => commands::login::run(&config).await,
            Commands::Logout => commands::logout::run(&config).await,
            Commands::Trust(TrustCommands::List) => commands::trust::list(&config),
            Commands::Trust(TrustCommands::Forget { identity }) => {
                commands::trust::forget(&config, &identity)
            }
        }
    }
}
