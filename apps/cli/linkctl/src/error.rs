use link_core::{ClientError, ErrorKind};

use common::ErrorLocation;

use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error;

/// Errors loading `linkctl.toml` or applying overrides.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config Read Error: {path}: {message} {location}")]
    Read {
        path: PathBuf,
        message: String,
        location: ErrorLocation,
    },

    #[error("Config Parse Error: {path}: {message} {location}")]
    Parse {
        path: PathBuf,
        message: String,
        location: ErrorLocation,
    },

    #[error("Config Invalid Error: {field}: {message} {location}")]
    Invalid {
        field: String,
        message: String,
        location: ErrorLocation,
    },
}

impl ConfigError {
    #[track_caller]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

/// Everything a `linkctl` command can fail with.
#[derive(Debug, Error)]
pub enum LinkctlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// Error from this App
    #[error("Linkctl Error: {message} {location}")]
    Linkctl {
        message: String,
        location: ErrorLocation,
    },
}

impl LinkctlError {
    #[track_caller]
    pub fn linkctl(message: impl Into<String>) -> Self {
        LinkctlError::Linkctl {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// Process exit status, grouped so scripts can branch on the failure.
    ///
    /// `2` daemon unreachable, `3` authentication, `4` trust, `1` everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            LinkctlError::Client(e) if e.is_trust_failure() => 4,
            LinkctlError::Client(e) => match e.kind() {
                ErrorKind::NotConnected | ErrorKind::ConnectionFailed | ErrorKind::Unavailable => 2,
                ErrorKind::NotAuthenticated
                | ErrorKind::AuthenticationFailed
                | ErrorKind::SessionExpired
                | ErrorKind::NoSigningKeys
                | ErrorKind::PermissionDenied => 3,
                _ => 1,
            },
            _ => 1,
        }
    }
}
