//! Caller-facing error for every `link-core` operation.
//!
//! Key design decisions:
//! - `kind()` maps every variant onto the fixed [`ErrorKind`] taxonomy
//! - RPC failures keep their status code; only the classifier reads it
//! - All variants include ErrorLocation via `#[track_caller]`

use crate::classify::{ErrorKind, classify_code, is_retryable_code};
use crate::error::{PoolError, SessionCacheError, SignerError, TrustStoreError};
use crate::trust::tofu::TrustRejection;

use common::ErrorLocation;
use models::ModelError;

use std::error::Error as StdError;
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error as ThisError;
use tonic::{Code, Status};

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error("Not Connected Error: {message} {location}")]
    NotConnected {
        message: String,
        location: ErrorLocation,
    },

    #[error("Not Authenticated Error: {message} {location}")]
    NotAuthenticated {
        message: String,
        location: ErrorLocation,
    },

    #[error("Connection Failed Error: {target}: {message} {location}")]
    ConnectionFailed {
        target: String,
        message: String,
        location: ErrorLocation,
    },

    #[error(
        "Trust Mismatch Error: certificate for '{identity}' at {address} changed (pinned {pinned}, presented {presented}); possible man-in-the-middle {location}"
    )]
    TrustMismatch {
        identity: String,
        address: String,
        pinned: String,
        presented: String,
        location: ErrorLocation,
    },

    #[error("Trust Rejected Error: '{identity}' at {address}: {message} {location}")]
    TrustRejected {
        identity: String,
        address: String,
        message: String,
        location: ErrorLocation,
    },

    #[error("Not Implemented Error: {message} {location}")]
    NotImplemented {
        message: String,
        location: ErrorLocation,
    },

    #[error("Cancelled Error: {message} {location}")]
    Cancelled {
        message: String,
        location: ErrorLocation,
    },

    #[error("Authentication Failed Error: {message} {location}")]
    AuthenticationFailed {
        message: String,
        location: ErrorLocation,
    },

    #[error("No Signing Keys Error: {message} {location}")]
    NoSigningKeys {
        message: String,
        location: ErrorLocation,
    },

    #[error("Session Decrypt Error: {path}: {message} {location}")]
    SessionDecrypt {
        path: PathBuf,
        message: String,
        location: ErrorLocation,
    },

    #[error("Session Cache Error: {message} {location}")]
    SessionCache {
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid Argument Error: {message} {location}")]
    InvalidArgument {
        message: String,
        location: ErrorLocation,
    },

    #[error("RPC Error: {kind} ({code:?}): {message} {location}")]
    Rpc {
        kind: ErrorKind,
        code: Code,
        message: String,
        location: ErrorLocation,
    },

    #[error("Internal Error: {message} {location}")]
    Internal {
        message: String,
        location: ErrorLocation,
    },
}

impl ClientError {
    #[track_caller]
    pub fn not_connected(message: impl Into<String>) -> Self {
        ClientError::NotConnected {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn not_authenticated(message: impl Into<String>) -> Self {
        ClientError::NotAuthenticated {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn connection_failed(target: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::ConnectionFailed {
            target: target.into(),
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        ClientError::NotImplemented {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn cancelled(message: impl Into<String>) -> Self {
        ClientError::Cancelled {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        ClientError::AuthenticationFailed {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn no_signing_keys(message: impl Into<String>) -> Self {
        ClientError::NoSigningKeys {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ClientError::InvalidArgument {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        ClientError::Internal {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn rpc(code: Code, message: impl Into<String>) -> Self {
        ClientError::Rpc {
            kind: classify_code(code),
            code,
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotConnected { .. } => ErrorKind::NotConnected,
            ClientError::NotAuthenticated { .. } => ErrorKind::NotAuthenticated,
            ClientError::ConnectionFailed { .. }
            | ClientError::TrustMismatch { .. }
            | ClientError::TrustRejected { .. }
            | ClientError::NotImplemented { .. } => ErrorKind::ConnectionFailed,
            ClientError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            ClientError::NoSigningKeys { .. } => ErrorKind::NoSigningKeys,
            ClientError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            ClientError::Rpc { kind, .. } => *kind,
            ClientError::Cancelled { .. }
            | ClientError::SessionDecrypt { .. }
            | ClientError::SessionCache { .. }
            | ClientError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Retry only at call initiation, and only for transient RPC status codes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Rpc { code, .. } => is_retryable_code(*code),
            _ => false,
        }
    }

    /// Raw status code, when the error came from the wire.
    pub fn code(&self) -> Option<Code> {
        match self {
            ClientError::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Trust failures are never retried by the dialer.
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            ClientError::TrustMismatch { .. } | ClientError::TrustRejected { .. }
        )
    }
}

/// Flatten an error and its `source()` chain into one line.
pub(crate) fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

impl From<Status> for ClientError {
    #[track_caller]
    fn from(status: Status) -> Self {
        let from_empty_pool = status
            .source()
            .and_then(|source| source.downcast_ref::<PoolError>())
            .is_some();

        if from_empty_pool {
            return ClientError::not_connected("no connected channel; call connect first");
        }

        ClientError::rpc(status.code(), status.message())
    }
}

impl From<TrustRejection> for ClientError {
    #[track_caller]
    fn from(rejection: TrustRejection) -> Self {
        let location = ErrorLocation::from(Location::caller());
        match rejection {
            TrustRejection::Mismatch {
                identity,
                address,
                pinned,
                presented,
            } => ClientError::TrustMismatch {
                identity,
                address,
                pinned,
                presented,
                location,
            },
            TrustRejection::Unconfirmed {
                identity,
                address,
                fingerprint,
            } => ClientError::TrustRejected {
                identity,
                address,
                message: format!(
                    "first contact with fingerprint {fingerprint} needs confirmation and no prompt is configured"
                ),
                location,
            },
            TrustRejection::Declined {
                identity,
                address,
                fingerprint,
            } => ClientError::TrustRejected {
                identity,
                address,
                message: format!("certificate {fingerprint} was not trusted"),
                location,
            },
        }
    }
}

impl From<SessionCacheError> for ClientError {
    #[track_caller]
    fn from(error: SessionCacheError) -> Self {
        let location = ErrorLocation::from(Location::caller());
        match error {
            SessionCacheError::Decrypt { path, message, .. } => ClientError::SessionDecrypt {
                path,
                message,
                location,
            },
            other => ClientError::SessionCache {
                message: other.to_string(),
                location,
            },
        }
    }
}

impl From<TrustStoreError> for ClientError {
    #[track_caller]
    fn from(error: TrustStoreError) -> Self {
        ClientError::internal(error.to_string())
    }
}

impl From<SignerError> for ClientError {
    #[track_caller]
    fn from(error: SignerError) -> Self {
        ClientError::authentication_failed(error.to_string())
    }
}

impl From<ModelError> for ClientError {
    #[track_caller]
    fn from(error: ModelError) -> Self {
        ClientError::invalid_argument(error.to_string())
    }
}
