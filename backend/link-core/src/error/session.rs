use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SessionCacheError {
    #[error("Session Cache IO Error: {path}: {source} {location}")]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
        location: ErrorLocation,
    },

    /// The token file exists but does not authenticate under the derived key.
    #[error("Session Decrypt Error: {path}: {message} {location}")]
    Decrypt {
        path: PathBuf,
        message: String,
        location: ErrorLocation,
    },

    #[error("Session Encrypt Error: {message} {location}")]
    Encrypt {
        message: String,
        location: ErrorLocation,
    },

    #[error("Session Cache Timeout Error: {path} after {timeout:?} {location}")]
    Timeout {
        path: PathBuf,
        timeout: Duration,
        location: ErrorLocation,
    },
}

impl SessionCacheError {
    #[track_caller]
    pub fn io(path: impl Into<PathBuf>, source: IoError) -> Self {
        SessionCacheError::Io {
            path: path.into(),
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn decrypt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SessionCacheError::Decrypt {
            path: path.into(),
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn timeout(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        SessionCacheError::Timeout {
            path: path.into(),
            timeout,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
