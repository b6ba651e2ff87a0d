use common::ErrorLocation;
use models::ModelError;

use std::io::Error as IoError;
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum TrustStoreError {
    #[error("Trust Store IO Error: {path}: {source} {location}")]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
        location: ErrorLocation,
    },

    #[error("Trust Store Parse Error: {path}: {reason} {location}")]
    Parse {
        path: PathBuf,
        reason: String,
        location: ErrorLocation,
    },

    #[error(
        "Trust Store Conflict Error: '{identity}' is pinned to {found}, expected {expected} {location}"
    )]
    Conflict {
        identity: String,
        expected: String,
        found: String,
        location: ErrorLocation,
    },

    #[error("Trust Store Record Error: {message} {location}")]
    Record {
        message: String,
        location: ErrorLocation,
    },
}

impl TrustStoreError {
    #[track_caller]
    pub fn io(path: impl Into<PathBuf>, source: IoError) -> Self {
        TrustStoreError::Io {
            path: path.into(),
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TrustStoreError::Parse {
            path: path.into(),
            reason: reason.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ModelError> for TrustStoreError {
    #[track_caller]
    fn from(error: ModelError) -> Self {
        TrustStoreError::Record {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
