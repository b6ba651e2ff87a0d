use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SignerError {
    #[error("Key File Error: {path}: {message} {location}")]
    KeyFile {
        path: PathBuf,
        message: String,
        location: ErrorLocation,
    },

    #[error("Sign Error: {message} {location}")]
    Sign {
        message: String,
        location: ErrorLocation,
    },

    #[error("Agent Error: {message} {location}")]
    Agent {
        message: String,
        location: ErrorLocation,
    },

    #[error("Agent IO Error: {source} {location}")]
    AgentIo {
        #[source]
        source: IoError,
        location: ErrorLocation,
    },

    #[error("Key Encoding Error: {message} {location}")]
    Encoding {
        message: String,
        location: ErrorLocation,
    },
}

impl SignerError {
    #[track_caller]
    pub fn key_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SignerError::KeyFile {
            path: path.into(),
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn sign(message: impl Into<String>) -> Self {
        SignerError::Sign {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn agent(message: impl Into<String>) -> Self {
        SignerError::Agent {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<IoError> for SignerError {
    #[track_caller]
    fn from(source: IoError) -> Self {
        SignerError::AgentIo {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ssh_encoding::Error> for SignerError {
    #[track_caller]
    fn from(error: ssh_encoding::Error) -> Self {
        SignerError::Encoding {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<ssh_key::Error> for SignerError {
    #[track_caller]
    fn from(error: ssh_key::Error) -> Self {
        SignerError::Encoding {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
