use crate::error::model_error::ModelError;
use crate::trust_record::FINGERPRINT_PREFIX;
use crate::{ErrorLocation, TrustRecord};

use std::panic::Location;
use std::time::{SystemTime, UNIX_EPOCH};

/// Builder for creating validated TrustRecord instances.
///
/// `first_seen` defaults to the current time when not supplied.
#[derive(Debug, Default)]
pub struct TrustRecordBuilder {
    identity: Option<String>,
    address: Option<String>,
    fingerprint: Option<String>,
    first_seen: Option<u64>,
}

impl TrustRecordBuilder {
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_first_seen(mut self, unix_secs: u64) -> Self {
        self.first_seen = Some(unix_secs);
        self
    }

    /// Build the TrustRecord with validation.
    #[track_caller]
    pub fn build(self) -> Result<TrustRecord, ModelError> {
        let identity = self.identity.ok_or_else(|| ModelError::Validation {
            message: String::from("Identity is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if identity.trim().is_empty() {
            return Err(ModelError::Validation {
                message: String::from("Identity cannot be empty"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let address = self.address.ok_or_else(|| ModelError::Validation {
            message: String::from("Address is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let fingerprint = self.fingerprint.ok_or_else(|| ModelError::Validation {
            message: String::from("Fingerprint is required"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let digest = fingerprint.strip_prefix(FINGERPRINT_PREFIX).ok_or_else(|| {
            ModelError::Validation {
                message: format!("Invalid fingerprint format: {fingerprint}"),
                location: ErrorLocation::from(Location::caller()),
            }
        })?;

        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ModelError::Validation {
                message: format!("Invalid fingerprint format: {fingerprint}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let first_seen = self.first_seen.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default()
        });

        Ok(TrustRecord {
            identity,
            address,
            fingerprint,
            first_seen,
        })
    }
}
