pub mod builder;

use serde::{Deserialize, Serialize};

/// Prefix every pinned fingerprint carries.
pub const FINGERPRINT_PREFIX: &str = "SHA256:";

/// A pinned daemon certificate, one per peer identity.
///
/// Created on the first trust-on-first-use decision and consulted on every
/// later TLS connection that presents the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub identity: String,
    pub address: String,
    pub fingerprint: String,
    /// Seconds since the Unix epoch.
    pub first_seen: u64,
}

impl TrustRecord {
    pub fn matches(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }
}
