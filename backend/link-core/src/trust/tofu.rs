//! Trust-on-first-use policy.
//!
//! The policy is consulted in two phases. During the TLS handshake,
//! [`TofuPolicy::evaluate`] decides from the store alone: a matching pin is
//! accepted, a missing pin is auto-pinned (when configured) or deferred, and a
//! changed pin is deferred or rejected. Deferred prompts are answered outside
//! the handshake by the caller's [`TofuCallback`] and applied with
//! [`TofuPolicy::resolve`].

use crate::error::TrustStoreError;
use crate::trust::store::{PinOutcome, TrustStore};

use models::{TrustRecord, TrustRecordBuilder};

use std::fmt::{Debug, Display, Formatter, Result as FormatResult};
use std::sync::Arc;

use log::{debug, error, info, warn};

/// Asked of the user (or a policy) when the store alone cannot decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TofuPrompt {
    FirstContact {
        identity: String,
        address: String,
        fingerprint: String,
    },
    Mismatch {
        identity: String,
        address: String,
        pinned: String,
        presented: String,
    },
}

impl TofuPrompt {
    pub fn identity(&self) -> &str {
        match self {
            TofuPrompt::FirstContact { identity, .. } | TofuPrompt::Mismatch { identity, .. } => {
                identity
            }
        }
    }

    pub fn address(&self) -> &str {
        match self {
            TofuPrompt::FirstContact { address, .. } | TofuPrompt::Mismatch { address, .. } => {
                address
            }
        }
    }

    /// The fingerprint the peer presented on this connection.
    pub fn presented(&self) -> &str {
        match self {
            TofuPrompt::FirstContact { fingerprint, .. } => fingerprint,
            TofuPrompt::Mismatch { presented, .. } => presented,
        }
    }
}

impl Display for TofuPrompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            TofuPrompt::FirstContact {
                identity,
                address,
                fingerprint,
            } => write!(
                f,
                "First connection to '{identity}' at {address}.\nCertificate fingerprint: {fingerprint}"
            ),
            TofuPrompt::Mismatch {
                identity,
                address,
                pinned,
                presented,
            } => write!(
                f,
                "WARNING: the certificate for '{identity}' at {address} has CHANGED.\n\
                 Pinned:    {pinned}\n\
                 Presented: {presented}\n\
                 Someone may be intercepting this connection."
            ),
        }
    }
}

/// `Accept` only means something on first contact. Only `Repin` resolves a mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TofuDecision {
    Accept,
    Repin,
    Reject,
}

/// Invoked off the async runtime; may block on user input.
pub type TofuCallback = Arc<dyn Fn(&TofuPrompt) -> TofuDecision + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustRejection {
    Mismatch {
        identity: String,
        address: String,
        pinned: String,
        presented: String,
    },
    /// First contact, auto-trust off, and nobody to ask.
    Unconfirmed {
        identity: String,
        address: String,
        fingerprint: String,
    },
    Declined {
        identity: String,
        address: String,
        fingerprint: String,
    },
}

impl Display for TrustRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            TrustRejection::Mismatch {
                identity,
                pinned,
                presented,
                ..
            } => write!(
                f,
                "certificate for '{identity}' changed: pinned {pinned}, presented {presented}"
            ),
            TrustRejection::Unconfirmed {
                identity,
                fingerprint,
                ..
            } => write!(f, "unconfirmed first contact with '{identity}' ({fingerprint})"),
            TrustRejection::Declined {
                identity,
                fingerprint,
                ..
            } => write!(f, "certificate for '{identity}' ({fingerprint}) was declined"),
        }
    }
}

/// Handshake-time verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TofuOutcome {
    Accepted,
    NeedsConfirmation(TofuPrompt),
    Rejected(TrustRejection),
}

/// Result of applying a caller's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TofuResolution {
    Pinned,
    Repinned,
    Rejected(TrustRejection),
}

#[derive(Clone)]
pub struct TofuPolicy {
    store: Arc<TrustStore>,
    auto_trust: bool,
    interactive: bool,
}

impl Debug for TofuPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("TofuPolicy")
            .field("store", &self.store.dir())
            .field("auto_trust", &self.auto_trust)
            .field("interactive", &self.interactive)
            .finish()
    }
}

impl TofuPolicy {
    /// `interactive` means a callback exists to answer deferred prompts.
    pub fn new(store: Arc<TrustStore>, auto_trust: bool, interactive: bool) -> Self {
        Self {
            store,
            auto_trust,
            interactive,
        }
    }

    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }

    pub fn evaluate(
        &self,
        identity: &str,
        address: &str,
        presented: &str,
    ) -> Result<TofuOutcome, TrustStoreError> {
        match self.store.get(identity)? {
            Some(record) if record.matches(presented) => {
                debug!("Certificate for '{identity}' matches pinned {presented}");
                Ok(TofuOutcome::Accepted)
            }
            Some(record) => Ok(self.mismatch(identity, address, record.fingerprint, presented)),
            None => self.first_contact(identity, address, presented),
        }
    }

    pub fn resolve(
        &self,
        prompt: &TofuPrompt,
        decision: TofuDecision,
    ) -> Result<TofuResolution, TrustStoreError> {
        match (prompt, decision) {
            (
                TofuPrompt::FirstContact {
                    identity,
                    address,
                    fingerprint,
                },
                TofuDecision::Accept | TofuDecision::Repin,
            ) => {
                let record = new_record(identity, address, fingerprint)?;
                match self.store.pin_new(&record)? {
                    PinOutcome::Created => Ok(TofuResolution::Pinned),
                    PinOutcome::AlreadyPinned(existing) if existing.matches(fingerprint) => {
                        Ok(TofuResolution::Pinned)
                    }
                    PinOutcome::AlreadyPinned(existing) => {
                        error!(
                            "'{identity}' was pinned to {} while confirming {fingerprint}",
                            existing.fingerprint
                        );
                        Ok(TofuResolution::Rejected(TrustRejection::Mismatch {
                            identity: identity.clone(),
                            address: address.clone(),
                            pinned: existing.fingerprint,
                            presented: fingerprint.clone(),
                        }))
                    }
                }
            }
            (
                TofuPrompt::FirstContact {
                    identity,
                    address,
                    fingerprint,
                },
                TofuDecision::Reject,
            ) => {
                info!("Declined first contact with '{identity}'");
                Ok(TofuResolution::Rejected(TrustRejection::Declined {
                    identity: identity.clone(),
                    address: address.clone(),
                    fingerprint: fingerprint.clone(),
                }))
            }
            (
                TofuPrompt::Mismatch {
                    identity,
                    address,
                    pinned,
                    presented,
                },
                TofuDecision::Repin,
            ) => {
                let record = new_record(identity, address, presented)?;
                self.store.repin(&record, pinned)?;
                Ok(TofuResolution::Repinned)
            }
            (
                TofuPrompt::Mismatch {
                    identity,
                    address,
                    pinned,
                    presented,
                },
                TofuDecision::Accept | TofuDecision::Reject,
            ) => Ok(TofuResolution::Rejected(TrustRejection::Mismatch {
                identity: identity.clone(),
                address: address.clone(),
                pinned: pinned.clone(),
                presented: presented.clone(),
            })),
        }
    }

    /// No pin for `identity`. Auto-trust applies only when the address is not
    /// already pinned under another identity.
    fn first_contact(
        &self,
        identity: &str,
        address: &str,
        presented: &str,
    ) -> Result<TofuOutcome, TrustStoreError> {
        let others = self.store.pinned_at(address, identity)?;

        if self.auto_trust && others.is_empty() {
            let record = new_record(identity, address, presented)?;
            return match self.store.pin_new(&record)? {
                PinOutcome::Created => {
                    info!("Auto-trusted '{identity}' at {address} ({presented})");
                    Ok(TofuOutcome::Accepted)
                }
                PinOutcome::AlreadyPinned(existing) if existing.matches(presented) => {
                    Ok(TofuOutcome::Accepted)
                }
                PinOutcome::AlreadyPinned(existing) => {
                    Ok(self.mismatch(identity, address, existing.fingerprint, presented))
                }
            };
        }

        for other in &others {
            warn!(
                "{address} presents new identity '{identity}' ({presented}) but is pinned as '{}' ({}); \
                 not trusting it automatically",
                other.identity, other.fingerprint
            );
        }

        if self.interactive {
            info!("First contact with '{identity}' at {address}, asking for confirmation");
            Ok(TofuOutcome::NeedsConfirmation(TofuPrompt::FirstContact {
                identity: identity.to_string(),
                address: address.to_string(),
                fingerprint: presented.to_string(),
            }))
        } else {
            warn!("First contact with '{identity}' at {address} and no way to confirm it");
            Ok(TofuOutcome::Rejected(TrustRejection::Unconfirmed {
                identity: identity.to_string(),
                address: address.to_string(),
                fingerprint: presented.to_string(),
            }))
        }
    }

    fn mismatch(
        &self,
        identity: &str,
        address: &str,
        pinned: String,
        presented: &str,
    ) -> TofuOutcome {
        error!(
            "Certificate for '{identity}' at {address} does not match the pinned certificate: \
             pinned {pinned}, presented {presented}. This may be a man-in-the-middle attack."
        );

        if self.interactive {
            TofuOutcome::NeedsConfirmation(TofuPrompt::Mismatch {
                identity: identity.to_string(),
                address: address.to_string(),
                pinned,
                presented: presented.to_string(),
            })
        } else {
            TofuOutcome::Rejected(TrustRejection::Mismatch {
                identity: identity.to_string(),
                address: address.to_string(),
                pinned,
                presented: presented.to_string(),
            })
        }
    }
}

fn new_record(
    identity: &str,
    address: &str,
    fingerprint: &str,
) -> Result<TrustRecord, TrustStoreError> {
    Ok(TrustRecordBuilder::default()
        .with_identity(identity)
        .with_address(address)
        .with_fingerprint(fingerprint)
        .build()?)
}
