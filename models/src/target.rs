//! Dial targets and their textual address forms.
//!
//! Accepted forms:
//! - `unix:<path>` / `pipe:<path>` - platform local transport (never TLS)
//! - `host:port` - network transport (TLS by default)
//! - `p2p:<peer-id>` - overlay transport

use crate::error::model_error::ModelError;
use crate::ErrorLocation;

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::panic::Location;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const UNIX_PREFIX: &str = "unix:";
const PIPE_PREFIX: &str = "pipe:";
const P2P_PREFIX: &str = "p2p:";

/// Transport kind of a target, in dial priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKind {
    /// Unix domain socket or Windows named pipe.
    LocalSocket,
    /// `host:port` reachable over TCP.
    NetworkAddress,
    /// Overlay network peer identifier.
    OverlayPeer,
}

impl TargetKind {
    /// Lower is tried first.
    pub fn priority(self) -> u8 {
        match self {
            TargetKind::LocalSocket => 0,
            TargetKind::NetworkAddress => 1,
            TargetKind::OverlayPeer => 2,
        }
    }
}

impl Display for TargetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            TargetKind::LocalSocket => write!(f, "local-socket"),
            TargetKind::NetworkAddress => write!(f, "network-address"),
            TargetKind::OverlayPeer => write!(f, "overlay-peer"),
        }
    }
}

/// A resolved place to dial. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    kind: TargetKind,
    address: String,
}

impl Target {
    pub fn local_socket(path: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::LocalSocket,
            address: path.into(),
        }
    }

    pub fn network(address: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::NetworkAddress,
            address: address.into(),
        }
    }

    pub fn overlay_peer(peer_id: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::OverlayPeer,
            address: peer_id.into(),
        }
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Local transports are already confined to the machine and never use TLS.
    pub fn uses_tls_by_default(&self) -> bool {
        self.kind != TargetKind::LocalSocket
    }

    /// Host part of a network address, without port or IPv6 brackets.
    pub fn host(&self) -> Option<&str> {
        if self.kind != TargetKind::NetworkAddress {
            return None;
        }

        let (host, _) = self.address.rsplit_once(':')?;
        Some(host.trim_start_matches('[').trim_end_matches(']'))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self.kind {
            TargetKind::LocalSocket if cfg!(windows) => write!(f, "{PIPE_PREFIX}{}", self.address),
            TargetKind::LocalSocket => write!(f, "{UNIX_PREFIX}{}", self.address),
            TargetKind::NetworkAddress => write!(f, "{}", self.address),
            TargetKind::OverlayPeer => write!(f, "{P2P_PREFIX}{}", self.address),
        }
    }
}

impl FromStr for Target {
    type Err = ModelError;

    #[track_caller]
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();

        if let Some(path) = value
            .strip_prefix(UNIX_PREFIX)
            .or_else(|| value.strip_prefix(PIPE_PREFIX))
        {
            if path.is_empty() {
                return Err(ModelError::Validation {
                    message: format!("Local socket target has an empty path: {value}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            return Ok(Target::local_socket(path));
        }

        if let Some(peer_id) = value.strip_prefix(P2P_PREFIX) {
            if peer_id.is_empty() {
                return Err(ModelError::Validation {
                    message: format!("Overlay target has an empty peer id: {value}"),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            return Ok(Target::overlay_peer(peer_id));
        }

        if value.contains("://") {
            return Err(ModelError::Validation {
                message: format!("Network target must be host:port, not a URL: {value}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let (host, port) = value.rsplit_once(':').ok_or_else(|| ModelError::Validation {
            message: format!("Network target is missing a port: {value}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ModelError::Validation {
                message: format!("Network target has an empty host: {value}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if port.parse::<u16>().map(|p| p == 0).unwrap_or(true) {
            return Err(ModelError::Validation {
                message: format!("Network target has an invalid port: {value}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        Ok(Target::network(value))
    }
}
