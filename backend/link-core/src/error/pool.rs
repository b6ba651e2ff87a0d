use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

/// Raised by the pooled dispatcher. Travels through tonic as the source of a
/// `Status` and is recognised again by [`ClientError::from`](crate::ClientError).
#[derive(Debug, ThisError)]
pub enum PoolError {
    #[error("Pool Empty Error: no connected channel {location}")]
    Empty { location: ErrorLocation },
}

impl PoolError {
    #[track_caller]
    pub fn empty() -> Self {
        PoolError::Empty {
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
