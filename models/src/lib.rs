//! Domain models for the daemon link.
//!
//! Pure data structures passed between layers. Models carry validation but
//! no I/O: resolving, dialing and persisting live in `link-core`.

pub mod error;
pub mod target;
pub mod trust_record;

#[cfg(test)]
mod tests;

pub use common::ErrorLocation;
pub use error::model_error::ModelError;
pub use target::{Target, TargetKind};
pub use trust_record::TrustRecord;
pub use trust_record::builder::TrustRecordBuilder;
