//! Shared primitives for the link workspace.
//!
//! This crate holds the small building blocks every other crate leans on.
//! It has no knowledge of transports, daemons or authentication.
//!
//! ## Architecture
//!
//! - **common** (this crate): Error locations and secret handling
//! - **models**: Pure data (targets, trust records)
//! - **link-core**: Connection, trust and authentication logic
//! - **linkctl**: Command-line wiring that feeds configuration into link-core

pub mod error;
pub mod redacted_token;


pub use error::error_location::ErrorLocation;
pub use error::redact_error::RedactError;
pub use redacted_token::RedactedToken;
