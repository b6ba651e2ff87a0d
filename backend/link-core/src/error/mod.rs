pub mod client;
pub mod pool;
pub mod session;
pub mod signer;
pub mod trust;

pub use client::ClientError;
pub use pool::PoolError;
pub use session::SessionCacheError;
pub use signer::SignerError;
pub use trust::TrustStoreError;
