//! Logout command: forget the cached session. No daemon connection is needed.

use crate::config::LinkctlConfig;
use crate::error::LinkctlError;

use link_core::auth::Authenticator;
use link_core::auth::session::SessionState;

use std::sync::Arc;

pub async fn run(config: &LinkctlConfig) -> Result<(), LinkctlError> {
    let authenticator = Authenticator::new(config.auth_options(), Arc::new(SessionState::new()));
    let path = authenticator.cache().await.path().to_path_buf();
    let existed = path.exists();

    authenticator.clear_session().await?;

    if existed {
        println!("Logged out. Removed {}.", path.display());
    } else {
        println!("Already logged out (no cached session).");
    }
    Ok(())
}
