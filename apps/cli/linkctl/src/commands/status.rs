//! Status command: which daemon answered, and whether the cached session is
//! still accepted. Never starts a new handshake.

use crate::config::LinkctlConfig;
use crate::error::LinkctlError;

use link_core::{ErrorKind, LinkClient};

use log::debug;

pub async fn run(config: &LinkctlConfig) -> Result<(), LinkctlError> {
    let mut config = config.clone();
    config.auth.auto_auth = Some(false);

    let client = LinkClient::new(config.client_options(super::is_interactive())?);
    client.connect().await?;

    let target = client
        .connected_target()
        .ok_or_else(|| LinkctlError::linkctl("connected without a target"))?;
    println!("Daemon:  {target} ({} channel(s))", client.pool_size());

    match client.ensure_authenticated().await {
        Ok(_) => println!("Session: valid"),
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::NotAuthenticated | ErrorKind::SessionExpired | ErrorKind::PermissionDenied
            ) =>
        {
            debug!("No usable session: {e}");
            println!("Session: none (run `linkctl login`)");
        }
        Err(e) => return Err(e.into()),
    }

    client.close().await;
    Ok(())
}
