//! Login command: force a fresh SSH-key handshake and cache the session.

use crate::config::LinkctlConfig;
use crate::error::LinkctlError;

use link_core::LinkClient;

use log::info;

pub async fn run(config: &LinkctlConfig) -> Result<(), LinkctlError> {
    let client = LinkClient::new(config.client_options(super::is_interactive())?);
    client.connect().await?;
    client.authenticate().await?;

    let target = client
        .connected_target()
        .map(|target| target.to_string())
        .unwrap_or_default();
    info!("Session established with {target}");
    println!("Logged in to {target}.");

    client.close().await;
    Ok(())
}
