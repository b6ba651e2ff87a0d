//! Trust commands: inspect and remove pinned daemon certificates.

use crate::config::LinkctlConfig;
use crate::error::LinkctlError;

use link_core::{ClientError, TrustStore};

use std::io::{Write, stdout};
use std::time::{Duration, UNIX_EPOCH};

use humantime::format_rfc3339_seconds;
use log::info;

pub fn list(config: &LinkctlConfig) -> Result<(), LinkctlError> {
    let store = config.open_trust_store()?;
    write_list(&store, &mut stdout().lock())
}

pub fn forget(config: &LinkctlConfig, identity: &str) -> Result<(), LinkctlError> {
    let store = config.open_trust_store()?;
    forget_in(&store, identity)?;
    println!("Forgot the pinned certificate for '{identity}'.");
    Ok(())
}

/// One line per pin, sorted by identity.
pub fn write_list(store: &TrustStore, out: &mut impl Write) -> Result<(), LinkctlError> {
    let records = store.list().map_err(ClientError::from)?;
    let write_error = |e: std::io::Error| LinkctlError::linkctl(format!("Failed to write output: {e}"));

    if records.is_empty() {
        writeln!(out, "No pinned daemons in {}.", store.dir().display()).map_err(write_error)?;
        return Ok(());
    }

    for record in records {
        let first_seen = format_rfc3339_seconds(UNIX_EPOCH + Duration::from_secs(record.first_seen));
        writeln!(
            out,
            "{}\t{}\t{}\t{first_seen}",
            record.identity, record.address, record.fingerprint
        )
        .map_err(write_error)?;
    }
    Ok(())
}

/// Remove one pin; an unknown identity is an error so typos do not pass silently.
pub fn forget_in(store: &TrustStore, identity: &str) -> Result<(), LinkctlError> {
    if store.forget(identity).map_err(ClientError::from)? {
        info!("Removed trust pin for '{identity}'");
        Ok(())
    } else {
        Err(LinkctlError::linkctl(format!(
            "No pinned certificate for '{identity}'"
        )))
    }
}
