//! On-disk pinned certificates, one JSON file per peer identity.
//!
//! First pins use create-new semantics so that two writers racing on the same
//! identity cannot both succeed; the loser sees [`PinOutcome::AlreadyPinned`]
//! and compares. Re-pins replace atomically (temp file + rename) and only if
//! the record on disk is still the one the caller was shown.

use crate::error::TrustStoreError;

use common::ErrorLocation;
use models::TrustRecord;

use std::fs;
use std::io::{ErrorKind, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

const RECORD_EXTENSION: &str = "json";
const MAX_STEM_LEN: usize = 64;
const HASH_SUFFIX_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    Created,
    /// Someone else pinned this identity first; their record is returned.
    AlreadyPinned(TrustRecord),
}

#[derive(Debug)]
pub struct TrustStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TrustStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TrustStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TrustStoreError::io(&dir, e))?;
        restrict_dir_permissions(&dir)?;

        debug!("Trust store opened at {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, identity: &str) -> Result<Option<TrustRecord>, TrustStoreError> {
        read_record(&self.record_path(identity))
    }

    /// All pinned records, ordered by identity.
    pub fn list(&self) -> Result<Vec<TrustRecord>, TrustStoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| TrustStoreError::io(&self.dir, e))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| TrustStoreError::io(&self.dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable trust record: {e}"),
            }
        }

        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(records)
    }

    /// Records for `address` pinned under an identity other than `identity`.
    pub fn pinned_at(
        &self,
        address: &str,
        identity: &str,
    ) -> Result<Vec<TrustRecord>, TrustStoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| record.address == address && record.identity != identity)
            .collect())
    }

    /// Pin `record` only if its identity has no record yet.
    pub fn pin_new(&self, record: &TrustRecord) -> Result<PinOutcome, TrustStoreError> {
        let _guard = self.lock();
        let path = self.record_path(&record.identity);

        let temp = self.write_temp(record)?;
        match temp.persist_noclobber(&path) {
            Ok(_) => {
                info!(
                    "Pinned {} for '{}' at {}",
                    record.fingerprint, record.identity, record.address
                );
                Ok(PinOutcome::Created)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                let existing = read_record(&path)?.ok_or_else(|| {
                    TrustStoreError::parse(&path, "record vanished while pinning")
                })?;
                debug!("'{}' was pinned concurrently", record.identity);
                Ok(PinOutcome::AlreadyPinned(existing))
            }
            Err(e) => Err(TrustStoreError::io(&path, e.error)),
        }
    }

    /// Replace the pinned record for `record.identity`, provided the current
    /// pin is still `replacing`.
    #[track_caller]
    pub fn repin(&self, record: &TrustRecord, replacing: &str) -> Result<(), TrustStoreError> {
        let _guard = self.lock();
        let path = self.record_path(&record.identity);

        if let Some(current) = read_record(&path)?
            && !current.matches(replacing)
        {
            return Err(TrustStoreError::Conflict {
                identity: record.identity.clone(),
                expected: replacing.to_string(),
                found: current.fingerprint,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let temp = self.write_temp(record)?;
        temp.persist(&path)
            .map_err(|e| TrustStoreError::io(&path, e.error))?;

        warn!(
            "Re-pinned '{}' at {}: {} replaces {replacing}",
            record.identity, record.address, record.fingerprint
        );
        Ok(())
    }

    /// Returns whether a record was removed.
    pub fn forget(&self, identity: &str) -> Result<bool, TrustStoreError> {
        let _guard = self.lock();
        let path = self.record_path(identity);

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Forgot pinned certificate for '{identity}'");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TrustStoreError::io(&path, e)),
        }
    }

    pub(crate) fn record_path(&self, identity: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{RECORD_EXTENSION}", record_file_stem(identity)))
    }

    fn write_temp(&self, record: &TrustRecord) -> Result<NamedTempFile, TrustStoreError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| TrustStoreError::parse(&self.dir, e.to_string()))?;

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(|e| TrustStoreError::io(&self.dir, e))?;
        temp.write_all(&json)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| TrustStoreError::io(temp.path(), e))?;
        Ok(temp)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Readable prefix plus a hash suffix so distinct identities never share a file.
pub(crate) fn record_file_stem(identity: &str) -> String {
    let readable: String = identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN)
        .collect();

    let digest = hex::encode(Sha256::digest(identity.as_bytes()));
    format!("{readable}-{}", &digest[..HASH_SUFFIX_LEN])
}

fn read_record(path: &Path) -> Result<Option<TrustRecord>, TrustStoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TrustStoreError::io(path, e)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| TrustStoreError::parse(path, e.to_string()))
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) -> Result<(), TrustStoreError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| TrustStoreError::io(dir, e))
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) -> Result<(), TrustStoreError> {
    Ok(())
}
