// Unit tests for the on-disk trust store

use crate::error::TrustStoreError;
use crate::trust::store::{PinOutcome, TrustStore, record_file_stem};

use models::{TrustRecord, TrustRecordBuilder};

use std::sync::{Arc, Barrier};
use std::thread;

use tempfile::TempDir;

fn record(identity: &str, fingerprint: &str) -> TrustRecord {
    TrustRecordBuilder::default()
        .with_identity(identity)
        .with_address("10.0.0.5:7443")
        .with_fingerprint(fingerprint)
        .with_first_seen(1_700_000_000)
        .build()
        .expect("valid record")
}

fn open_store() -> (TempDir, TrustStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = TrustStore::open(dir.path().join("known_daemons")).expect("store");
    (dir, store)
}

/// **VALUE**: Verifies a first pin is persisted and read back intact.
///
/// **WHY THIS MATTERS**: The pin is the only thing that makes later connections
/// to the same identity verifiable.
///
/// **BUG THIS CATCHES**: Would catch records written to one path and read from another.
#[test]
fn given_empty_store_when_pin_new_then_record_is_readable() {
    // GIVEN: An empty store
    let (_dir, store) = open_store();

    // WHEN: Pinning
    let outcome = store.pin_new(&record("daemon-1", "SHA256:aa11")).expect("pin");

    // THEN: Created and readable
    assert_eq!(outcome, PinOutcome::Created);
    assert_eq!(
        store.get("daemon-1").expect("get"),
        Some(record("daemon-1", "SHA256:aa11"))
    );
}

/// **VALUE**: Verifies a second first-pin never overwrites the existing record.
///
/// **WHY THIS MATTERS**: A pinned record is never silently replaced. An attacker
/// racing the first pin must not be able to win by writing last.
///
/// **BUG THIS CATCHES**: Would catch last-writer-wins semantics on first pin.
#[test]
fn given_pinned_identity_when_pin_new_with_other_fingerprint_then_existing_returned() {
    // GIVEN: daemon-1 pinned to aa11
    let (_dir, store) = open_store();
    store.pin_new(&record("daemon-1", "SHA256:aa11")).expect("pin");

    // WHEN: Someone tries to first-pin bb22
    let outcome = store.pin_new(&record("daemon-1", "SHA256:bb22")).expect("pin");

    // THEN: The original wins and is unchanged
    assert_eq!(
        outcome,
        PinOutcome::AlreadyPinned(record("daemon-1", "SHA256:aa11"))
    );
    assert!(store.get("daemon-1").expect("get").expect("record").matches("SHA256:aa11"));
}

/// **VALUE**: Verifies exactly one of many concurrent first pins succeeds.
///
/// **WHY THIS MATTERS**: Concurrent CLI invocations share the store; a mismatch must
/// never be lost to a race.
///
/// **BUG THIS CATCHES**: Would catch check-then-write pinning.
#[test]
fn given_concurrent_first_pins_when_racing_then_exactly_one_created() {
    // GIVEN: Eight threads with different fingerprints for the same identity
    let (_dir, store) = open_store();
    let store = Arc::new(store);
    let barrier = Arc::new(Barrier::new(8));

    // WHEN: They pin at once
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store
                    .pin_new(&record("daemon-1", &format!("SHA256:{i:02x}")))
                    .expect("pin")
            })
        })
        .collect();
    let outcomes: Vec<PinOutcome> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread"))
        .collect();

    // THEN: One creation; every loser saw the winner's record
    let created = outcomes
        .iter()
        .filter(|outcome| **outcome == PinOutcome::Created)
        .count();
    assert_eq!(created, 1);

    let winner = store.get("daemon-1").expect("get").expect("record");
    for outcome in outcomes {
        if let PinOutcome::AlreadyPinned(existing) = outcome {
            assert_eq!(existing, winner);
        }
    }
}

/// **VALUE**: Verifies re-pinning replaces the record when the caller saw the current pin.
///
/// **WHY THIS MATTERS**: This is the explicit recovery path after a legitimate
/// certificate rotation.
///
/// **BUG THIS CATCHES**: Would catch repin leaving the old fingerprint in place.
#[test]
fn given_pinned_identity_when_repin_with_current_fingerprint_then_replaced() {
    let (_dir, store) = open_store();
    store.pin_new(&record("daemon-1", "SHA256:aa11")).expect("pin");

    store
        .repin(&record("daemon-1", "SHA256:bb22"), "SHA256:aa11")
        .expect("repin");

    assert!(store.get("daemon-1").expect("get").expect("record").matches("SHA256:bb22"));
}

/// **VALUE**: Verifies re-pinning refuses when the pin changed since the prompt.
///
/// **WHY THIS MATTERS**: A user approving "aa11 → bb22" must not accidentally
/// overwrite a "cc33" written by another process in between.
///
/// **BUG THIS CATCHES**: Would catch unconditional overwrite on repin.
#[test]
fn given_pin_changed_when_repin_with_stale_fingerprint_then_conflict() {
    // GIVEN: The store now holds cc33
    let (_dir, store) = open_store();
    store.pin_new(&record("daemon-1", "SHA256:cc33")).expect("pin");

    // WHEN: Repinning while believing the pin is aa11
    let result = store.repin(&record("daemon-1", "SHA256:bb22"), "SHA256:aa11");

    // THEN: Conflict, record untouched
    assert!(matches!(result, Err(TrustStoreError::Conflict { .. })));
    assert!(store.get("daemon-1").expect("get").expect("record").matches("SHA256:cc33"));
}

/// **VALUE**: Verifies list returns every record sorted and forget removes one.
///
/// **WHY THIS MATTERS**: `linkctl trust list` and `trust forget` rely on these.
///
/// **BUG THIS CATCHES**: Would catch stray temp files listed as records, or forget
/// reporting success for unknown identities.
#[test]
fn given_records_when_list_and_forget_then_store_reflects_changes() {
    // GIVEN: Two pinned identities and an unrelated file
    let (_dir, store) = open_store();
    store.pin_new(&record("zeta", "SHA256:aa11")).expect("pin");
    store.pin_new(&record("alpha", "SHA256:bb22")).expect("pin");
    std::fs::write(store.dir().join("notes.txt"), "ignore me").expect("write");

    // WHEN: Listing
    let identities: Vec<String> = store
        .list()
        .expect("list")
        .into_iter()
        .map(|record| record.identity)
        .collect();

    // THEN: Both, sorted
    assert_eq!(identities, vec!["alpha".to_string(), "zeta".to_string()]);

    // AND: Forget removes exactly one
    assert!(store.forget("zeta").expect("forget"));
    assert!(!store.forget("zeta").expect("forget again"));
    assert_eq!(store.list().expect("list").len(), 1);
}

/// **VALUE**: Verifies the address lookup finds other identities pinned there.
///
/// **WHY THIS MATTERS**: Auto-trust uses it to spot a new name at a known address.
///
/// **BUG THIS CATCHES**: Would catch the identity itself being reported as a conflict.
#[test]
fn given_pins_at_one_address_when_pinned_at_then_other_identities_only() {
    // GIVEN: One identity pinned at an address
    let (_dir, store) = open_store();
    store.pin_new(&record("alpha", "SHA256:aa11")).expect("pin");

    // WHEN: Looking up that address for several identities
    let others = store.pinned_at("10.0.0.5:7443", "beta").expect("lookup");
    let itself = store.pinned_at("10.0.0.5:7443", "alpha").expect("lookup");
    let elsewhere = store.pinned_at("10.0.0.6:7443", "beta").expect("lookup");

    // THEN: Only a different identity at the same address is reported
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].identity, "alpha");
    assert!(itself.is_empty());
    assert!(elsewhere.is_empty());
}

/// **VALUE**: Verifies identities that sanitize alike still map to distinct files.
///
/// **WHY THIS MATTERS**: Identity is peer-controlled text; two daemons must never
/// share a pin.
///
/// **BUG THIS CATCHES**: Would catch file names derived from the sanitized text only.
#[test]
fn given_identities_differing_only_in_symbols_when_stem_then_distinct() {
    let a = record_file_stem("daemon/1");
    let b = record_file_stem("daemon:1");

    assert_ne!(a, b);
    assert!(a.starts_with("daemon_1-"));
    assert!(!record_file_stem("../../etc/passwd").contains('/'));
}
