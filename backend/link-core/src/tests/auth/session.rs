// Unit tests for session state and the encrypted token cache

use crate::auth::session::{KeySource, SessionCache, SessionState};
use crate::error::SessionCacheError;

use common::RedactedToken;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// **VALUE**: Verifies seal then open under the same key returns the original token.
///
/// **WHY THIS MATTERS**: This is the whole point of the cache: a restart reuses the session.
///
/// **BUG THIS CATCHES**: Would catch a nonce/ciphertext split at the wrong offset.
#[test]
fn given_same_signer_key_when_sealed_and_opened_then_token_returned() {
    let cache = SessionCache::for_signer("/tmp/unused", b"public-key-blob", IO_TIMEOUT);

    let sealed = cache.seal(&RedactedToken::new("tok-abc")).expect("seal");
    let opened = cache.open_sealed(&sealed).expect("open");

    assert_eq!(opened.as_str(), "tok-abc");
    assert_eq!(sealed.len(), NONCE_LEN + "tok-abc".len() + TAG_LEN);
}

/// **VALUE**: Verifies a different key fails with a decryption error.
///
/// **WHY THIS MATTERS**: A token sealed for one key must never decrypt to a
/// plausible-looking wrong value under another.
///
/// **BUG THIS CATCHES**: Would catch an unauthenticated cipher or an ignored tag.
#[test]
fn given_other_signer_key_when_opening_then_decrypt_error() {
    // GIVEN: A token sealed under key A
    let a = SessionCache::for_signer("/tmp/unused", b"key-a", IO_TIMEOUT);
    let b = SessionCache::for_signer("/tmp/unused", b"key-b", IO_TIMEOUT);
    let sealed = a.seal(&RedactedToken::new("tok-abc")).expect("seal");

    // WHEN: Opened under key B
    let result = b.open_sealed(&sealed);

    // THEN: Decrypt error
    assert!(matches!(result, Err(SessionCacheError::Decrypt { .. })));
}

/// **VALUE**: Verifies tampering and truncation are detected.
///
/// **WHY THIS MATTERS**: A corrupted file must surface, never be treated as valid.
///
/// **BUG THIS CATCHES**: Would catch slicing past the end on short input.
#[test]
fn given_tampered_or_truncated_blob_when_opening_then_decrypt_error() {
    let cache = SessionCache::for_signer("/tmp/unused", b"key", IO_TIMEOUT);
    let mut sealed = cache.seal(&RedactedToken::new("tok-abc")).expect("seal");

    let last = sealed.len() - 1;
    sealed[last] ^= 0x01;

    assert!(matches!(
        cache.open_sealed(&sealed),
        Err(SessionCacheError::Decrypt { .. })
    ));
    assert!(matches!(
        cache.open_sealed(&sealed[..NONCE_LEN]),
        Err(SessionCacheError::Decrypt { .. })
    ));
}

/// **VALUE**: Verifies each write uses a fresh nonce.
///
/// **WHY THIS MATTERS**: Nonce reuse under a stream cipher leaks the XOR of plaintexts.
///
/// **BUG THIS CATCHES**: Would catch a constant or derived nonce.
#[test]
fn given_same_token_when_sealed_twice_then_ciphertexts_differ() {
    let cache = SessionCache::for_signer("/tmp/unused", b"key", IO_TIMEOUT);
    let token = RedactedToken::new("tok-abc");

    let first = cache.seal(&token).expect("seal");
    let second = cache.seal(&token).expect("seal");

    assert_ne!(first[..NONCE_LEN], second[..NONCE_LEN]);
    assert_ne!(first, second);
}

/// **VALUE**: Verifies store/load/clear against a real file.
///
/// **WHY THIS MATTERS**: The CLI reads the token written by a previous process.
///
/// **BUG THIS CATCHES**: Would catch a missing parent directory or a non-atomic write.
#[tokio::test]
async fn given_stored_token_when_loaded_then_same_token_and_clear_removes_file() {
    // GIVEN: A cache under a not-yet-existing directory
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("linkctl").join("session.token");
    let cache = SessionCache::for_signer(&path, b"key", IO_TIMEOUT);

    // WHEN: Storing and loading
    cache.store(&RedactedToken::new("tok-abc")).await.expect("store");
    let loaded = cache.load().await.expect("load");

    // THEN: Round trip, then clear
    assert_eq!(loaded.expect("token").as_str(), "tok-abc");
    assert!(cache.clear().await.expect("clear"));
    assert!(!cache.clear().await.expect("clear again"));
    assert!(cache.load().await.expect("load").is_none());
}

/// **VALUE**: Verifies the token file is owner-only.
///
/// **WHY THIS MATTERS**: Other local users must not be able to read the sealed token.
///
/// **BUG THIS CATCHES**: Would catch the default umask leaking group/other bits.
#[cfg(unix)]
#[tokio::test]
async fn given_stored_token_when_checking_permissions_then_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.token");
    let cache = SessionCache::for_signer(&path, b"key", IO_TIMEOUT);

    cache.store(&RedactedToken::new("tok-abc")).await.expect("store");

    let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

/// **VALUE**: Verifies replacing a loosely permissioned token file tightens it and
/// leaves no temp file behind.
///
/// **WHY THIS MATTERS**: A file copied in with 0644 would otherwise stay readable
/// after every later write.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - Owner-only mode is applied only when a file is first created
/// - Writers share one fixed temp name and leave it behind
#[cfg(unix)]
#[tokio::test]
async fn given_world_readable_token_file_when_stored_then_owner_only_and_no_leftovers() {
    use std::os::unix::fs::PermissionsExt;

    // GIVEN: An existing token file readable by everyone
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.token");
    std::fs::write(&path, b"stale").expect("seed file");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");
    let cache = SessionCache::for_signer(&path, b"key", IO_TIMEOUT);

    // WHEN: Storing two tokens concurrently
    let token_one = RedactedToken::new("tok-one");
    let token_two = RedactedToken::new("tok-two");
    let (first, second) = tokio::join!(cache.store(&token_one), cache.store(&token_two),);
    first.expect("store one");
    second.expect("store two");

    // THEN: Owner-only, one of the tokens readable, and the file alone in its directory
    let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    let loaded = cache.load().await.expect("load").expect("token");
    assert!(["tok-one", "tok-two"].contains(&loaded.as_str()));
    let entries: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("session.token")]);
}

/// **VALUE**: Verifies a token file written under another key fails to load.
///
/// **WHY THIS MATTERS**: Loading must surface the decryption error rather than
/// pretend there is no session.
///
/// **BUG THIS CATCHES**: Would catch decrypt failures mapped to `Ok(None)`.
#[tokio::test]
async fn given_file_from_other_key_when_loaded_then_decrypt_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("session.token");
    SessionCache::for_signer(&path, b"key-a", IO_TIMEOUT)
        .store(&RedactedToken::new("tok-abc"))
        .await
        .expect("store");

    let result = SessionCache::for_signer(&path, b"key-b", IO_TIMEOUT).load().await;

    assert!(matches!(result, Err(SessionCacheError::Decrypt { .. })));
}

/// **VALUE**: Verifies the machine fallback key is deterministic and labelled.
///
/// **WHY THIS MATTERS**: Without a signer the token must still survive a restart on
/// the same machine.
///
/// **BUG THIS CATCHES**: Would catch a random fallback key.
#[test]
fn given_no_signer_when_fallback_cache_then_stable_key_and_weak_source() {
    let a = SessionCache::machine_fallback("/tmp/unused", IO_TIMEOUT);
    let b = SessionCache::machine_fallback("/tmp/unused", IO_TIMEOUT);

    let sealed = a.seal(&RedactedToken::new("tok-abc")).expect("seal");

    assert_eq!(b.open_sealed(&sealed).expect("open").as_str(), "tok-abc");
    assert_eq!(a.key_source(), KeySource::MachineFallback);
}

/// **VALUE**: Verifies concurrent readers always see a whole token.
///
/// **WHY THIS MATTERS**: Every RPC reads the token while `authenticate` may be writing it.
///
/// **BUG THIS CATCHES**: Would catch unsynchronised access to the token.
#[test]
fn given_concurrent_writers_and_readers_when_reading_then_never_torn() {
    let state = Arc::new(SessionState::new());
    let tokens = ["a".repeat(64), "b".repeat(64)];

    let writer = {
        let state = Arc::clone(&state);
        let tokens = tokens.clone();
        thread::spawn(move || {
            for i in 0..1_000 {
                state.set(RedactedToken::new(tokens[i % 2].clone()));
            }
        })
    };

    for _ in 0..1_000 {
        if let Some(token) = state.get() {
            assert!(tokens.iter().any(|t| t == token.as_str()));
        }
    }
    writer.join().expect("writer");

    assert!(state.is_authenticated());
    state.clear();
    assert!(!state.is_authenticated());
}
