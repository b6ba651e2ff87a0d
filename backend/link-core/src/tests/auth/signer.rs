// Unit tests for key-file signers and signer discovery

use super::{ed25519_key, file_signer};
use crate::auth::signer::{AuthSigner, FileSigner, discover_signers};
use crate::error::SignerError;
use crate::options::AuthOptions;

use common::RedactedToken;

use std::sync::Arc;

use chacha20poly1305::aead::OsRng;
use signature::Verifier;
use ssh_encoding::Decode;
use ssh_key::{LineEnding, PublicKey, Signature};

/// **VALUE**: Verifies a file signer produces an SSH signature the public key verifies.
///
/// **WHY THIS MATTERS**: The daemon verifies exactly this wire format.
///
/// **BUG THIS CATCHES**: Would catch raw signature bytes sent without SSH framing.
#[tokio::test]
async fn given_file_signer_when_signing_challenge_then_public_key_verifies() {
    // GIVEN: A signer
    let signer = file_signer(1);

    // WHEN: Signing a challenge
    let encoded = signer.sign(b"challenge-bytes").await.expect("sign");

    // THEN: The signature decodes and verifies
    let signature = Signature::decode(&mut encoded.as_slice()).expect("decode");
    let public = PublicKey::from_bytes(signer.public_key_blob()).expect("public key");
    Verifier::verify(&public, b"challenge-bytes", &signature).expect("signature verifies");
    assert!(signer.fingerprint().starts_with("SHA256:"));
}

/// **VALUE**: Verifies encrypted key files are skipped without a passphrase and used with one.
///
/// **WHY THIS MATTERS**: Most users' keys are encrypted; a missing passphrase must not
/// abort discovery.
///
/// **BUG THIS CATCHES**: Would catch encrypted keys reported as fatal errors.
#[test]
fn given_encrypted_key_file_when_loading_then_none_without_passphrase_some_with() {
    // GIVEN: An encrypted key on disk
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("id_ed25519");
    ed25519_key(2)
        .encrypt(&mut OsRng, "hunter2")
        .expect("encrypt")
        .write_openssh_file(&path, LineEnding::LF)
        .expect("write key");

    // WHEN: Loading without and with the passphrase
    let without = FileSigner::from_file(&path, None).expect("load");
    let with = FileSigner::from_file(&path, Some(&RedactedToken::new("hunter2"))).expect("load");

    // THEN: Skipped, then usable
    assert!(without.is_none());
    assert_eq!(
        with.expect("signer").public_key_blob(),
        file_signer(2).public_key_blob()
    );
}

/// **VALUE**: Verifies a wrong passphrase is an error, not a skip.
///
/// **WHY THIS MATTERS**: The user asked for this key explicitly and should learn the
/// passphrase was wrong.
///
/// **BUG THIS CATCHES**: Would catch decryption failures being swallowed.
#[test]
fn given_wrong_passphrase_when_loading_then_key_file_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("id_ed25519");
    ed25519_key(2)
        .encrypt(&mut OsRng, "hunter2")
        .expect("encrypt")
        .write_openssh_file(&path, LineEnding::LF)
        .expect("write key");

    let result = FileSigner::from_file(&path, Some(&RedactedToken::new("wrong")));

    assert!(matches!(result, Err(SignerError::KeyFile { .. })));
}

/// **VALUE**: Verifies injected signers replace discovery entirely.
///
/// **WHY THIS MATTERS**: Embedding callers (and tests) must not pick up the host's
/// agent or `~/.ssh` keys by accident.
///
/// **BUG THIS CATCHES**: Would catch injected signers being merged with discovered ones.
#[tokio::test]
async fn given_injected_signers_when_discovering_then_only_those_returned() {
    let injected: Vec<Arc<dyn AuthSigner>> = vec![Arc::new(file_signer(1)), Arc::new(file_signer(2))];
    let options = AuthOptions {
        signers: injected,
        ..AuthOptions::default()
    };

    let signers = discover_signers(&options).await;

    let descriptions: Vec<&str> = signers.iter().map(|s| s.description()).collect();
    assert_eq!(descriptions, vec!["test:1", "test:2"]);
}

/// **VALUE**: Verifies an explicit key file is discovered when the agent is disabled.
///
/// **WHY THIS MATTERS**: `--key-file` is the documented way to pick a key.
///
/// **BUG THIS CATCHES**: Would catch the explicit path being ignored for defaults.
#[tokio::test]
async fn given_explicit_key_file_when_discovering_then_single_file_signer() {
    // GIVEN: An unencrypted key on disk, agent disabled
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("linkd_key");
    ed25519_key(4)
        .write_openssh_file(&path, LineEnding::LF)
        .expect("write key");
    let options = AuthOptions {
        use_agent: false,
        key_file: Some(path),
        ..AuthOptions::default()
    };

    // WHEN: Discovering
    let signers = discover_signers(&options).await;

    // THEN: Exactly that key
    assert_eq!(signers.len(), 1);
    assert_eq!(signers[0].public_key_blob(), file_signer(4).public_key_blob());
}

/// **VALUE**: Verifies an unreadable key file is skipped.
///
/// **WHY THIS MATTERS**: One broken file must not abort authentication.
///
/// **BUG THIS CATCHES**: Would catch a parse error propagating out of discovery.
#[tokio::test]
async fn given_garbage_key_file_when_discovering_then_no_signers() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("broken");
    std::fs::write(&path, "not a key").expect("write");
    let options = AuthOptions {
        use_agent: false,
        key_file: Some(path),
        ..AuthOptions::default()
    };

    assert!(discover_signers(&options).await.is_empty());
}

/// **VALUE**: Verifies an unreachable agent falls back to the default key files.
///
/// **WHY THIS MATTERS**: A stale `SSH_AUTH_SOCK` (common after re-login) must not make
/// authentication impossible when `~/.ssh/id_ed25519` exists.
///
/// **BUG THIS CATCHES**: Would catch an agent connect error aborting discovery.
#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn given_stale_agent_socket_when_discovering_then_default_key_file_used() {
    // GIVEN: SSH_AUTH_SOCK pointing nowhere and a key under $HOME/.ssh
    let home = tempfile::tempdir().expect("temp dir");
    let ssh_dir = home.path().join(".ssh");
    std::fs::create_dir_all(&ssh_dir).expect("ssh dir");
    ed25519_key(6)
        .write_openssh_file(&ssh_dir.join("id_ed25519"), LineEnding::LF)
        .expect("write key");

    let saved_home = std::env::var_os("HOME");
    let saved_sock = std::env::var_os("SSH_AUTH_SOCK");
    // SAFETY: serial test; restored below before any other test touches the environment.
    unsafe {
        std::env::set_var("HOME", home.path());
        std::env::set_var("SSH_AUTH_SOCK", home.path().join("agent.sock"));
    }

    // WHEN: Discovering with defaults
    let signers = discover_signers(&AuthOptions::default()).await;

    // SAFETY: as above.
    unsafe {
        match saved_home {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
        match saved_sock {
            Some(value) => std::env::set_var("SSH_AUTH_SOCK", value),
            None => std::env::remove_var("SSH_AUTH_SOCK"),
        }
    }

    // THEN: The key file was found despite the dead agent
    assert_eq!(signers.len(), 1);
    assert_eq!(signers[0].public_key_blob(), file_signer(6).public_key_blob());
}
