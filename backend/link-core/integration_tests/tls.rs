use crate::helpers::{TestCertificate, health_check, spawn_tls_daemon};

use link_core::trust::certificate_fingerprint;
use link_core::{ClientError, ClientOptions, LinkClient, TlsOptions, TofuDecision, TofuPrompt, TrustStore};

use models::TrustRecordBuilder;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tonic_health::pb::health_check_response::ServingStatus;

// ============================================================================
// Trust-on-first-use over real TLS handshakes
// ============================================================================

const DAEMON_NAME: &str = "linkd-test";

fn open_store(dir: &tempfile::TempDir) -> Arc<TrustStore> {
    Arc::new(TrustStore::open(dir.path().join("known_daemons")).expect("trust store"))
}

fn verifying(store: &Arc<TrustStore>, auto_trust: bool) -> TlsOptions {
    TlsOptions {
        auto_trust,
        trust_store: Some(Arc::clone(store)),
        ..TlsOptions::default()
    }
}

fn client_for(addr: SocketAddr, tls: TlsOptions) -> LinkClient {
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_retries(0)
        .with_tls(tls)
        .build()
        .expect("options");
    LinkClient::new(options)
}

type PromptLog = Arc<Mutex<Vec<TofuPrompt>>>;

fn answering_client(
    addr: SocketAddr,
    store: &Arc<TrustStore>,
    decision: TofuDecision,
) -> (LinkClient, PromptLog) {
    let prompts = PromptLog::default();
    let seen = Arc::clone(&prompts);
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_retries(0)
        .with_tls(verifying(store, false))
        .with_tofu_callback(move |prompt| {
            seen.lock().expect("prompts").push(prompt.clone());
            decision
        })
        .build()
        .expect("options");
    (LinkClient::new(options), prompts)
}

// ----------------------------------------------------------------------------
// First contact
// ----------------------------------------------------------------------------

/// **VALUE**: Verifies auto-trust pins the first certificate and the connection works.
///
/// **WHY THIS MATTERS**: Unattended deployments rely on auto-trust for first contact.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The pin is keyed by address instead of the certificate's name
/// - The fingerprint stored differs from what later handshakes compute
#[tokio::test]
async fn given_auto_trust_when_first_contact_then_certificate_pinned_and_connected() {
    // GIVEN: A TLS daemon never seen before
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let client = client_for(addr, verifying(&store, true));

    // WHEN: Connecting
    client.connect().await.expect("connect");

    // THEN: Pinned under the certificate's name, and calls work
    let record = store.get(DAEMON_NAME).expect("read").expect("pinned");
    assert_eq!(record.fingerprint, certificate_fingerprint(&cert.der));
    assert_eq!(record.address, addr.to_string());
    assert_eq!(
        health_check(&client).await.expect("health"),
        ServingStatus::Serving
    );
}

/// **VALUE**: Verifies first contact without auto-trust or a callback is refused.
///
/// **WHY THIS MATTERS**: Scripts must never silently trust an unknown daemon.
///
/// **BUG THIS CATCHES**: Would catch an unconfirmed certificate being pinned anyway.
#[tokio::test]
async fn given_no_auto_trust_and_no_callback_when_first_contact_then_rejected_and_nothing_pinned() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let client = client_for(addr, verifying(&store, false));

    let error = client.connect().await.expect_err("unconfirmed");

    assert!(matches!(error, ClientError::TrustRejected { .. }));
    assert!(store.list().expect("list").is_empty());
    assert!(!client.is_connected());
}

/// **VALUE**: Verifies an accepting callback pins the certificate and the redial succeeds.
///
/// **WHY THIS MATTERS**: This is the interactive `linkctl` first-contact flow.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - The callback runs but the redial never happens
/// - The prompt shows a different fingerprint than the one pinned
#[tokio::test]
async fn given_accepting_callback_when_first_contact_then_prompted_once_and_pinned() {
    // GIVEN: A callback that accepts
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let (client, prompts) = answering_client(addr, &store, TofuDecision::Accept);

    // WHEN: Connecting
    client.connect().await.expect("connect");

    // THEN: One first-contact prompt, pinned with the presented fingerprint
    let prompts = prompts.lock().expect("prompts").clone();
    assert_eq!(prompts.len(), 1);
    assert!(matches!(prompts[0], TofuPrompt::FirstContact { .. }));
    assert_eq!(prompts[0].identity(), DAEMON_NAME);
    let record = store.get(DAEMON_NAME).expect("read").expect("pinned");
    assert_eq!(record.fingerprint, prompts[0].presented());
}

/// **VALUE**: Verifies a declining callback leaves the store untouched.
///
/// **WHY THIS MATTERS**: Saying no must not be remembered as yes.
///
/// **BUG THIS CATCHES**: Would catch the pin being written before the answer.
#[tokio::test]
async fn given_rejecting_callback_when_first_contact_then_trust_rejected() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let (client, _prompts) = answering_client(addr, &store, TofuDecision::Reject);

    let error = client.connect().await.expect_err("declined");

    assert!(matches!(error, ClientError::TrustRejected { .. }));
    assert!(store.get(DAEMON_NAME).expect("read").is_none());
}

/// **VALUE**: Verifies a user who answers slower than the dial timeout still connects.
///
/// **WHY THIS MATTERS**: People read fingerprints; a short connect timeout must
/// not throw their answer away.
///
/// **BUG THIS CATCHES**: Would catch the prompt counting against the dial deadline,
/// which fails the connect and drops the pin the user just accepted.
#[tokio::test]
async fn given_slow_accepting_callback_when_first_contact_then_connected_after_timeout() {
    // GIVEN: A callback that takes longer than the whole dial timeout
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let options = ClientOptions::builder()
        .with_network_address(addr.to_string())
        .with_retries(0)
        .with_timeout(Duration::from_millis(500))
        .with_tls(verifying(&store, false))
        .with_tofu_callback(|_prompt| {
            std::thread::sleep(Duration::from_millis(800));
            TofuDecision::Accept
        })
        .build()
        .expect("options");
    let client = LinkClient::new(options);

    // WHEN: Connecting
    client.connect().await.expect("connect after slow answer");

    // THEN: Pinned and serving
    let record = store.get(DAEMON_NAME).expect("read").expect("pinned");
    assert_eq!(record.fingerprint, certificate_fingerprint(&cert.der));
    assert_eq!(
        health_check(&client).await.expect("health"),
        ServingStatus::Serving
    );
}

/// **VALUE**: Verifies auto-trust refuses a new name at an address pinned as another.
///
/// **WHY THIS MATTERS**: An attacker on a known address could otherwise pick a fresh
/// name and be pinned without anyone noticing.
///
/// **BUG THIS CATCHES**: Would catch auto-trust looking only at the identity and
/// never at who already answered on that address.
#[tokio::test]
async fn given_address_pinned_as_other_name_when_auto_trust_then_rejected_and_not_pinned() {
    // GIVEN: The daemon's address already pinned under a different name
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let previous = TrustRecordBuilder::default()
        .with_identity("linkd-old")
        .with_address(addr.to_string())
        .with_fingerprint("SHA256:0a0b")
        .with_first_seen(1_700_000_000)
        .build()
        .expect("record");
    store.pin_new(&previous).expect("pin");
    let client = client_for(addr, verifying(&store, true));

    // WHEN: Connecting with auto-trust and no callback
    let error = client.connect().await.expect_err("not auto-trusted");

    // THEN: Rejected, and only the old pin remains
    assert!(matches!(error, ClientError::TrustRejected { .. }));
    assert!(store.get(DAEMON_NAME).expect("read").is_none());
    assert_eq!(store.list().expect("list").len(), 1);
}

// ----------------------------------------------------------------------------
// Changed certificate
// ----------------------------------------------------------------------------

/// **VALUE**: Verifies a changed certificate for a pinned name fails with a mismatch.
///
/// **WHY THIS MATTERS**: This is the man-in-the-middle signal TOFU exists to raise.
///
/// **BUG THIS CATCHES**: Would catch if:
/// - Auto-trust silently re-pins a changed certificate
/// - The error loses either fingerprint
#[tokio::test]
async fn given_pinned_daemon_when_certificate_changes_then_trust_mismatch() {
    // GIVEN: A pin from a first daemon
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let original = TestCertificate::generate(DAEMON_NAME);
    let (_first, first_addr) = spawn_tls_daemon(&original).await;
    client_for(first_addr, verifying(&store, true))
        .connect()
        .await
        .expect("first contact");

    // WHEN: The same name presents another certificate
    let impostor = TestCertificate::generate(DAEMON_NAME);
    let (_second, second_addr) = spawn_tls_daemon(&impostor).await;
    let error = client_for(second_addr, verifying(&store, true))
        .connect()
        .await
        .expect_err("mismatch");

    // THEN: Mismatch carrying both fingerprints; pin unchanged
    match error {
        ClientError::TrustMismatch {
            pinned, presented, ..
        } => {
            assert_eq!(pinned, certificate_fingerprint(&original.der));
            assert_eq!(presented, certificate_fingerprint(&impostor.der));
        }
        other => panic!("expected trust mismatch, got {other}"),
    }
    let record = store.get(DAEMON_NAME).expect("read").expect("pinned");
    assert_eq!(record.fingerprint, certificate_fingerprint(&original.der));
}

/// **VALUE**: Verifies an explicit re-pin replaces the old certificate and connects.
///
/// **WHY THIS MATTERS**: Daemons legitimately rotate certificates; the user needs a way
/// through that is deliberate.
///
/// **BUG THIS CATCHES**: Would catch `Repin` being treated like first-contact `Accept`.
#[tokio::test]
async fn given_repin_callback_when_certificate_changes_then_replaced_and_connected() {
    // GIVEN: An existing pin for the name
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let original = TestCertificate::generate(DAEMON_NAME);
    let (_first, first_addr) = spawn_tls_daemon(&original).await;
    client_for(first_addr, verifying(&store, true))
        .connect()
        .await
        .expect("first contact");

    // WHEN: A rotated certificate is confirmed with Repin
    let rotated = TestCertificate::generate(DAEMON_NAME);
    let (_second, second_addr) = spawn_tls_daemon(&rotated).await;
    let (client, prompts) = answering_client(second_addr, &store, TofuDecision::Repin);
    client.connect().await.expect("connect after repin");

    // THEN: Prompted with a mismatch, pin replaced
    assert!(matches!(
        prompts.lock().expect("prompts")[0],
        TofuPrompt::Mismatch { .. }
    ));
    let record = store.get(DAEMON_NAME).expect("read").expect("pinned");
    assert_eq!(record.fingerprint, certificate_fingerprint(&rotated.der));
}

// ----------------------------------------------------------------------------
// Verification disabled
// ----------------------------------------------------------------------------

/// **VALUE**: Verifies skip-verify connects without consulting or writing the store.
///
/// **WHY THIS MATTERS**: Skip-verify is a debugging escape hatch; it must not leave pins
/// behind that later mask a real mismatch.
///
/// **BUG THIS CATCHES**: Would catch skip-verify still running the TOFU policy.
#[tokio::test]
async fn given_skip_verify_when_connecting_then_connected_and_store_untouched() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = open_store(&dir);
    let cert = TestCertificate::generate(DAEMON_NAME);
    let (_daemon, addr) = spawn_tls_daemon(&cert).await;
    let client = client_for(
        addr,
        TlsOptions {
            skip_verify: true,
            trust_store: Some(Arc::clone(&store)),
            ..TlsOptions::default()
        },
    );

    client.connect().await.expect("connect");

    assert_eq!(
        health_check(&client).await.expect("health"),
        ServingStatus::Serving
    );
    assert!(store.list().expect("list").is_empty());
}
