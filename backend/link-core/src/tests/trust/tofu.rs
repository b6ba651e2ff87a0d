// Unit tests for the trust-on-first-use policy

use crate::trust::store::TrustStore;
use crate::trust::tofu::{
    TofuDecision, TofuOutcome, TofuPolicy, TofuPrompt, TofuResolution, TrustRejection,
};

use std::sync::Arc;

use tempfile::TempDir;

const ADDRESS: &str = "10.0.0.5:7443";

fn store() -> (TempDir, Arc<TrustStore>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(TrustStore::open(dir.path()).expect("store"));
    (dir, store)
}

/// **VALUE**: Verifies auto-trust pins a first contact and later matches pass silently.
///
/// **WHY THIS MATTERS**: This is the unattended path (scripts, CI) the option exists for.
///
/// **BUG THIS CATCHES**: Would catch auto-trust accepting without writing a record.
#[test]
fn given_auto_trust_when_first_contact_then_pinned_and_later_match_accepted() {
    // GIVEN: Auto-trust, no prompt
    let (_dir, store) = store();
    let policy = TofuPolicy::new(Arc::clone(&store), true, false);

    // WHEN: N1 presents F1 twice
    let first = policy.evaluate("N1", ADDRESS, "SHA256:f1").expect("evaluate");
    let second = policy.evaluate("N1", ADDRESS, "SHA256:f1").expect("evaluate");

    // THEN: Both accepted, record created
    assert_eq!(first, TofuOutcome::Accepted);
    assert_eq!(second, TofuOutcome::Accepted);
    assert!(store.get("N1").expect("get").expect("record").matches("SHA256:f1"));
}

/// **VALUE**: Verifies a changed fingerprint is a mismatch and the pin stays put.
///
/// **WHY THIS MATTERS**: A changed certificate is a possible man-in-the-middle and
/// must never be auto-resolved, not even with auto-trust on.
///
/// **BUG THIS CATCHES**: Would catch auto-trust overwriting an existing pin.
#[test]
fn given_pinned_f1_when_f2_presented_then_mismatch_and_record_unchanged() {
    // GIVEN: N1 pinned to F1 under auto-trust
    let (_dir, store) = store();
    let policy = TofuPolicy::new(Arc::clone(&store), true, false);
    policy.evaluate("N1", ADDRESS, "SHA256:f1").expect("evaluate");

    // WHEN: N1 presents F2
    let outcome = policy.evaluate("N1", ADDRESS, "SHA256:f2").expect("evaluate");

    // THEN: Rejected with both fingerprints; store still F1
    assert_eq!(
        outcome,
        TofuOutcome::Rejected(TrustRejection::Mismatch {
            identity: "N1".to_string(),
            address: ADDRESS.to_string(),
            pinned: "SHA256:f1".to_string(),
            presented: "SHA256:f2".to_string(),
        })
    );
    assert!(store.get("N1").expect("get").expect("record").matches("SHA256:f1"));
}

/// **VALUE**: Verifies auto-trust does not pin a new identity at an address that is
/// already pinned under another identity.
///
/// **WHY THIS MATTERS**: An interceptor can mint a certificate with any name. Without
/// this check, auto-trust would pin it as a harmless first contact.
///
/// **BUG THIS CATCHES**: Would catch auto-trust keying its decision on identity alone.
#[test]
fn given_address_pinned_as_other_identity_when_new_identity_presented_then_not_auto_trusted() {
    // GIVEN: N1 pinned at ADDRESS under auto-trust
    let (_dir, store) = store();
    let unattended = TofuPolicy::new(Arc::clone(&store), true, false);
    unattended.evaluate("N1", ADDRESS, "SHA256:f1").expect("evaluate");

    // WHEN: N2 turns up at the same address, with and without a prompt available
    let silent = unattended.evaluate("N2", ADDRESS, "SHA256:f2").expect("evaluate");
    let asking = TofuPolicy::new(Arc::clone(&store), true, true)
        .evaluate("N2", ADDRESS, "SHA256:f2")
        .expect("evaluate");

    // THEN: Refused or deferred to a person; never pinned; elsewhere still auto-trusted
    assert!(matches!(
        silent,
        TofuOutcome::Rejected(TrustRejection::Unconfirmed { .. })
    ));
    assert!(matches!(
        asking,
        TofuOutcome::NeedsConfirmation(TofuPrompt::FirstContact { .. })
    ));
    assert!(store.get("N2").expect("get").is_none());
    assert_eq!(
        unattended
            .evaluate("N3", "10.0.0.9:7443", "SHA256:f3")
            .expect("evaluate"),
        TofuOutcome::Accepted
    );
}

/// **VALUE**: Verifies first contact without auto-trust or a prompt is rejected.
///
/// **WHY THIS MATTERS**: Accepting silently would make TOFU meaningless for
/// non-interactive callers that forgot to opt in.
///
/// **BUG THIS CATCHES**: Would catch a default that pins without confirmation.
#[test]
fn given_no_prompt_and_no_auto_trust_when_first_contact_then_unconfirmed() {
    let (_dir, store) = store();
    let policy = TofuPolicy::new(Arc::clone(&store), false, false);

    let outcome = policy.evaluate("N1", ADDRESS, "SHA256:f1").expect("evaluate");

    assert!(matches!(
        outcome,
        TofuOutcome::Rejected(TrustRejection::Unconfirmed { .. })
    ));
    assert!(store.get("N1").expect("get").is_none());
}

/// **VALUE**: Verifies an interactive first contact defers, and Accept pins it.
///
/// **WHY THIS MATTERS**: The CLI asks the user before trusting a new daemon.
///
/// **BUG THIS CATCHES**: Would catch pinning before the user answered.
#[test]
fn given_interactive_policy_when_first_contact_accepted_then_pinned() {
    // GIVEN: A prompt-capable policy
    let (_dir, store) = store();
    let policy = TofuPolicy::new(Arc::clone(&store), false, true);

    // WHEN: First contact is evaluated
    let outcome = policy.evaluate("N1", ADDRESS, "SHA256:f1").expect("evaluate");
    let TofuOutcome::NeedsConfirmation(prompt) = outcome else {
        panic!("expected a prompt, got {outcome:?}");
    };

    // THEN: Nothing pinned yet
    assert!(store.get("N1").expect("get").is_none());
    assert!(matches!(prompt, TofuPrompt::FirstContact { .. }));

    // AND WHEN: The user accepts
    let resolution = policy.resolve(&prompt, TofuDecision::Accept).expect("resolve");

    // THEN: Pinned
    assert_eq!(resolution, TofuResolution::Pinned);
    assert!(store.get("N1").expect("get").expect("record").matches("SHA256:f1"));
}

/// **VALUE**: Verifies declining a first contact leaves the store empty.
///
/// **WHY THIS MATTERS**: "no" must mean no.
///
/// **BUG THIS CATCHES**: Would catch Reject being treated like Accept.
#[test]
fn given_first_contact_prompt_when_rejected_then_declined_and_not_pinned() {
    let (_dir, store) = store();
    let policy = TofuPolicy::new(Arc::clone(&store), false, true);
    let prompt = TofuPrompt::FirstContact {
        identity: "N1".to_string(),
        address: ADDRESS.to_string(),
        fingerprint: "SHA256:f1".to_string(),
    };

    let resolution = policy.resolve(&prompt, TofuDecision::Reject).expect("resolve");

    assert!(matches!(
        resolution,
        TofuResolution::Rejected(TrustRejection::Declined { .. })
    ));
    assert!(store.get("N1").expect("get").is_none());
}

/// **VALUE**: Verifies only an explicit Repin resolves a mismatch.
///
/// **WHY THIS MATTERS**: A reflexive "yes" to a first-contact style question must not
/// replace a pinned certificate.
///
/// **BUG THIS CATCHES**: Would catch Accept re-pinning on mismatch.
#[test]
fn given_mismatch_prompt_when_accept_then_still_rejected_and_when_repin_then_replaced() {
    // GIVEN: N1 pinned to F1, interactive policy, F2 presented
    let (_dir, store) = store();
    TofuPolicy::new(Arc::clone(&store), true, false)
        .evaluate("N1", ADDRESS, "SHA256:f1")
        .expect("pin");
    let policy = TofuPolicy::new(Arc::clone(&store), false, true);
    let outcome = policy.evaluate("N1", ADDRESS, "SHA256:f2").expect("evaluate");
    let TofuOutcome::NeedsConfirmation(prompt) = outcome else {
        panic!("expected a prompt, got {outcome:?}");
    };
    assert_eq!(prompt.presented(), "SHA256:f2");

    // WHEN: Accept
    let accepted = policy.resolve(&prompt, TofuDecision::Accept).expect("resolve");

    // THEN: Still a mismatch, pin untouched
    assert!(matches!(
        accepted,
        TofuResolution::Rejected(TrustRejection::Mismatch { .. })
    ));
    assert!(store.get("N1").expect("get").expect("record").matches("SHA256:f1"));

    // AND WHEN: Repin
    let repinned = policy.resolve(&prompt, TofuDecision::Repin).expect("resolve");

    // THEN: Replaced
    assert_eq!(repinned, TofuResolution::Repinned);
    assert!(store.get("N1").expect("get").expect("record").matches("SHA256:f2"));
}

/// **VALUE**: Verifies the mismatch prompt shows both fingerprints.
///
/// **WHY THIS MATTERS**: The user can only judge a change with both values in front of them.
///
/// **BUG THIS CATCHES**: Would catch a prompt that only prints the new fingerprint.
#[test]
fn given_mismatch_prompt_when_displayed_then_both_fingerprints_shown() {
    let prompt = TofuPrompt::Mismatch {
        identity: "N1".to_string(),
        address: ADDRESS.to_string(),
        pinned: "SHA256:f1".to_string(),
        presented: "SHA256:f2".to_string(),
    };

    let text = prompt.to_string();

    assert!(text.contains("SHA256:f1"));
    assert!(text.contains("SHA256:f2"));
    assert!(text.contains("N1"));
}
