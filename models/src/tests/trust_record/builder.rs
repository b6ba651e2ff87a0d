use crate::{ModelError, TrustRecordBuilder};

const VALID_FINGERPRINT: &str =
    "SHA256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

/// **VALUE**: Verifies that a fully specified builder produces the record verbatim.
///
/// **WHY THIS MATTERS**: TrustRecords are the pinned state behind every TLS decision.
/// Any silent rewrite of identity or fingerprint would make later comparisons wrong.
///
/// **BUG THIS CATCHES**: Would catch if the builder normalises or swaps fields.
#[test]
fn given_all_fields_when_building_trust_record_then_values_are_preserved() {
    // GIVEN: Builder with every field set
    let builder = TrustRecordBuilder::default()
        .with_identity("linkd.example.internal")
        .with_address("10.0.0.5:7443")
        .with_fingerprint(VALID_FINGERPRINT)
        .with_first_seen(1_700_000_000);

    // WHEN: Building
    let record = builder.build().expect("record should build");

    // THEN: Fields are unchanged
    assert_eq!(record.identity, "linkd.example.internal");
    assert_eq!(record.address, "10.0.0.5:7443");
    assert_eq!(record.fingerprint, VALID_FINGERPRINT);
    assert_eq!(record.first_seen, 1_700_000_000);
    assert!(record.matches(VALID_FINGERPRINT));
}

/// **VALUE**: Verifies that a missing identity is rejected.
///
/// **WHY THIS MATTERS**: Records are keyed by identity. A record without one could never
/// be found again, so every later connection would look like first contact.
///
/// **BUG THIS CATCHES**: Would catch if the identity requirement is dropped.
#[test]
fn given_missing_identity_when_building_then_returns_validation_error() {
    // GIVEN: Builder without identity
    let builder = TrustRecordBuilder::default()
        .with_address("10.0.0.5:7443")
        .with_fingerprint(VALID_FINGERPRINT);

    // WHEN: Building
    let result = builder.build();

    // THEN: Validation error
    match result.unwrap_err() {
        ModelError::Validation { message, .. } => {
            assert_eq!(message, "Identity is required");
        }
    }
}

/// **VALUE**: Verifies that whitespace-only identities are rejected.
///
/// **WHY THIS MATTERS**: A blank identity would collide for every daemon whose certificate
/// lacks a common name.
///
/// **BUG THIS CATCHES**: Would catch if only `is_empty()` is checked without trimming.
#[test]
fn given_blank_identity_when_building_then_returns_validation_error() {
    // GIVEN: Builder with a blank identity
    let builder = TrustRecordBuilder::default()
        .with_identity("   ")
        .with_address("10.0.0.5:7443")
        .with_fingerprint(VALID_FINGERPRINT);

    // WHEN/THEN: Building fails
    match builder.build().unwrap_err() {
        ModelError::Validation { message, .. } => {
            assert_eq!(message, "Identity cannot be empty");
        }
    }
}

/// **VALUE**: Verifies that fingerprints without the SHA256 prefix or with non-hex digits
/// are rejected.
///
/// **WHY THIS MATTERS**: Fingerprints are compared as strings. Two encodings of the same
/// digest would compare unequal and raise a false man-in-the-middle alarm.
///
/// **BUG THIS CATCHES**: Would catch if the format check is loosened.
#[test]
fn given_malformed_fingerprints_when_building_then_each_is_rejected() {
    // GIVEN: Various malformed fingerprints
    let invalid = vec!["", "9f86d081", "MD5:9f86d081", "SHA256:", "SHA256:not-hex!"];

    for fingerprint in invalid {
        // WHEN: Building
        let result = TrustRecordBuilder::default()
            .with_identity("linkd")
            .with_address("10.0.0.5:7443")
            .with_fingerprint(fingerprint)
            .build();

        // THEN: Rejected
        assert!(result.is_err(), "Should reject fingerprint: {fingerprint:?}");
    }
}

/// **VALUE**: Verifies that `first_seen` defaults to "now".
///
/// **WHY THIS MATTERS**: The trust listing shows when a daemon was first pinned; a zero
/// timestamp would read as 1970.
///
/// **BUG THIS CATCHES**: Would catch if the default falls back to zero.
#[test]
fn given_no_first_seen_when_building_then_defaults_to_current_time() {
    // GIVEN: Builder without first_seen
    let record = TrustRecordBuilder::default()
        .with_identity("linkd")
        .with_address("10.0.0.5:7443")
        .with_fingerprint(VALID_FINGERPRINT)
        .build()
        .expect("record should build");

    // THEN: A plausible recent timestamp (after 2023-11-14)
    assert!(record.first_seen > 1_700_000_000);
}

/// **VALUE**: Verifies that records survive a JSON round trip through serde.
///
/// **WHY THIS MATTERS**: The trust store persists records as JSON files.
///
/// **BUG THIS CATCHES**: Would catch if a field is marked `skip` or renamed inconsistently.
#[test]
fn given_trust_record_when_serialized_to_json_then_contains_all_fields() {
    // GIVEN: A record
    let record = TrustRecordBuilder::default()
        .with_identity("linkd")
        .with_address("10.0.0.5:7443")
        .with_fingerprint(VALID_FINGERPRINT)
        .with_first_seen(42)
        .build()
        .expect("record should build");

    // WHEN: Serializing
    let json = serde_json::to_string(&record).expect("serialize");

    // THEN: Every field is present
    for field in ["identity", "address", "fingerprint", "first_seen"] {
        assert!(json.contains(field), "JSON should contain {field}");
    }
}
