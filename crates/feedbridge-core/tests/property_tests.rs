//! Property-based tests for identifiers and blob addressing
//!
//! Uses proptest to check the identifier grammar and the store layout
//! against arbitrary payloads.

use std::path::Path;

use feedbridge_core::{blob_path, Algorithm, Key, Sigil};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

fn sigil_strategy() -> impl Strategy<Value = Sigil> {
    prop_oneof![Just(Sigil::Blob), Just(Sigil::Feed), Just(Sigil::Message)]
}

fn algorithm_strategy() -> impl Strategy<Value = Algorithm> {
    prop_oneof![
        Just(Algorithm::Sha256),
        Just(Algorithm::Ed25519),
        Just(Algorithm::GgFeed),
        Just(Algorithm::GgFeedMsg),
    ]
}

/// Payload lengths that always render with `=` padding
fn padded_payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0..20usize).prop_flat_map(|n| prop::collection::vec(any::<u8>(), 3 * n + 1..=3 * n + 2))
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// A canonical identifier re-renders unchanged and keeps its parts
    #[test]
    fn key_round_trip(
        sigil in sigil_strategy(),
        payload in padded_payload_strategy(),
        algorithm in algorithm_strategy(),
    ) {
        let key = Key::from_parts(sigil, &payload, algorithm);
        let reparsed: Key = key.as_str().parse().unwrap();

        prop_assert_eq!(reparsed.to_string(), key.as_str());
        prop_assert!(reparsed.is_valid());
        prop_assert_eq!(reparsed.sigil(), sigil);
        prop_assert_eq!(reparsed.algorithm(), algorithm);
        prop_assert_eq!(reparsed.decoded_bytes(), Some(payload));
    }

    /// Hex output is lowercase and twice the decoded length
    #[test]
    fn hex_is_double_length(payload in padded_payload_strategy()) {
        let key = Key::from_parts(Sigil::Blob, &payload, Algorithm::Sha256);
        let bytes = key.decoded_bytes().unwrap();
        let hex = key.hex();

        prop_assert_eq!(hex.len(), 2 * bytes.len());
        prop_assert!(hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
    }

    /// Blob paths shard on the first two hex characters
    #[test]
    fn blob_path_shards_digest(digest in prop::array::uniform32(any::<u8>())) {
        let key = Key::from_parts(Sigil::Blob, &digest, Algorithm::Sha256);
        let root = Path::new("/repo");
        let path = blob_path(root, &key).unwrap();

        let dir = path.parent().unwrap();
        let shard = dir.file_name().unwrap().to_str().unwrap();
        let rest = path.file_name().unwrap().to_str().unwrap();

        prop_assert_eq!(dir.parent().unwrap(), root.join("blobs").join("sha256"));
        prop_assert_eq!(shard.len(), 2);
        prop_assert_eq!(format!("{shard}{rest}"), key.hex());
    }

    /// Without a recognized sigil nothing is valid, whatever the suffix
    #[test]
    fn unknown_sigil_never_valid(
        lead in "[^&@%]",
        payload in padded_payload_strategy(),
        algorithm in algorithm_strategy(),
    ) {
        let canonical = Key::from_parts(Sigil::Feed, &payload, algorithm);
        let key = Key::new(format!("{lead}{}", &canonical.as_str()[1..]));

        prop_assert_eq!(key.sigil(), Sigil::Unsupported);
        prop_assert!(!key.is_valid());
        prop_assert!(key.decoded_bytes().is_none());
        prop_assert_eq!(key.hex(), "");
    }

    /// Parsing arbitrary text never panics
    #[test]
    fn parse_is_total(text in ".{0,80}") {
        let key = Key::new(text);
        let _ = key.sigil();
        let _ = key.algorithm();
        if key.is_valid() {
            prop_assert!(key.payload().is_some());
        } else {
            prop_assert_eq!(key.hex(), "");
        }
    }
}
