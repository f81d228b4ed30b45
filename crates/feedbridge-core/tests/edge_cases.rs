//! Edge case and boundary condition tests
//!
//! These tests cover malformed identifiers, key material and config input
//! as they arrive from files, peers and the engine.

use std::io::Write;

use feedbridge_core::{
    Algorithm, Bot, BridgeError, ConfigRecord, DataKey, Key, MemoryEngine, Secret, Sigil,
    StartOptions, DEFAULT_HOPS, DEFAULT_PORT,
};
use serde_json::{json, Value};

const NETWORK: &str = "4vVhFHLFHeyutypUO842SyFd5jRIVhAyiZV29ftnKSU=";
const SECRET: &str = r#"{"curve":"ed25519","id":"@shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ggfeed-v1","private":"RdUdi8VQFb38R3Tyv9/iWZwRmCy1L1GfbR6JVrTLHkKyHBAZqLT1O/4+NuB17qWaFCFzfg1RG0/aLCcjTGwq1A==.ed25519","public":"shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ed25519"}"#;

// ============================================================================
// Identifiers
// ============================================================================

#[test]
fn test_malformed_identifiers_never_panic() {
    let inputs = [
        "",
        "&",
        "=",
        ".",
        "&abc.sha256",
        "&abc=.sha256.extra",
        "&abc=",
        "@abc=.unknown",
        "🦀abc=.sha256",
    ];

    for input in inputs {
        let key = Key::new(input);
        assert!(!key.is_valid(), "{input} should be invalid");
        assert!(key.decoded_bytes().is_none());
        assert_eq!(key.hex(), "");
    }
}

#[test]
fn test_classification_ignores_validity() {
    assert_eq!(Key::new("%abc.sha256").sigil(), Sigil::Message);
    assert_eq!(Key::new("%abc.sha256").algorithm(), Algorithm::Sha256);
    assert_eq!(Key::new("garbage.ggfeed-v1").algorithm(), Algorithm::GgFeed);
    assert_eq!(Key::new("garbage").algorithm(), Algorithm::Unsupported);
}

#[test]
fn test_lenient_payload_decoding() {
    // Characters outside the alphabet are skipped
    let key = Key::new("&3q2+\n7w==.sha256");
    assert!(key.is_valid());
    assert_eq!(key.hex(), "deadbeef");
}

#[test]
fn test_key_serde_is_plain_string() {
    let key = Key::new("@shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ggfeed-v1");
    let json = serde_json::to_string(&key).unwrap();
    assert_eq!(json, format!("\"{key}\""));

    let back: Key = serde_json::from_str(&json).unwrap();
    assert_eq!(back, key);
}

// ============================================================================
// Key Material
// ============================================================================

#[test]
fn test_data_key_lengths() {
    assert!(DataKey::from_base64(NETWORK).is_ok());
    assert!(matches!(
        DataKey::from_base64("c2hvcnQ="),
        Err(BridgeError::InvalidDataKey(_))
    ));
    assert!(matches!(
        DataKey::from_bytes(&[7u8; 33]),
        Err(BridgeError::InvalidDataKey(_))
    ));
    assert!(DataKey::from_base64("").is_err());
}

#[test]
fn test_data_key_requires_padding() {
    let unpadded = NETWORK.trim_end_matches('=');
    assert!(matches!(
        DataKey::from_base64(unpadded),
        Err(BridgeError::InvalidDataKey(_))
    ));

    let key = DataKey::from_bytes(DataKey::from_base64(NETWORK).unwrap().as_bytes()).unwrap();
    assert_eq!(key.as_base64(), NETWORK);
}

#[test]
fn test_short_padding_does_not_decode() {
    let key = Key::new("&AQ=.sha256");
    assert!(key.is_valid());
    assert!(key.decoded_bytes().is_none());
    assert_eq!(key.hex(), "");
}

#[test]
fn test_escaped_secret_decodes_identically() {
    let secret = Secret::from_json(SECRET).unwrap();
    let escaped = secret.to_json_escaped().unwrap();
    assert!(escaped.contains("\\/"));
    assert_eq!(Secret::from_json(&escaped).unwrap(), secret);
}

#[test]
fn test_truncated_secret_is_processing_error() {
    let err = Secret::from_json(&SECRET[..40]).unwrap_err();
    assert!(matches!(err, BridgeError::DuringProcessing { .. }));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_options_file_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let body = json!({
        "network": NETWORK,
        "secret": serde_json::from_str::<Value>(SECRET).unwrap(),
        "repo_path": "/var/lib/feedbridge",
    });
    write!(file, "{body}").unwrap();

    let options = StartOptions::from_json_file(file.path()).unwrap();
    assert_eq!(options.port, DEFAULT_PORT);
    assert_eq!(options.hops, DEFAULT_HOPS);
    assert_eq!(options.schema_version, 0);
    assert!(options.hmac_key.is_none());
    assert!(options.service_pubs.is_none());

    let record: Value =
        serde_json::from_str(&ConfigRecord::build(&options).unwrap().to_json().unwrap()).unwrap();
    assert_eq!(record["HMACKey"], "");
    assert_eq!(record["ServicePubs"], json!([]));
    assert_eq!(record["ListenAddr"], ":8000");

    // The keypair travels as a JSON string inside the record
    let key_blob = record["KeyBlob"].as_str().unwrap();
    assert_eq!(Secret::from_json(key_blob).unwrap().id, Secret::from_json(SECRET).unwrap().id);
}

#[test]
fn test_options_file_with_short_network_key() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let body = json!({
        "network": "c2hvcnQ=",
        "secret": serde_json::from_str::<Value>(SECRET).unwrap(),
        "repo_path": "/var/lib/feedbridge",
    });
    write!(file, "{body}").unwrap();

    let err = StartOptions::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, BridgeError::DuringProcessing { .. }));
}

#[test]
fn test_missing_options_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = StartOptions::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, BridgeError::Io(_)));
}

#[test]
fn test_service_pubs_and_hmac_rendered() {
    let options = StartOptions::new(
        DataKey::from_base64(NETWORK).unwrap(),
        Secret::from_json(SECRET).unwrap(),
        "/repo",
    )
    .with_hmac_key(DataKey::from_bytes(&[1u8; 32]).unwrap())
    .with_hops(3)
    .with_service_pubs(vec![Key::new("@svc=.ed25519")]);

    let record = ConfigRecord::build(&options).unwrap();
    assert_eq!(record.hmac_key, DataKey::from_bytes(&[1u8; 32]).unwrap().as_base64());
    assert_eq!(record.hops, 3);
    assert_eq!(record.service_pubs, vec!["@svc=.ed25519".to_string()]);
    assert_eq!(record.testing, cfg!(debug_assertions));
}

// ============================================================================
// Facade Boundaries
// ============================================================================

#[test]
fn test_empty_blob() {
    let repo = tempfile::tempdir().unwrap();
    let bot = Bot::new(MemoryEngine::new());
    let options = StartOptions::new(
        DataKey::from_base64(NETWORK).unwrap(),
        bot.create_secret().unwrap(),
        repo.path(),
    );
    bot.start(&options).unwrap();

    let key = bot.add_blob(&[]).unwrap();
    assert_eq!(
        key.hex(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(bot.get_blob(&key).unwrap().unwrap(), Vec::<u8>::new());
}

#[test]
fn test_publish_unserializable_content() {
    let repo = tempfile::tempdir().unwrap();
    let bot = Bot::new(MemoryEngine::new());
    let options = StartOptions::new(
        DataKey::from_base64(NETWORK).unwrap(),
        bot.create_secret().unwrap(),
        repo.path(),
    );
    bot.start(&options).unwrap();

    // Non-string map keys cannot become JSON
    let mut content = std::collections::HashMap::new();
    content.insert(vec![1u8], "value");
    let err = bot.publish(&content).unwrap_err();
    assert!(err.to_string().starts_with("publish prep failed"));
}
