//! Startup configuration handed to the engine
//!
//! [`StartOptions`] is what callers fill in. [`ConfigRecord`] is the wire
//! contract the engine's `init` entry point parses; its field names and
//! their capitalization are fixed by the engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::identity::{DataKey, Key, Secret};

/// Default listen port
pub const DEFAULT_PORT: u16 = 8000;

/// Default replication distance in the follow graph
pub const DEFAULT_HOPS: u32 = 1;

/// Caller-facing startup options.
///
/// Can be built in code or loaded from a JSON file:
///
/// ```json
/// {
///   "network": "4vVhFHLFHeyutypUO842SyFd5jRIVhAyiZV29ftnKSU=",
///   "secret": { "curve": "ed25519", "id": "@…", "private": "…", "public": "…" },
///   "repo_path": "/var/lib/bot",
///   "port": 0
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOptions {
    pub network: DataKey,
    #[serde(default)]
    pub hmac_key: Option<DataKey>,
    pub secret: Secret,
    pub repo_path: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_hops")]
    pub hops: u32,
    #[serde(default)]
    pub schema_version: u32,
    /// Identities of services trusted to issue bearer tokens
    #[serde(default)]
    pub service_pubs: Option<Vec<Key>>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_hops() -> u32 {
    DEFAULT_HOPS
}

impl StartOptions {
    pub fn new(network: DataKey, secret: Secret, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            network,
            hmac_key: None,
            secret,
            repo_path: repo_path.into(),
            port: DEFAULT_PORT,
            hops: DEFAULT_HOPS,
            schema_version: 0,
            service_pubs: None,
        }
    }

    /// Load options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            BridgeError::processing(format!("start options in {} are invalid", path.display()), e)
        })
    }

    pub fn with_hmac_key(mut self, hmac_key: DataKey) -> Self {
        self.hmac_key = Some(hmac_key);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_hops(mut self, hops: u32) -> Self {
        self.hops = hops;
        self
    }

    pub fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    pub fn with_service_pubs(mut self, service_pubs: Vec<Key>) -> Self {
        self.service_pubs = Some(service_pubs);
        self
    }

    /// Listen address in the engine's `host:port` form (host left empty).
    pub fn listen_addr(&self) -> String {
        format!(":{}", self.port)
    }
}

/// The serialized startup contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigRecord {
    /// Network key, base64
    #[serde(rename = "AppKey")]
    pub app_key: String,
    /// HMAC key, base64. Empty string when absent, never null.
    #[serde(rename = "HMACKey")]
    pub hmac_key: String,
    /// The keypair record, itself JSON-encoded
    #[serde(rename = "KeyBlob")]
    pub key_blob: String,
    #[serde(rename = "Repo")]
    pub repo: String,
    #[serde(rename = "ListenAddr")]
    pub listen_addr: String,
    #[serde(rename = "Hops")]
    pub hops: u32,
    #[serde(rename = "SchemaVersion")]
    pub schema_version: u32,
    /// Empty list when unset, never absent
    #[serde(rename = "ServicePubs")]
    pub service_pubs: Vec<String>,
    #[serde(rename = "Testing")]
    pub testing: bool,
}

impl ConfigRecord {
    /// Assemble the record from startup options.
    pub fn build(options: &StartOptions) -> BridgeResult<Self> {
        Ok(Self {
            app_key: options.network.as_base64().to_string(),
            hmac_key: options
                .hmac_key
                .as_ref()
                .map(|k| k.as_base64().to_string())
                .unwrap_or_default(),
            key_blob: options.secret.to_json()?,
            repo: options.repo_path.to_string_lossy().into_owned(),
            listen_addr: options.listen_addr(),
            hops: options.hops,
            schema_version: options.schema_version,
            service_pubs: options
                .service_pubs
                .iter()
                .flatten()
                .map(|k| k.as_str().to_string())
                .collect(),
            testing: cfg!(debug_assertions),
        })
    }

    /// Serialize to the JSON object the engine's `init` expects.
    pub fn to_json(&self) -> BridgeResult<String> {
        serde_json::to_string(self).map_err(|e| BridgeError::processing("config prep failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    const NETWORK: &str = "4vVhFHLFHeyutypUO842SyFd5jRIVhAyiZV29ftnKSU=";
    const HMAC: &str = "1MQuQUGsRDyMyrFQQRdj8VVsBwn/t0bX7QQRQisMWjY=";
    const SECRET: &str = r#"{"curve":"ed25519","id":"@shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ggfeed-v1","private":"RdUdi8VQFb38R3Tyv9/iWZwRmCy1L1GfbR6JVrTLHkKyHBAZqLT1O/4+NuB17qWaFCFzfg1RG0/aLCcjTGwq1A==.ed25519","public":"shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ed25519"}"#;

    fn options() -> StartOptions {
        StartOptions::new(
            DataKey::from_base64(NETWORK).unwrap(),
            Secret::from_json(SECRET).unwrap(),
            "/tmp/repo",
        )
    }

    #[test]
    fn test_wire_field_names() {
        let json = ConfigRecord::build(&options()).unwrap().to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();

        let mut names: Vec<&str> = object.keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "AppKey",
                "HMACKey",
                "Hops",
                "KeyBlob",
                "ListenAddr",
                "Repo",
                "SchemaVersion",
                "ServicePubs",
                "Testing"
            ]
        );
    }

    #[test]
    fn test_absent_hmac_and_services_render_empty() {
        let value: Value =
            serde_json::from_str(&ConfigRecord::build(&options()).unwrap().to_json().unwrap())
                .unwrap();

        assert_eq!(value["HMACKey"], Value::String(String::new()));
        assert_eq!(value["ServicePubs"], Value::Array(vec![]));
        assert_eq!(value["ListenAddr"], ":8000");
        assert_eq!(value["Hops"], 1);
        assert_eq!(value["SchemaVersion"], 0);
        assert_eq!(value["Testing"], cfg!(debug_assertions));
    }

    #[test]
    fn test_key_blob_is_double_encoded() {
        let record = ConfigRecord::build(&options()).unwrap();
        let value: Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

        let blob = value["KeyBlob"].as_str().unwrap();
        assert_eq!(Secret::from_json(blob).unwrap(), Secret::from_json(SECRET).unwrap());
    }

    #[test]
    fn test_overrides_are_rendered() {
        let opts = options()
            .with_hmac_key(DataKey::from_base64(HMAC).unwrap())
            .with_port(0)
            .with_hops(3)
            .with_schema_version(2)
            .with_service_pubs(vec![Key::new(
                "@shwQGai09Tv+Pjbgde6lmhQhc34NURtP2iwnI0xsKtQ=.ed25519",
            )]);
        let record = ConfigRecord::build(&opts).unwrap();

        assert_eq!(record.hmac_key, HMAC);
        assert_eq!(record.listen_addr, ":0");
        assert_eq!(record.hops, 3);
        assert_eq!(record.schema_version, 2);
        assert_eq!(record.service_pubs.len(), 1);
        assert_eq!(record.repo, "/tmp/repo");
    }

    #[test]
    fn test_options_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.json");
        let body = format!(
            r#"{{"network":"{}","secret":{},"repo_path":"/data/bot","port":9000}}"#,
            NETWORK, SECRET
        );
        std::fs::write(&path, body).unwrap();

        let opts = StartOptions::from_json_file(&path).unwrap();
        assert_eq!(opts.port, 9000);
        assert_eq!(opts.hops, DEFAULT_HOPS);
        assert!(opts.hmac_key.is_none());
        assert_eq!(opts.repo_path, PathBuf::from("/data/bot"));
    }

    #[test]
    fn test_options_with_short_network_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.json");
        let body = format!(
            r#"{{"network":"aGVsbG8=","secret":{},"repo_path":"/data/bot"}}"#,
            SECRET
        );
        std::fs::write(&path, body).unwrap();

        let err = StartOptions::from_json_file(&path).unwrap_err();
        assert!(matches!(err, BridgeError::DuringProcessing { .. }));
    }
}
