//! In-process engine
//!
//! Implements the whole [`Engine`] contract without a network: feeds and
//! the receive log live in memory, blobs are written to the repository's
//! real blob store layout, peers are bookkeeping only. Test helpers let a
//! caller play the remote side (delivering blobs, issuing tokens).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{PipeReader, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{Engine, FsckMode};
use crate::blobs::{blob_path, blob_store_root};
use crate::events::CallbackSink;
use crate::identity::{encode_base64, Algorithm, DataKey, Key, Secret, Sigil};

const VERSION: &str = "memory-1";

/// Suffix marking encrypted (private) message content
const PRIVATE_BOX_SUFFIX: &str = ".box";

/// Distance reported for blobs this node wants itself
const OWN_WANT_DISTANCE: i64 = -1;

/// The subset of the config record the memory engine needs
#[derive(Deserialize)]
struct WireConfig {
    #[serde(rename = "AppKey")]
    app_key: String,
    #[serde(rename = "KeyBlob")]
    key_blob: String,
    #[serde(rename = "Repo")]
    repo: String,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    key: String,
    author: String,
    sequence: u64,
    /// `None` once nulled
    content: Option<Value>,
    timestamp: i64,
}

impl StoredMessage {
    fn to_json(&self, receive_seq: usize) -> Value {
        json!({
            "key": self.key,
            "value": {
                "author": self.author,
                "sequence": self.sequence,
                "content": self.content,
                "timestamp": self.timestamp,
            },
            "receiveLogSequence": receive_seq,
        })
    }

    fn is_private(&self) -> bool {
        matches!(&self.content, Some(Value::String(s)) if s.ends_with(PRIVATE_BOX_SUFFIX))
    }
}

#[derive(Debug, Clone)]
struct PeerEntry {
    addr: String,
    since: String,
}

#[derive(Default)]
struct MemoryState {
    running: bool,
    sink: Option<CallbackSink>,
    repo: Option<PathBuf>,
    identity: Option<Secret>,
    log: Vec<StoredMessage>,
    named_keys: HashMap<String, Secret>,
    wants: Vec<String>,
    want_requests: usize,
    peers: Vec<PeerEntry>,
    blocked: HashSet<String>,
    replicated: HashSet<String>,
    invites: Vec<String>,
    fail_init: bool,
    fail_network: bool,
    fail_fsck: bool,
    abandon_blob_streams: bool,
    init_delay: Option<Duration>,
}

impl MemoryState {
    fn latest_sequence(&self, author: &str) -> u64 {
        self.log
            .iter()
            .filter(|m| m.author == author)
            .map(|m| m.sequence)
            .max()
            .unwrap_or(0)
    }

    fn feed_sequences(&self) -> BTreeMap<String, u64> {
        let mut feeds = BTreeMap::new();
        for message in &self.log {
            let seq = feeds.entry(message.author.clone()).or_insert(0);
            *seq = (*seq).max(message.sequence);
        }
        feeds
    }

    fn append(&mut self, author: &str, content_json: &str) -> Option<String> {
        let content: Value = match serde_json::from_str(content_json) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "refusing to publish malformed content");
                return None;
            }
        };
        let sequence = self.latest_sequence(author) + 1;

        let mut hasher = Sha256::new();
        hasher.update(author.as_bytes());
        hasher.update(sequence.to_be_bytes());
        hasher.update(content_json.as_bytes());
        let key = Key::from_parts(Sigil::Message, &hasher.finalize(), Algorithm::GgFeedMsg);

        debug!(%key, author, sequence, "appended message");
        self.log.push(StoredMessage {
            key: key.to_string(),
            author: author.to_string(),
            sequence,
            content: Some(content),
            timestamp: Utc::now().timestamp_millis(),
        });
        Some(key.to_string())
    }
}

/// In-memory [`Engine`] backed by a real on-disk blob store.
#[derive(Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `init` sleep first, widening the starting window.
    pub fn with_init_delay(self, delay: Duration) -> Self {
        self.state.lock().init_delay = Some(delay);
        self
    }

    /// Make subsequent `init` calls fail.
    pub fn set_fail_init(&self, fail: bool) {
        self.state.lock().fail_init = fail;
    }

    /// Make peer dialing and disconnecting report failure.
    pub fn set_fail_network(&self, fail: bool) {
        self.state.lock().fail_network = fail;
    }

    /// Make `offset_fsck` report a damaged repository.
    pub fn set_fail_fsck(&self, fail: bool) {
        self.state.lock().fail_fsck = fail;
    }

    /// Make `blobs_add` close its stream unread and report failure.
    pub fn set_abandon_blob_streams(&self, abandon: bool) {
        self.state.lock().abandon_blob_streams = abandon;
    }

    /// Blobs requested through `blobs_want` and not yet delivered, in request order.
    pub fn wants(&self) -> Vec<Key> {
        self.state.lock().wants.iter().map(Key::new).collect()
    }

    /// Number of `blobs_want` calls, repeats included.
    pub fn want_requests(&self) -> usize {
        self.state.lock().want_requests
    }

    /// Multiserver addresses of connected peers.
    pub fn connected_peers(&self) -> Vec<String> {
        self.state.lock().peers.iter().map(|p| p.addr.clone()).collect()
    }

    /// Currently blocked feeds, sorted.
    pub fn blocked(&self) -> Vec<Key> {
        let mut blocked: Vec<Key> = self.state.lock().blocked.iter().map(Key::new).collect();
        blocked.sort();
        blocked
    }

    pub fn is_blocked(&self, feed: &Key) -> bool {
        self.state.lock().blocked.contains(feed.as_str())
    }

    pub fn is_replicated(&self, feed: &Key) -> bool {
        self.state.lock().replicated.contains(feed.as_str())
    }

    pub fn accepted_invites(&self) -> Vec<String> {
        self.state.lock().invites.clone()
    }

    /// Play a peer handing us a blob: store it, satisfy any want and
    /// fire the blob-received callback.
    pub fn deliver_blob(&self, data: &[u8]) -> Option<Key> {
        let (key, sink) = {
            let mut state = self.state.lock();
            let repo = state.repo.clone()?;
            let key = store_blob(&repo, data)?;
            state.wants.retain(|w| w != key.as_str());
            (key, state.sink.clone())
        };
        if let Some(sink) = sink {
            sink.blob_received(data.len() as i64, key.as_str());
        }
        Some(key)
    }

    /// Play a trusted service issuing a bearer token.
    pub fn issue_bearer_token(&self, token: &str, expires_unix: i64) -> bool {
        let sink = self.state.lock().sink.clone();
        sink.is_some_and(|sink| sink.bearer_token(token, expires_unix))
    }
}

fn generate_secret() -> Option<Secret> {
    let mut seed = [0u8; 32];
    if let Err(e) = getrandom::getrandom(&mut seed) {
        warn!(error = %e, "no randomness for keypair");
        return None;
    }
    let signing = SigningKey::from_bytes(&seed);
    let public = signing.verifying_key().to_bytes();

    Some(Secret {
        curve: Algorithm::Ed25519,
        id: Key::from_parts(Sigil::Feed, &public, Algorithm::GgFeed).to_string(),
        private_key: format!(
            "{}{}",
            encode_base64(&signing.to_keypair_bytes()),
            Algorithm::Ed25519.suffix()
        ),
        public_key: format!("{}{}", encode_base64(&public), Algorithm::Ed25519.suffix()),
    })
}

fn store_blob(repo: &Path, data: &[u8]) -> Option<Key> {
    let digest = Sha256::digest(data);
    let key = Key::from_parts(Sigil::Blob, &digest, Algorithm::Sha256);
    let path = blob_path(repo, &key).ok()?;

    let written = path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| std::fs::write(&path, data));
    if let Err(e) = written {
        warn!(error = %e, ?path, "failed to store blob");
        return None;
    }
    debug!(%key, len = data.len(), "stored blob");
    Some(key)
}

fn json_page<'a>(
    entries: impl Iterator<Item = (usize, &'a StoredMessage)>,
    start_seq: u64,
    limit: i32,
) -> Option<String> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let start = usize::try_from(start_seq).unwrap_or(usize::MAX);
    let page: Vec<Value> = entries
        .filter(|(seq, _)| *seq >= start)
        .take(limit)
        .map(|(seq, message)| message.to_json(seq))
        .collect();
    serde_json::to_string(&page).ok()
}

impl Engine for MemoryEngine {
    fn version(&self) -> Option<String> {
        Some(VERSION.to_string())
    }

    fn init(&self, config_json: &str, callbacks: CallbackSink) -> bool {
        let config: WireConfig = match serde_json::from_str(config_json) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "unreadable config");
                return false;
            }
        };
        if let Err(e) = DataKey::from_base64(&config.app_key) {
            warn!(error = %e, "bad network key");
            return false;
        }
        let identity = match Secret::from_json(&config.key_blob) {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "bad key blob");
                return false;
            }
        };

        let delay = {
            let state = self.state.lock();
            if state.running || state.fail_init {
                return false;
            }
            state.init_delay
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let repo = PathBuf::from(config.repo);
        if let Err(e) = std::fs::create_dir_all(blob_store_root(&repo)) {
            warn!(error = %e, ?repo, "cannot create repository");
            return false;
        }

        let mut state = self.state.lock();
        info!(?repo, feed = %identity.id, "memory engine started");
        state.running = true;
        state.sink = Some(callbacks);
        state.repo = Some(repo);
        state.identity = Some(identity);
        true
    }

    fn stop(&self) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        state.running = false;
        state.sink = None;
        state.peers.clear();
        info!("memory engine stopped");
        true
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn open_connections(&self) -> u32 {
        self.state.lock().peers.len() as u32
    }

    fn gen_keypair(&self) -> Option<String> {
        generate_secret()?.to_json().ok()
    }

    fn repo_stats(&self) -> Option<String> {
        let state = self.state.lock();
        if !state.running {
            return None;
        }
        let stats = json!({
            "messages": state.log.len(),
            "feeds": state.feed_sequences().len(),
            "lastHash": state.log.last().map(|m| m.key.as_str()).unwrap_or(""),
        });
        Some(stats.to_string())
    }

    fn bot_status(&self) -> Option<String> {
        let state = self.state.lock();
        if !state.running {
            return None;
        }
        let peers: Vec<Value> = state
            .peers
            .iter()
            .map(|p| json!({ "Addr": p.addr, "Since": p.since }))
            .collect();
        let blobs: Vec<Value> = state
            .wants
            .iter()
            .map(|w| json!({ "Ref": w, "Dist": OWN_WANT_DISTANCE }))
            .collect();
        let status = json!({ "Root": state.log.len(), "Peers": peers, "Blobs": blobs });
        Some(status.to_string())
    }

    fn offset_fsck(&self, mode: FsckMode) -> i32 {
        let (feeds, sink) = {
            let state = self.state.lock();
            if !state.running {
                return -1;
            }
            if state.fail_fsck {
                return 1;
            }
            (state.feed_sequences(), state.sink.clone())
        };
        debug!(?mode, feeds = feeds.len(), "running fsck");

        let total = feeds.len();
        if let Some(sink) = sink {
            if total == 0 {
                sink.fsck_progress(100.0, "nothing to check");
            }
            for checked in 1..=total {
                let percent = checked as f64 / total as f64 * 100.0;
                sink.fsck_progress(percent, &format!("{} feeds left", total - checked));
            }
        }
        0
    }

    fn heal_repo(&self) -> Option<String> {
        if !self.is_running() {
            return None;
        }
        // Feeds are appended in order, so there is never anything to repair
        Some(json!({ "Authors": [], "Messages": 0 }).to_string())
    }

    fn stream_root_log(&self, start_seq: u64, limit: i32) -> Option<String> {
        let state = self.state.lock();
        if !state.running {
            return None;
        }
        json_page(state.log.iter().enumerate(), start_seq, limit)
    }

    fn stream_private_log(&self, start_seq: u64, limit: i32) -> Option<String> {
        let state = self.state.lock();
        if !state.running {
            return None;
        }
        json_page(
            state.log.iter().enumerate().filter(|(_, m)| m.is_private()),
            start_seq,
            limit,
        )
    }

    fn replicate_up_to(&self) -> Option<String> {
        let state = self.state.lock();
        if !state.running {
            return None;
        }
        let mut feeds = state.feed_sequences();
        for feed in &state.replicated {
            feeds.entry(feed.clone()).or_insert(0);
        }
        serde_json::to_string(&feeds).ok()
    }

    fn publish(&self, content_json: &str) -> Option<String> {
        let mut state = self.state.lock();
        if !state.running {
            return None;
        }
        let author = state.identity.as_ref()?.id.clone();
        state.append(&author, content_json)
    }

    fn blobs_add(&self, mut source: PipeReader) -> Option<String> {
        if self.state.lock().abandon_blob_streams {
            warn!("closing blob stream unread");
            return None;
        }
        let mut data = Vec::new();
        if let Err(e) = source.read_to_end(&mut data) {
            warn!(error = %e, "failed reading blob stream");
            return None;
        }

        let (key, sink) = {
            let state = self.state.lock();
            if !state.running {
                return None;
            }
            let repo = state.repo.clone()?;
            (store_blob(&repo, &data)?, state.sink.clone())
        };
        if let Some(sink) = sink {
            sink.blob_received(data.len() as i64, key.as_str());
        }
        Some(key.to_string())
    }

    fn blobs_want(&self, reference: &str) -> bool {
        let mut state = self.state.lock();
        state.want_requests += 1;
        if !state.running || !Key::new(reference).is_valid() {
            return false;
        }
        if !state.wants.iter().any(|w| w == reference) {
            state.wants.push(reference.to_string());
        }
        true
    }

    fn connect_peer(&self, multiaddr: &str) -> bool {
        let mut state = self.state.lock();
        if !state.running || state.fail_network {
            return false;
        }
        let Some((addr, key)) = multiaddr
            .strip_prefix("net:")
            .and_then(|rest| rest.split_once("~shs:"))
        else {
            warn!(multiaddr, "unparseable multiserver address");
            return false;
        };
        if addr.is_empty() || key.is_empty() {
            warn!(multiaddr, "multiserver address without host or key");
            return false;
        }
        state.peers.push(PeerEntry {
            addr: multiaddr.to_string(),
            since: Utc::now().to_rfc3339(),
        });
        true
    }

    fn disconnect_all_peers(&self) -> bool {
        let mut state = self.state.lock();
        if state.fail_network {
            return false;
        }
        state.peers.clear();
        state.running
    }

    fn connect_peers(&self, count: u32) -> bool {
        debug!(count, "connect peers requested");
        let state = self.state.lock();
        state.running && !state.fail_network
    }

    fn feed_block(&self, id: &str, blocked: bool) {
        let mut state = self.state.lock();
        if blocked {
            state.blocked.insert(id.to_string());
        } else {
            state.blocked.remove(id);
        }
    }

    fn feed_replicate(&self, id: &str, replicate: bool) {
        let mut state = self.state.lock();
        if replicate {
            state.replicated.insert(id.to_string());
        } else {
            state.replicated.remove(id);
        }
    }

    fn null_content(&self, author: &str, sequence: u64) -> i32 {
        let mut state = self.state.lock();
        match state
            .log
            .iter_mut()
            .find(|m| m.author == author && m.sequence == sequence)
        {
            Some(message) => {
                message.content = None;
                0
            }
            None => 1,
        }
    }

    fn null_feed(&self, author: &str) -> i32 {
        let mut state = self.state.lock();
        let before = state.log.len();
        state.log.retain(|m| m.author != author);
        debug!(author, removed = before - state.log.len(), "nulled feed");
        0
    }

    fn invite_accept(&self, token: &str) -> bool {
        let mut state = self.state.lock();
        if !state.running || token.trim().is_empty() {
            return false;
        }
        state.invites.push(token.to_string());
        true
    }

    fn drop_index_data(&self) -> bool {
        self.is_running()
    }

    fn testing_make_named_key(&self, nick: &str) -> i32 {
        if nick.is_empty() {
            return 1;
        }
        let Some(secret) = generate_secret() else {
            return 1;
        };
        self.state.lock().named_keys.insert(nick.to_string(), secret);
        0
    }

    fn testing_publish_as(&self, nick: &str, content_json: &str) -> Option<String> {
        let mut state = self.state.lock();
        if !state.running {
            return None;
        }
        let author = state.named_keys.get(nick)?.id.clone();
        state.append(&author, content_json)
    }
}
