//! Bot - the stateful facade over a replication engine
//!
//! Bot owns the engine handle, the lifecycle state machine and the
//! [`EventBus`] the engine's callbacks are delivered through. Every engine
//! call blocks the calling thread until the engine returns.
//!
//! # Example
//!
//! ```ignore
//! use feedbridge_core::{Bot, DataKey, MemoryEngine, StartOptions};
//!
//! let bot = Bot::new(MemoryEngine::new());
//! let secret = bot.create_secret()?;
//! let network = DataKey::from_base64("4vVhFHLFHeyutypUO842SyFd5jRIVhAyiZV29ftnKSU=")?;
//!
//! bot.events().on_blob_received(|key, size| println!("got {key} ({size} bytes)"));
//! bot.start(&StartOptions::new(network, secret, "/var/lib/feedbridge"))?;
//!
//! let key = bot.publish(&serde_json::json!({"type": "post", "text": "hi"}))?;
//! ```

use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::thread;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::blobs;
use crate::config::{ConfigRecord, StartOptions};
use crate::engine::{Engine, FsckMode};
use crate::error::{BridgeError, BridgeResult};
use crate::events::EventBus;
use crate::identity::{Algorithm, Key, Secret};
use crate::types::{BotStatus, FeedList, HealReport, Peer, Statistics};

const BLOB_WRITER_THREAD_NAME: &str = "feedbridge-blob-writer";

/// Lifecycle of the engine behind a [`Bot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotState::Stopped => write!(f, "stopped"),
            BotState::Starting => write!(f, "starting"),
            BotState::Running => write!(f, "running"),
            BotState::Stopping => write!(f, "stopping"),
        }
    }
}

struct Lifecycle {
    state: BotState,
    /// Repository root of the running engine
    repo_path: Option<PathBuf>,
}

pub struct Bot<E: Engine> {
    engine: E,
    /// Serializes state transitions; never held across an engine call
    lifecycle: Mutex<Lifecycle>,
    events: EventBus,
}

impl<E: Engine> Bot<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            lifecycle: Mutex::new(Lifecycle {
                state: BotState::Stopped,
                repo_path: None,
            }),
            events: EventBus::new(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Subscribe here for blob, bearer token and fsck notifications.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self) -> BotState {
        self.lifecycle.lock().state
    }

    /// Repository root, known while running.
    pub fn repo_path(&self) -> Option<PathBuf> {
        self.lifecycle.lock().repo_path.clone()
    }

    pub fn version(&self) -> Option<String> {
        self.engine.version()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn open_connections(&self) -> u32 {
        self.engine.open_connections()
    }

    fn set_state(&self, state: BotState) {
        self.lifecycle.lock().state = state;
    }

    /// Fails with `NotRunning` unless started; returns the repository root.
    fn ensure_running(&self, operation: &'static str) -> BridgeResult<PathBuf> {
        let lifecycle = self.lifecycle.lock();
        match (&lifecycle.state, &lifecycle.repo_path) {
            (BotState::Running, Some(repo)) => Ok(repo.clone()),
            (state, _) => {
                debug!(operation, %state, "rejecting operation");
                Err(BridgeError::NotRunning { operation })
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Generate a fresh keypair. Works whether or not the engine runs.
    pub fn create_secret(&self) -> BridgeResult<Secret> {
        let text = self
            .engine
            .gen_keypair()
            .ok_or_else(|| BridgeError::UnexpectedFault("keypair generation failed".into()))?;
        Secret::from_json(&text)
    }

    /// Start the engine. Only valid while stopped.
    ///
    /// A concurrent second call fails with `AlreadyStarted` without
    /// reaching the engine.
    pub fn start(&self, options: &StartOptions) -> BridgeResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != BotState::Stopped {
                warn!(state = %lifecycle.state, "start rejected");
                return Err(BridgeError::AlreadyStarted);
            }
            lifecycle.state = BotState::Starting;
        }

        let config = match ConfigRecord::build(options).and_then(|record| record.to_json()) {
            Ok(config) => config,
            Err(e) => {
                self.set_state(BotState::Stopped);
                return Err(e);
            }
        };

        info!(
            repo = ?options.repo_path,
            listen = %options.listen_addr(),
            hops = options.hops,
            "starting engine"
        );
        if !self.engine.init(&config, self.events.sink()) {
            warn!("engine init failed");
            self.set_state(BotState::Stopped);
            return Err(BridgeError::UnexpectedFault("failed to start engine".into()));
        }

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = BotState::Running;
        lifecycle.repo_path = Some(options.repo_path.clone());
        info!("engine running");
        Ok(())
    }

    /// Stop the engine. Stopping a stopped bot reports `AlreadyStopped`.
    pub fn stop(&self) -> BridgeResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                BotState::Running => lifecycle.state = BotState::Stopping,
                BotState::Stopped => return Err(BridgeError::AlreadyStopped),
                BotState::Starting | BotState::Stopping => {
                    return Err(BridgeError::NotRunning { operation: "stop" })
                }
            }
        }

        if !self.engine.stop() {
            warn!("engine refused to stop");
            self.set_state(BotState::Running);
            return Err(BridgeError::UnexpectedFault("failed to stop engine".into()));
        }

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = BotState::Stopped;
        lifecycle.repo_path = None;
        info!("engine stopped");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Repository
    // ═══════════════════════════════════════════════════════════════════════

    pub fn statistics(&self) -> BridgeResult<Statistics> {
        self.ensure_running("statistics")?;
        let text = self
            .engine
            .repo_stats()
            .ok_or_else(|| BridgeError::UnexpectedFault("repoStats failed".into()))?;
        decode(&text, "repoStats json decoding error")
    }

    pub fn status(&self) -> BridgeResult<BotStatus> {
        self.ensure_running("status")?;
        let text = self
            .engine
            .bot_status()
            .ok_or_else(|| BridgeError::UnexpectedFault("botStatus failed".into()))?;
        decode(&text, "botStatus json decoding error")
    }

    /// Run a consistency check. Progress arrives on the fsck topic.
    pub fn fsck(&self, mode: FsckMode) -> BridgeResult<()> {
        self.ensure_running("fsck")?;
        let code = self.engine.offset_fsck(mode);
        if code != 0 {
            warn!(?mode, code, "fsck reported problems");
            return Err(BridgeError::UnexpectedFault(format!(
                "offsetFSCK failed with code {code}"
            )));
        }
        Ok(())
    }

    pub fn heal(&self) -> BridgeResult<HealReport> {
        self.ensure_running("heal")?;
        let text = self
            .engine
            .heal_repo()
            .ok_or_else(|| BridgeError::UnexpectedFault("healRepo failed".into()))?;
        decode(&text, "healRepo json decoding error")
    }

    pub fn drop_index_data(&self) -> BridgeResult<()> {
        self.ensure_running("drop_index_data")?;
        if !self.engine.drop_index_data() {
            return Err(BridgeError::UnexpectedFault("dropIndexData failed".into()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Logs
    // ═══════════════════════════════════════════════════════════════════════

    /// Messages in receive order from `start_seq`; a negative `limit` means all.
    pub fn receive_log<T: DeserializeOwned>(&self, start_seq: u64, limit: i32) -> BridgeResult<Vec<T>> {
        self.ensure_running("receive_log")?;
        let text = self
            .engine
            .stream_root_log(start_seq, limit)
            .ok_or_else(|| BridgeError::UnexpectedFault("receiveLog failed".into()))?;
        decode(&text, "receiveLog json decoding error")
    }

    /// Decrypted private messages; a negative `limit` means all.
    pub fn private_log<T: DeserializeOwned>(&self, start_seq: u64, limit: i32) -> BridgeResult<Vec<T>> {
        self.ensure_running("private_log")?;
        let text = self
            .engine
            .stream_private_log(start_seq, limit)
            .ok_or_else(|| BridgeError::UnexpectedFault("privateLog failed".into()))?;
        decode(&text, "privateLog json decoding error")
    }

    /// Publish `content` on our feed, returning the new message key.
    pub fn publish<T: Serialize>(&self, content: &T) -> BridgeResult<Key> {
        self.ensure_running("publish")?;
        let text = serde_json::to_string(content)
            .map_err(|e| BridgeError::processing("publish prep failed", e))?;
        let key = self
            .engine
            .publish(&text)
            .ok_or_else(|| BridgeError::UnexpectedFault("publish failed".into()))?;
        debug!(%key, "published");
        Ok(Key::new(key))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Blobs
    // ═══════════════════════════════════════════════════════════════════════

    /// Store `data` as a blob.
    ///
    /// A writer thread feeds the bytes into a pipe while the engine reads
    /// the other end. Returns once the engine has consumed or closed the
    /// stream; an engine that closes early fails the write.
    pub fn add_blob(&self, data: &[u8]) -> BridgeResult<Key> {
        self.ensure_running("add_blob")?;
        let (reader, mut writer) = std::io::pipe()?;

        let (reference, written) = thread::scope(|scope| -> BridgeResult<_> {
            let feeder = thread::Builder::new()
                .name(BLOB_WRITER_THREAD_NAME.to_string())
                .spawn_scoped(scope, move || writer.write_all(data))?;
            let reference = self.engine.blobs_add(reader);
            let written = feeder
                .join()
                .map_err(|_| BridgeError::UnexpectedFault("blob writer panicked".into()))?;
            Ok((reference, written))
        })?;

        written.map_err(|e| BridgeError::processing("blobsAdd stream failed", e))?;
        let key = reference.ok_or_else(|| BridgeError::UnexpectedFault("blobsAdd failed".into()))?;
        debug!(%key, len = data.len(), "added blob");
        Ok(Key::new(key))
    }

    /// Where the blob identified by `key` lives in the running repository.
    pub fn blob_path(&self, key: &Key) -> BridgeResult<PathBuf> {
        let repo = self.ensure_running("blob_path")?;
        blobs::blob_path(&repo, key)
    }

    /// Read a blob from the local store.
    ///
    /// A blob we don't have is not an error: the engine is asked to fetch
    /// it and `None` is returned. Retry after a blob-received event.
    pub fn get_blob(&self, key: &Key) -> BridgeResult<Option<Vec<u8>>> {
        let path = self.blob_path(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) => {
                debug!(%key, error = %e, "blob not available locally");
                self.want_blob(key)?;
                Ok(None)
            }
        }
    }

    /// Ask peers for a blob. Returns whether the engine accepted the request.
    pub fn want_blob(&self, key: &Key) -> BridgeResult<bool> {
        self.ensure_running("want_blob")?;
        let accepted = self.engine.blobs_want(key.as_str());
        if !accepted {
            warn!(%key, "engine declined blob want");
        }
        Ok(accepted)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Feeds
    // ═══════════════════════════════════════════════════════════════════════

    /// Stored feeds and their latest sequence numbers.
    pub fn feed_list(&self) -> BridgeResult<FeedList> {
        self.ensure_running("feed_list")?;
        let text = self
            .engine
            .replicate_up_to()
            .ok_or_else(|| BridgeError::UnexpectedFault("feedList pre-processing error".into()))?;
        FeedList::from_json(&text)
    }

    pub fn block(&self, feed: &Key) -> BridgeResult<()> {
        self.ensure_running("block")?;
        self.engine.feed_block(feed.as_str(), true);
        Ok(())
    }

    pub fn unblock(&self, feed: &Key) -> BridgeResult<()> {
        self.ensure_running("unblock")?;
        self.engine.feed_block(feed.as_str(), false);
        Ok(())
    }

    pub fn replicate(&self, feed: &Key) -> BridgeResult<()> {
        self.ensure_running("replicate")?;
        self.engine.feed_replicate(feed.as_str(), true);
        Ok(())
    }

    pub fn dont_replicate(&self, feed: &Key) -> BridgeResult<()> {
        self.ensure_running("dont_replicate")?;
        self.engine.feed_replicate(feed.as_str(), false);
        Ok(())
    }

    /// Erase the content of one message, keeping its metadata.
    pub fn null_content(&self, author: &Key, sequence: u64) -> BridgeResult<()> {
        self.ensure_running("null_content")?;
        if author.algorithm() != Algorithm::GgFeed {
            return Err(BridgeError::UnexpectedFault(format!(
                "nullContent: unsupported feed format {}",
                author.algorithm()
            )));
        }
        if self.engine.null_content(author.as_str(), sequence) != 0 {
            return Err(BridgeError::UnexpectedFault("nullContent failed".into()));
        }
        info!(%author, sequence, "nulled message content");
        Ok(())
    }

    /// Remove every stored message of `author`.
    pub fn null_feed(&self, author: &Key) -> BridgeResult<()> {
        self.ensure_running("null_feed")?;
        if self.engine.null_feed(author.as_str()) != 0 {
            return Err(BridgeError::UnexpectedFault("nullFeed failed".into()));
        }
        info!(%author, "nulled feed");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peers
    // ═══════════════════════════════════════════════════════════════════════

    /// Dial `peer`.
    pub fn connect(&self, peer: &Peer) -> BridgeResult<()> {
        self.ensure_running("connect")?;
        let address = peer.multiserver_address()?;
        debug!(%address, "connecting");
        if !self.engine.connect_peer(&address) {
            return Err(BridgeError::UnexpectedFault(format!(
                "connectPeer failed for {address}"
            )));
        }
        Ok(())
    }

    /// Let the engine dial up to `count` known peers.
    pub fn connect_peers(&self, count: u32) -> BridgeResult<()> {
        self.ensure_running("connect_peers")?;
        if !self.engine.connect_peers(count) {
            return Err(BridgeError::UnexpectedFault("connectPeers failed".into()));
        }
        Ok(())
    }

    pub fn disconnect_all(&self) -> BridgeResult<()> {
        self.ensure_running("disconnect_all")?;
        if !self.engine.disconnect_all_peers() {
            return Err(BridgeError::UnexpectedFault(
                "disconnectAllPeers failed".into(),
            ));
        }
        Ok(())
    }

    pub fn accept_invite(&self, token: &str) -> BridgeResult<()> {
        self.ensure_running("accept_invite")?;
        if !self.engine.invite_accept(token) {
            return Err(BridgeError::UnexpectedFault("inviteAccept failed".into()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Testing hooks
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a local keypair addressable as `nick`.
    pub fn testing_create_keypair(&self, nick: &str) -> BridgeResult<()> {
        self.ensure_running("testing_create_keypair")?;
        if self.engine.testing_make_named_key(nick) != 0 {
            return Err(BridgeError::UnexpectedFault(format!(
                "testing keypair {nick} could not be created"
            )));
        }
        Ok(())
    }

    /// Publish as a keypair made with [`Bot::testing_create_keypair`].
    pub fn testing_publish_as<T: Serialize>(&self, nick: &str, content: &T) -> BridgeResult<Key> {
        self.ensure_running("testing_publish_as")?;
        let text = serde_json::to_string(content)
            .map_err(|e| BridgeError::processing("publish prep failed", e))?;
        let key = self
            .engine
            .testing_publish_as(nick, &text)
            .ok_or_else(|| BridgeError::UnexpectedFault(format!("publish as {nick} failed")))?;
        Ok(Key::new(key))
    }
}

impl<E: Engine> Drop for Bot<E> {
    fn drop(&mut self) {
        if self.lifecycle.get_mut().state == BotState::Running && !self.engine.stop() {
            warn!("engine refused to stop on drop");
        }
        self.events.shutdown();
    }
}

impl<E: Engine> fmt::Debug for Bot<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle.lock();
        f.debug_struct("Bot")
            .field("state", &lifecycle.state)
            .field("repo_path", &lifecycle.repo_path)
            .finish_non_exhaustive()
    }
}

fn decode<T: DeserializeOwned>(text: &str, context: &str) -> BridgeResult<T> {
    serde_json::from_str(text).map_err(|e| BridgeError::processing(context, e))
}
