//! The replication engine port
//!
//! Gossip, signing, log storage and transport live in an external engine.
//! [`Engine`] is the complete call surface the bridge relies on; the
//! [`Bot`](crate::Bot) facade is the only caller.
//!
//! Every call blocks the calling thread until the engine returns. Calls
//! that produce text return `None` when the engine hands back no output,
//! integer calls return `0` on success.
//!
//! Implementations:
//! - [`MemoryEngine`]: complete in-process engine, for tests and demos
//! - `FfiEngine` (feature `gossb`): the Go engine linked as a C library

mod memory;
#[cfg_attr(not(feature = "gossb"), allow(dead_code))]
mod sink_slot;

#[cfg(feature = "gossb")]
pub mod ffi;

pub use memory::MemoryEngine;

use std::io::PipeReader;

use crate::events::CallbackSink;

/// Consistency check performed by [`Engine::offset_fsck`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FsckMode {
    /// Compare each feed's message count with its latest sequence number
    FeedLength = 1,
    /// Walk every message and check sequences increase by one per feed
    Sequences = 2,
}

impl FsckMode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Foreign call surface of the replication engine.
pub trait Engine: Send + Sync {
    /// Engine build identifier.
    fn version(&self) -> Option<String>;

    /// Start the engine with the serialized [`ConfigRecord`](crate::ConfigRecord).
    ///
    /// The engine keeps `callbacks` and may invoke it from any thread until
    /// [`Engine::stop`] returns.
    fn init(&self, config_json: &str, callbacks: CallbackSink) -> bool;
    fn stop(&self) -> bool;
    fn is_running(&self) -> bool;
    fn open_connections(&self) -> u32;

    /// Generate a fresh keypair as a JSON [`Secret`](crate::Secret).
    fn gen_keypair(&self) -> Option<String>;

    /// JSON `{messages, feeds, lastHash}`.
    fn repo_stats(&self) -> Option<String>;
    /// JSON `{Root, Peers: [{Addr, Since}], Blobs: [{Ref, Dist}]}`.
    fn bot_status(&self) -> Option<String>;
    /// Progress is reported through the init callbacks.
    fn offset_fsck(&self, mode: FsckMode) -> i32;
    /// JSON `{Authors: [..], Messages}`.
    fn heal_repo(&self) -> Option<String>;

    /// JSON array of messages in receive order.
    fn stream_root_log(&self, start_seq: u64, limit: i32) -> Option<String>;
    /// JSON array of decrypted private messages.
    fn stream_private_log(&self, start_seq: u64, limit: i32) -> Option<String>;
    /// JSON object mapping feed identifiers to their latest sequence.
    fn replicate_up_to(&self) -> Option<String>;

    /// Publish content, returning the new message key.
    fn publish(&self, content_json: &str) -> Option<String>;

    /// Read a blob from `source` until EOF, returning its key.
    ///
    /// The engine owns `source` and must have read it to EOF or closed it
    /// by the time this returns. The bridge's writer blocks on the pipe
    /// until one of the two happens.
    fn blobs_add(&self, source: PipeReader) -> Option<String>;
    /// Ask peers for a blob.
    fn blobs_want(&self, reference: &str) -> bool;

    fn connect_peer(&self, multiaddr: &str) -> bool;
    fn disconnect_all_peers(&self) -> bool;
    fn connect_peers(&self, count: u32) -> bool;

    fn feed_block(&self, id: &str, blocked: bool);
    fn feed_replicate(&self, id: &str, replicate: bool);
    fn null_content(&self, author: &str, sequence: u64) -> i32;
    fn null_feed(&self, author: &str) -> i32;

    fn invite_accept(&self, token: &str) -> bool;
    fn drop_index_data(&self) -> bool;

    /// Create a named local keypair for test scenarios.
    fn testing_make_named_key(&self, nick: &str) -> i32;
    /// Publish as a keypair created with [`Engine::testing_make_named_key`].
    fn testing_publish_as(&self, nick: &str, content_json: &str) -> Option<String>;
}
