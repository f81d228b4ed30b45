//! Go engine linked as a C library (`libgossb`)
//!
//! The library exports plain C symbols taking Go strings by value and
//! returning `malloc`ed C strings the caller must free. Callbacks are bare
//! function pointers without a context argument, so the active
//! [`CallbackSink`] sits in a process-wide slot the trampolines read.

use std::ffi::{c_char, c_int, CStr};
use std::fs::File;
use std::io::{PipeReader, Read};
use std::os::fd::{FromRawFd, IntoRawFd};

use tracing::{debug, warn};

use super::sink_slot::SinkSlot;
use super::{Engine, FsckMode};
use crate::events::CallbackSink;

/// Go's `_GoString_`: borrowed, not NUL terminated.
#[repr(C)]
struct GoString {
    p: *const c_char,
    n: isize,
}

impl GoString {
    fn borrow(text: &str) -> Self {
        Self {
            p: text.as_ptr().cast(),
            n: text.len() as isize,
        }
    }
}

type BlobsNotify = extern "C" fn(i64, *const c_char) -> bool;
type BearerTokenNotify = extern "C" fn(*const c_char, i64);
type FsckProgressNotify = extern "C" fn(f64, *const c_char);

#[link(name = "gossb")]
unsafe extern "C" {
    fn ssbVersion() -> *mut c_char;
    fn ssbBotInit(config: GoString, blobs: BlobsNotify, tokens: BearerTokenNotify) -> bool;
    fn ssbBotStop() -> bool;
    fn ssbBotIsRunning() -> bool;
    fn ssbOpenConnections() -> u32;
    fn ssbGenKey() -> *mut c_char;
    fn ssbRepoStats() -> *mut c_char;
    fn ssbBotStatus() -> *mut c_char;
    fn ssbOffsetFSCK(mode: u32, progress: FsckProgressNotify) -> c_int;
    fn ssbHealRepo() -> *mut c_char;
    fn ssbStreamRootLog(start_seq: u64, limit: i32) -> *mut c_char;
    fn ssbStreamPrivateLog(start_seq: u64, limit: i32) -> *mut c_char;
    fn ssbReplicateUpTo() -> c_int;
    fn ssbPublish(content: GoString) -> *mut c_char;
    fn ssbBlobsAdd(fd: i32) -> *mut c_char;
    fn ssbBlobsWant(reference: GoString) -> bool;
    fn ssbConnectPeer(multiaddr: GoString) -> bool;
    fn ssbDisconnectAllPeers() -> bool;
    fn ssbConnectPeers(count: u32) -> bool;
    fn ssbFeedBlock(feed: GoString, blocked: bool);
    fn ssbFeedReplicate(feed: GoString, replicate: bool);
    fn ssbNullContent(author: GoString, sequence: u64) -> c_int;
    fn ssbNullFeed(author: GoString) -> c_int;
    fn ssbInviteAccept(token: GoString) -> bool;
    fn ssbDropIndexData() -> bool;
    fn ssbTestingMakeNamedKey(nick: GoString) -> c_int;
    fn ssbTestingPublishAs(nick: GoString, content: GoString) -> *mut c_char;
}

static ACTIVE_SINK: SinkSlot = SinkSlot::new();

fn active_sink() -> Option<CallbackSink> {
    ACTIVE_SINK.get()
}

/// Copy a C string into Rust text. Null and empty are the same to the engine.
///
/// # Safety
/// `ptr` is null or a valid NUL-terminated string for the duration of the call.
unsafe fn borrowed_text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Take ownership of a `malloc`ed C string returned by the engine.
///
/// # Safety
/// `ptr` is null or was allocated by the engine with `malloc`.
unsafe fn owned_text(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { borrowed_text(ptr) };
    unsafe { libc::free(ptr.cast()) };
    Some(text)
}

extern "C" fn on_blob_received(size: i64, reference: *const c_char) -> bool {
    let reference = unsafe { borrowed_text(reference) };
    active_sink().is_some_and(|sink| sink.blob_received(size, &reference))
}

extern "C" fn on_bearer_token(token: *const c_char, expires: i64) {
    let token = unsafe { borrowed_text(token) };
    if let Some(sink) = active_sink() {
        sink.bearer_token(&token, expires);
    }
}

extern "C" fn on_fsck_progress(percent: f64, remaining: *const c_char) {
    let remaining = unsafe { borrowed_text(remaining) };
    if let Some(sink) = active_sink() {
        sink.fsck_progress(percent, &remaining);
    }
}

/// The linked Go engine. There is one per process.
#[derive(Debug, Default)]
pub struct FfiEngine;

impl FfiEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for FfiEngine {
    fn version(&self) -> Option<String> {
        unsafe { owned_text(ssbVersion()) }
    }

    fn init(&self, config_json: &str, callbacks: CallbackSink) -> bool {
        if !ACTIVE_SINK.claim(callbacks) {
            return false;
        }
        let started = unsafe {
            ssbBotInit(
                GoString::borrow(config_json),
                on_blob_received,
                on_bearer_token,
            )
        };
        if !started {
            ACTIVE_SINK.release();
        }
        started
    }

    fn stop(&self) -> bool {
        let stopped = unsafe { ssbBotStop() };
        if stopped {
            ACTIVE_SINK.release();
        }
        stopped
    }

    fn is_running(&self) -> bool {
        unsafe { ssbBotIsRunning() }
    }

    fn open_connections(&self) -> u32 {
        unsafe { ssbOpenConnections() }
    }

    fn gen_keypair(&self) -> Option<String> {
        unsafe { owned_text(ssbGenKey()) }
    }

    fn repo_stats(&self) -> Option<String> {
        unsafe { owned_text(ssbRepoStats()) }
    }

    fn bot_status(&self) -> Option<String> {
        unsafe { owned_text(ssbBotStatus()) }
    }

    fn offset_fsck(&self, mode: FsckMode) -> i32 {
        unsafe { ssbOffsetFSCK(mode.as_u32(), on_fsck_progress) }
    }

    fn heal_repo(&self) -> Option<String> {
        unsafe { owned_text(ssbHealRepo()) }
    }

    fn stream_root_log(&self, start_seq: u64, limit: i32) -> Option<String> {
        unsafe { owned_text(ssbStreamRootLog(start_seq, limit)) }
    }

    fn stream_private_log(&self, start_seq: u64, limit: i32) -> Option<String> {
        unsafe { owned_text(ssbStreamPrivateLog(start_seq, limit)) }
    }

    fn replicate_up_to(&self) -> Option<String> {
        let fd = unsafe { ssbReplicateUpTo() };
        if fd < 0 {
            warn!(fd, "engine returned no feed list");
            return None;
        }
        // The engine hands over a pipe we now own and must close
        let mut file = unsafe { File::from_raw_fd(fd) };
        let mut text = String::new();
        match file.read_to_string(&mut text) {
            Ok(_) => Some(text),
            Err(e) => {
                warn!(error = %e, "failed reading feed list");
                None
            }
        }
    }

    fn publish(&self, content_json: &str) -> Option<String> {
        unsafe { owned_text(ssbPublish(GoString::borrow(content_json))) }
    }

    /// The engine takes ownership of the descriptor and must close it
    /// after reading to EOF, otherwise the writer never finishes.
    fn blobs_add(&self, source: PipeReader) -> Option<String> {
        let fd = source.into_raw_fd();
        debug!(fd, "handing blob stream to engine");
        unsafe { owned_text(ssbBlobsAdd(fd)) }
    }

    fn blobs_want(&self, reference: &str) -> bool {
        unsafe { ssbBlobsWant(GoString::borrow(reference)) }
    }

    fn connect_peer(&self, multiaddr: &str) -> bool {
        unsafe { ssbConnectPeer(GoString::borrow(multiaddr)) }
    }

    fn disconnect_all_peers(&self) -> bool {
        unsafe { ssbDisconnectAllPeers() }
    }

    fn connect_peers(&self, count: u32) -> bool {
        unsafe { ssbConnectPeers(count) }
    }

    fn feed_block(&self, id: &str, blocked: bool) {
        unsafe { ssbFeedBlock(GoString::borrow(id), blocked) }
    }

    fn feed_replicate(&self, id: &str, replicate: bool) {
        unsafe { ssbFeedReplicate(GoString::borrow(id), replicate) }
    }

    fn null_content(&self, author: &str, sequence: u64) -> i32 {
        unsafe { ssbNullContent(GoString::borrow(author), sequence) }
    }

    fn null_feed(&self, author: &str) -> i32 {
        unsafe { ssbNullFeed(GoString::borrow(author)) }
    }

    fn invite_accept(&self, token: &str) -> bool {
        unsafe { ssbInviteAccept(GoString::borrow(token)) }
    }

    fn drop_index_data(&self) -> bool {
        unsafe { ssbDropIndexData() }
    }

    fn testing_make_named_key(&self, nick: &str) -> i32 {
        unsafe { ssbTestingMakeNamedKey(GoString::borrow(nick)) }
    }

    fn testing_publish_as(&self, nick: &str, content_json: &str) -> Option<String> {
        unsafe {
            owned_text(ssbTestingPublishAs(
                GoString::borrow(nick),
                GoString::borrow(content_json),
            ))
        }
    }
}
