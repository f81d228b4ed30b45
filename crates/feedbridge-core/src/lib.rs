//! Feed Bridge Core Library
//!
//! Host-side bridge to an embedded feed replication engine.
//!
//! ## Overview
//!
//! The engine (gossip, signing, log storage, transport) is an external
//! library reached through a fixed call surface, the [`Engine`] trait. This
//! crate wraps it with:
//!
//! - **Identifiers**: parsing and validation of `<sigil><base64>.<algorithm>`
//!   keys for feeds, messages and blobs
//! - **Blob addressing**: the sharded `blobs/sha256/<2 hex>/<rest>` layout
//! - **Startup config**: the JSON record the engine's `init` expects
//! - **Events**: engine callbacks from foreign threads, validated and
//!   delivered in order on one thread
//! - **Bot**: a lifecycle-checked facade exposing every engine operation
//!   with typed results
//!
//! ## Quick Start
//!
//! ```ignore
//! use feedbridge_core::{Bot, DataKey, MemoryEngine, StartOptions};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     feedbridge_core::init_logging("info");
//!
//!     let bot = Bot::new(MemoryEngine::new());
//!     let network = DataKey::from_base64("4vVhFHLFHeyutypUO842SyFd5jRIVhAyiZV29ftnKSU=")?;
//!     bot.start(&StartOptions::new(network, bot.create_secret()?, "./repo"))?;
//!
//!     let key = bot.publish(&serde_json::json!({"type": "post", "text": "hello"}))?;
//!     println!("published {key}, {} messages", bot.statistics()?.messages);
//!     Ok(())
//! }
//! ```

pub mod blobs;
pub mod bot;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod types;

// Re-exports
pub use blobs::blob_path;
pub use bot::{Bot, BotState};
pub use config::{ConfigRecord, StartOptions, DEFAULT_HOPS, DEFAULT_PORT};
#[cfg(feature = "gossb")]
pub use engine::ffi::FfiEngine;
pub use engine::{Engine, FsckMode, MemoryEngine};
pub use error::{BridgeError, BridgeResult};
pub use events::{BridgeEvent, CallbackSink, EventBus, SubscriptionId, Topic};
pub use identity::{Algorithm, DataKey, Key, Secret, Sigil, DATA_KEY_LEN};
pub use logging::init_logging;
pub use types::*;
