//! Typed views of the engine's JSON replies and peer addressing

mod feeds;
mod peer;
mod status;

pub use feeds::{FeedList, RejectedFeedEntry};
pub use peer::Peer;
pub use status::{BlobWant, BotStatus, HealReport, PeerStatus, Statistics};
