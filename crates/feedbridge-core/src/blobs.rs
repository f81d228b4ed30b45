//! Content-addressed blob layout
//!
//! The engine stores every blob under the repository root, sharded by the
//! first byte of its sha256 digest:
//!
//! ```text
//! <repo>/blobs/sha256/
//! ├── 00/
//! │   └── 1f3a…e9          # remaining 62 hex chars
//! ├── 01/
//! …
//! └── ff/
//! ```
//!
//! The two-character prefix caps fan-out at 256 directories.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::identity::{Algorithm, Key};

/// Directory under the repository root holding all blobs
pub const BLOBS_DIR: &str = "blobs";

/// Hash-specific subdirectory
pub const SHA256_DIR: &str = "sha256";

/// Hex characters used for the shard directory name
const SHARD_PREFIX_LEN: usize = 2;

/// Root of the sha256 blob store within a repository.
pub fn blob_store_root(repo_root: &Path) -> PathBuf {
    repo_root.join(BLOBS_DIR).join(SHA256_DIR)
}

/// Derive the on-disk path of a blob from its identifier.
///
/// # Errors
///
/// Returns `BridgeError::Addressing` if the key is invalid, its payload does
/// not decode, or it decodes to a single byte.
pub fn blob_path(repo_root: &Path, key: &Key) -> BridgeResult<PathBuf> {
    if key.algorithm() != Algorithm::Sha256 {
        debug!(%key, algorithm = %key.algorithm(), "blob reference is not sha256-addressed");
    }

    let hex = key.hex();
    if hex.len() <= SHARD_PREFIX_LEN {
        return Err(BridgeError::Addressing(format!(
            "could not make hex representation of blob reference {}",
            key
        )));
    }

    let (dir, rest) = hex.split_at(SHARD_PREFIX_LEN);
    Ok(blob_store_root(repo_root).join(dir).join(rest))
}
