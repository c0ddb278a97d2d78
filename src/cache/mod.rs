//! Named, independently bounded response caches.
//!
//! Each policy class maps to one named cache with its own entry ceiling
//! and TTL (see [`policy`]). Entries are keyed by a digest of the request
//! URL, expire lazily, and are evicted oldest-write-first when a cache
//! exceeds its ceiling (insertion-order FIFO, not LRU).

pub mod policy;
mod store;

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};

pub use policy::{all_policies, policy_for, CachePolicy};
pub use store::{CacheStore, CachedEntry, NoopStore, SqliteStore};

/// Cache key under which the application shell document is stored.
pub const SHELL_KEY: &str = "app-shell-document";

/// Derive the cache key for a URL.
///
/// SHA256 for stable, fixed-length keys; the URL is trimmed so incidental
/// whitespace can't split one logical resource across entries.
pub fn entry_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.trim().as_bytes());
  hex::encode(hasher.finalize())
}

/// Default location of the sync database (response caches and the
/// write-replay queue share one file).
pub fn default_db_path() -> Result<std::path::PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("agrosync").join("sync.db"))
}
