//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::http::ResponseSnapshot;

use super::policy::CachePolicy;

/// A cached response together with the moment it was written.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: ResponseSnapshot,
  pub stored_at: DateTime<Utc>,
}

/// Trait for named-cache storage backends.
///
/// Entries are keyed by URL digest and overwritten atomically per entry,
/// so concurrent in-flight resolutions need no cross-request locking
/// (last write wins).
pub trait CacheStore: Send + Sync {
  /// Get an entry, treating anything older than the cache's TTL as a
  /// miss (lazy expiry; the row itself is only removed on a later write
  /// or an explicit sweep).
  fn get(&self, policy: CachePolicy, key: &str) -> Result<Option<CachedEntry>>;

  /// Get an entry regardless of age. Stale-while-revalidate classes and
  /// the application shell serve through this path.
  fn get_stale(&self, policy: CachePolicy, key: &str) -> Result<Option<CachedEntry>>;

  /// Insert or overwrite an entry, then opportunistically drop expired
  /// rows and enforce the entry-count ceiling (oldest write evicted
  /// first).
  fn put(
    &self,
    policy: CachePolicy,
    key: &str,
    response: &ResponseSnapshot,
    stored_at: DateTime<Utc>,
  ) -> Result<()>;

  /// Remove every entry older than the cache's TTL. Returns the number
  /// of rows dropped.
  fn evict_expired(&self, policy: CachePolicy) -> Result<usize>;

  /// Remove oldest-written entries until the cache is within its ceiling.
  fn evict_over_capacity(&self, policy: CachePolicy) -> Result<usize>;

  /// Number of physically present entries (including not-yet-swept
  /// expired ones).
  fn count(&self, policy: CachePolicy) -> Result<usize>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl CacheStore for NoopStore {
  fn get(&self, _policy: CachePolicy, _key: &str) -> Result<Option<CachedEntry>> {
    Ok(None) // Always miss
  }

  fn get_stale(&self, _policy: CachePolicy, _key: &str) -> Result<Option<CachedEntry>> {
    Ok(None) // Always miss
  }

  fn put(
    &self,
    _policy: CachePolicy,
    _key: &str,
    _response: &ResponseSnapshot,
    _stored_at: DateTime<Utc>,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn evict_expired(&self, _policy: CachePolicy) -> Result<usize> {
    Ok(0)
  }

  fn evict_over_capacity(&self, _policy: CachePolicy) -> Result<usize> {
    Ok(0)
  }

  fn count(&self, _policy: CachePolicy) -> Result<usize> {
    Ok(0)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the response cache.
///
/// `rowid` doubles as the insertion sequence: INSERT OR REPLACE assigns a
/// fresh rowid, so an overwrite moves the entry to the tail and eviction
/// by ascending rowid is eviction of the least-recently-written entry.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    cache_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    snapshot BLOB NOT NULL,
    stored_at INTEGER NOT NULL,
    PRIMARY KEY (cache_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_age
    ON response_cache(cache_name, stored_at);
"#;

impl SqliteStore {
  /// Open (or create) the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&super::default_db_path()?)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // The cache and the write queue hold separate connections to the
    // same file; wait out the other writer instead of failing with
    // SQLITE_BUSY.
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  fn read_entry(
    &self,
    policy: CachePolicy,
    key: &str,
  ) -> Result<Option<(ResponseSnapshot, DateTime<Utc>)>> {
    let conn = self.lock()?;

    let row: Option<(Vec<u8>, i64)> = conn
      .query_row(
        "SELECT snapshot, stored_at FROM response_cache
         WHERE cache_name = ? AND entry_key = ?",
        params![policy.cache_name, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    match row {
      Some((data, stored_at)) => {
        let response: ResponseSnapshot = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize cached response: {}", e))?;
        let stored_at = DateTime::<Utc>::from_timestamp(stored_at, 0)
          .ok_or_else(|| eyre!("Invalid stored_at timestamp: {}", stored_at))?;
        Ok(Some((response, stored_at)))
      }
      None => Ok(None),
    }
  }
}

impl CacheStore for SqliteStore {
  fn get(&self, policy: CachePolicy, key: &str) -> Result<Option<CachedEntry>> {
    match self.read_entry(policy, key)? {
      Some((response, stored_at)) if !policy.is_expired(stored_at, Utc::now()) => {
        Ok(Some(CachedEntry {
          response,
          stored_at,
        }))
      }
      // Expired entries are treated as absent; removal happens on the
      // next write or sweep.
      _ => Ok(None),
    }
  }

  fn get_stale(&self, policy: CachePolicy, key: &str) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .read_entry(policy, key)?
        .map(|(response, stored_at)| CachedEntry {
          response,
          stored_at,
        }),
    )
  }

  fn put(
    &self,
    policy: CachePolicy,
    key: &str,
    response: &ResponseSnapshot,
    stored_at: DateTime<Utc>,
  ) -> Result<()> {
    let data = serde_json::to_vec(response)
      .map_err(|e| eyre!("Failed to serialize response snapshot: {}", e))?;

    let conn = self.lock()?;

    // Opportunistic lazy expiry. Runs before the insert so the entry
    // being written always survives its own write, whatever its
    // stored_at says.
    conn
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ? AND stored_at < ?",
        params![policy.cache_name, policy.expiry_cutoff(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to evict expired entries: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (cache_name, entry_key, snapshot, stored_at)
         VALUES (?, ?, ?, ?)",
        params![policy.cache_name, key, data, stored_at.timestamp()],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    // Enforce the entry ceiling after the insert.
    conn
      .execute(
        "DELETE FROM response_cache
         WHERE cache_name = ?1 AND rowid IN (
           SELECT rowid FROM response_cache WHERE cache_name = ?1
           ORDER BY rowid ASC
           LIMIT max(0, (SELECT count(*) FROM response_cache WHERE cache_name = ?1) - ?2)
         )",
        params![policy.cache_name, policy.max_entries as i64],
      )
      .map_err(|e| eyre!("Failed to evict over-capacity entries: {}", e))?;

    Ok(())
  }

  fn evict_expired(&self, policy: CachePolicy) -> Result<usize> {
    let conn = self.lock()?;
    let dropped = conn
      .execute(
        "DELETE FROM response_cache WHERE cache_name = ? AND stored_at < ?",
        params![policy.cache_name, policy.expiry_cutoff(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to evict expired entries: {}", e))?;
    Ok(dropped)
  }

  fn evict_over_capacity(&self, policy: CachePolicy) -> Result<usize> {
    let conn = self.lock()?;
    let dropped = conn
      .execute(
        "DELETE FROM response_cache
         WHERE cache_name = ?1 AND rowid IN (
           SELECT rowid FROM response_cache WHERE cache_name = ?1
           ORDER BY rowid ASC
           LIMIT max(0, (SELECT count(*) FROM response_cache WHERE cache_name = ?1) - ?2)
         )",
        params![policy.cache_name, policy.max_entries as i64],
      )
      .map_err(|e| eyre!("Failed to evict over-capacity entries: {}", e))?;
    Ok(dropped)
  }

  fn count(&self, policy: CachePolicy) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT count(*) FROM response_cache WHERE cache_name = ?",
        params![policy.cache_name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::entry_key;
  use chrono::Duration;

  fn tiny_policy() -> CachePolicy {
    CachePolicy {
      cache_name: "test-cache",
      max_entries: 3,
      max_age_seconds: 60,
    }
  }

  fn body(text: &str) -> ResponseSnapshot {
    ResponseSnapshot::ok(text.as_bytes().to_vec())
  }

  #[test]
  fn test_put_then_get_round_trip() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let key = entry_key("https://example.com/a");

    store.put(policy, &key, &body("hello"), Utc::now()).unwrap();

    let entry = store.get(policy, &key).unwrap().unwrap();
    assert_eq!(entry.response.body, b"hello");
  }

  #[test]
  fn test_fifo_eviction_drops_first_inserted_key() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let now = Utc::now();

    for i in 0..4 {
      let key = entry_key(&format!("https://example.com/{}", i));
      store.put(policy, &key, &body("x"), now).unwrap();
    }

    assert_eq!(store.count(policy).unwrap(), 3);
    // The first-inserted key is the one evicted.
    let first = entry_key("https://example.com/0");
    assert!(store.get(policy, &first).unwrap().is_none());
    for i in 1..4 {
      let key = entry_key(&format!("https://example.com/{}", i));
      assert!(store.get(policy, &key).unwrap().is_some());
    }
  }

  #[test]
  fn test_overwrite_moves_entry_to_tail() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let now = Utc::now();

    for i in 0..3 {
      let key = entry_key(&format!("https://example.com/{}", i));
      store.put(policy, &key, &body("x"), now).unwrap();
    }
    // Rewriting key 0 makes it the most recently written.
    let zero = entry_key("https://example.com/0");
    store.put(policy, &zero, &body("y"), now).unwrap();

    // A fourth distinct key now evicts key 1, not key 0.
    let three = entry_key("https://example.com/3");
    store.put(policy, &three, &body("x"), now).unwrap();

    assert!(store.get(policy, &zero).unwrap().is_some());
    assert!(store.get(policy, &entry_key("https://example.com/1")).unwrap().is_none());
  }

  #[test]
  fn test_entry_is_a_miss_after_max_age() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let key = entry_key("https://example.com/old");

    let stored_at = Utc::now() - Duration::seconds(policy.max_age_seconds + 1);
    store.put(policy, &key, &body("stale"), stored_at).unwrap();

    assert!(store.get(policy, &key).unwrap().is_none());
    // The stale-tolerant path still sees it.
    assert!(store.get_stale(policy, &key).unwrap().is_some());
  }

  #[test]
  fn test_expired_rows_are_swept_on_next_write() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let old_key = entry_key("https://example.com/old");

    let stored_at = Utc::now() - Duration::seconds(policy.max_age_seconds + 10);
    store.put(policy, &old_key, &body("stale"), stored_at).unwrap();
    assert_eq!(store.count(policy).unwrap(), 1);

    let fresh_key = entry_key("https://example.com/fresh");
    store.put(policy, &fresh_key, &body("new"), Utc::now()).unwrap();

    assert_eq!(store.count(policy).unwrap(), 1);
    assert!(store.get_stale(policy, &old_key).unwrap().is_none());
  }

  #[test]
  fn test_write_older_than_ttl_survives_its_own_sweep() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let key = entry_key("https://example.com/backdated");

    // A write carrying a stored_at past the TTL must still land; only
    // rows that were already present get swept.
    let stored_at = Utc::now() - Duration::seconds(policy.max_age_seconds + 30);
    store.put(policy, &key, &body("old"), stored_at).unwrap();

    assert_eq!(store.count(policy).unwrap(), 1);
    let entry = store.get_stale(policy, &key).unwrap().unwrap();
    assert_eq!(entry.response.body, b"old");
  }

  #[test]
  fn test_evict_expired_sweep() {
    let store = SqliteStore::open_in_memory().unwrap();
    let policy = tiny_policy();
    let now = Utc::now();

    store.put(policy, "b", &body("x"), now).unwrap();
    store
      .put(policy, "a", &body("x"), now - Duration::seconds(120))
      .unwrap();

    assert_eq!(store.evict_expired(policy).unwrap(), 1);
    assert_eq!(store.count(policy).unwrap(), 1);
  }

  #[test]
  fn test_caches_are_independent() {
    let store = SqliteStore::open_in_memory().unwrap();
    let a = tiny_policy();
    let b = CachePolicy {
      cache_name: "other-cache",
      ..tiny_policy()
    };

    store.put(a, "k", &body("a"), Utc::now()).unwrap();
    assert!(store.get(b, "k").unwrap().is_none());
    assert_eq!(store.count(b).unwrap(), 0);
  }

  #[test]
  fn test_noop_store_always_misses() {
    let store = NoopStore;
    let policy = tiny_policy();
    store.put(policy, "k", &body("x"), Utc::now()).unwrap();
    assert!(store.get(policy, "k").unwrap().is_none());
    assert!(store.get_stale(policy, "k").unwrap().is_none());
  }
}
