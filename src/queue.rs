//! Durable write-replay queue for mutations issued while offline.
//!
//! A single global FIFO: two mutations against the same resource replay
//! in submission order, which is the only ordering correctness requires.
//! Items survive process restarts (SQLite), are retried indefinitely
//! until they succeed or outlive the 24h retention window, and are
//! dropped once the backend actually rejects them.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::http::RequestDescriptor;
use crate::resolver::Fetch;

/// Queued mutations older than this are dropped unreplayed at the next
/// drain attempt.
pub const RETENTION_SECONDS: i64 = 86_400;

/// A mutation waiting to be replayed.
#[derive(Debug, Clone)]
pub struct QueuedMutation {
  pub id: i64,
  pub request: RequestDescriptor,
  pub enqueued_at: DateTime<Utc>,
  pub attempts: u32,
}

/// Summary of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
  /// Mutations successfully replayed against the backend.
  pub replayed: usize,
  /// Mutations dropped because they exceeded the retention window.
  pub dropped_expired: usize,
  /// Mutations dropped because the backend rejected them (HTTP error).
  pub dropped_rejected: usize,
  /// The cycle stopped early on a connectivity failure; the failing item
  /// stays at the head for the next cycle.
  pub aborted: bool,
  /// Another drain was already in progress; nothing was attempted.
  pub skipped: bool,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS write_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);
"#;

/// Durable FIFO of failed mutating requests.
pub struct WriteQueue {
  conn: Mutex<Connection>,
  draining: AtomicBool,
}

impl WriteQueue {
  /// Open (or create) the queue database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open the queue at the default location (shared with the cache db).
  pub fn open_default() -> Result<Self> {
    Self::open(&crate::cache::default_db_path()?)
  }

  /// In-memory queue, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    // The queue shares its database file with the response caches; wait
    // out a concurrent cache write instead of failing with SQLITE_BUSY,
    // since a failed enqueue loses an offline mutation.
    conn
      .busy_timeout(std::time::Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;

    let queue = Self {
      conn: Mutex::new(conn),
      draining: AtomicBool::new(false),
    };
    queue.run_migrations()?;
    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Append a mutation to the tail of the queue.
  pub fn enqueue(&self, request: &RequestDescriptor) -> Result<i64> {
    self.enqueue_at(request, Utc::now())
  }

  fn enqueue_at(&self, request: &RequestDescriptor, enqueued_at: DateTime<Utc>) -> Result<i64> {
    let data =
      serde_json::to_vec(request).map_err(|e| eyre!("Failed to serialize request: {}", e))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO write_queue (request, enqueued_at, attempts) VALUES (?, ?, 0)",
        params![data, enqueued_at.timestamp()],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  /// Number of queued mutations.
  pub fn len(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT count(*) FROM write_queue", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// The mutation at the head of the queue, if any.
  pub fn peek(&self) -> Result<Option<QueuedMutation>> {
    let conn = self.lock()?;

    let row: Option<(i64, Vec<u8>, i64, u32)> = conn
      .query_row(
        "SELECT id, request, enqueued_at, attempts FROM write_queue ORDER BY id ASC LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to peek queue: {}", e))?;

    match row {
      Some((id, data, enqueued_at, attempts)) => {
        let request: RequestDescriptor = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize queued request: {}", e))?;
        let enqueued_at = DateTime::<Utc>::from_timestamp(enqueued_at, 0)
          .ok_or_else(|| eyre!("Invalid enqueued_at timestamp: {}", enqueued_at))?;
        Ok(Some(QueuedMutation {
          id,
          request,
          enqueued_at,
          attempts,
        }))
      }
      None => Ok(None),
    }
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM write_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued mutation: {}", e))?;
    Ok(())
  }

  fn bump_attempts(&self, id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE write_queue SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record replay attempt: {}", e))?;
    Ok(())
  }

  /// Replay queued mutations strictly in FIFO order, awaiting each one
  /// before issuing the next.
  ///
  /// A connectivity failure leaves the failing item at the head and
  /// aborts the cycle; an HTTP-level rejection drops the item and
  /// continues. Non-reentrant: a drain already in progress makes this a
  /// no-op (`skipped` set in the outcome).
  pub async fn drain_all(&self, fetcher: &dyn Fetch) -> Result<DrainOutcome> {
    if self.draining.swap(true, Ordering::SeqCst) {
      tracing::debug!("drain already in progress, skipping");
      return Ok(DrainOutcome {
        skipped: true,
        ..DrainOutcome::default()
      });
    }

    let result = self.drain_inner(fetcher).await;
    self.draining.store(false, Ordering::SeqCst);
    result
  }

  async fn drain_inner(&self, fetcher: &dyn Fetch) -> Result<DrainOutcome> {
    let mut outcome = DrainOutcome::default();

    loop {
      let item = match self.peek()? {
        Some(item) => item,
        None => break,
      };

      let age_seconds = (Utc::now() - item.enqueued_at).num_seconds();
      if age_seconds > RETENTION_SECONDS {
        // The original caller has long since moved on; not an error.
        tracing::info!(
          id = item.id,
          url = %item.request.url,
          age_seconds,
          "dropping queued mutation past retention"
        );
        self.remove(item.id)?;
        outcome.dropped_expired += 1;
        continue;
      }

      match fetcher.fetch(&item.request).await {
        Ok(response) if response.is_success() => {
          tracing::debug!(id = item.id, url = %item.request.url, "replayed queued mutation");
          self.remove(item.id)?;
          outcome.replayed += 1;
        }
        Ok(response) => {
          // Resubmitting a rejected mutation would never succeed.
          tracing::warn!(
            id = item.id,
            url = %item.request.url,
            status = response.status,
            "backend rejected queued mutation, dropping"
          );
          self.remove(item.id)?;
          outcome.dropped_rejected += 1;
        }
        Err(err) if err.is_connectivity() => {
          // Still offline: keep the item at the head so ordering holds,
          // and wait for the next connectivity-restored signal.
          tracing::debug!(id = item.id, %err, "connectivity lost during drain, aborting cycle");
          self.bump_attempts(item.id)?;
          outcome.aborted = true;
          break;
        }
        Err(err) => {
          tracing::warn!(id = item.id, %err, "queued mutation is unreplayable, dropping");
          self.remove(item.id)?;
          outcome.dropped_rejected += 1;
        }
      }
    }

    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::ResponseSnapshot;
  use crate::testutil::ScriptedFetcher;
  use chrono::Duration;

  fn mutation(path: &str) -> RequestDescriptor {
    RequestDescriptor::new("POST", format!("https://abc.supabase.co/rest/v1/{}", path))
      .with_body(b"{}".to_vec())
  }

  #[tokio::test]
  async fn test_drain_replays_in_fifo_order() {
    let queue = WriteQueue::open_in_memory().unwrap();
    queue.enqueue(&mutation("comments")).unwrap();
    queue.enqueue(&mutation("crops")).unwrap();

    let fetcher = ScriptedFetcher::online();
    let outcome = queue.drain_all(&fetcher).await.unwrap();

    assert_eq!(outcome.replayed, 2);
    assert!(queue.is_empty().unwrap());
    let calls = fetcher.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].url.ends_with("/comments"));
    assert!(calls[1].url.ends_with("/crops"));
  }

  #[tokio::test]
  async fn test_connectivity_failure_keeps_head_and_aborts() {
    let queue = WriteQueue::open_in_memory().unwrap();
    queue.enqueue(&mutation("comments")).unwrap();
    queue.enqueue(&mutation("crops")).unwrap();

    let fetcher = ScriptedFetcher::offline();
    let outcome = queue.drain_all(&fetcher).await.unwrap();

    assert!(outcome.aborted);
    assert_eq!(outcome.replayed, 0);
    // Only the head was attempted; both items remain, head first.
    assert_eq!(fetcher.calls().len(), 1);
    assert_eq!(queue.len().unwrap(), 2);
    let head = queue.peek().unwrap().unwrap();
    assert!(head.request.url.ends_with("/comments"));
    assert_eq!(head.attempts, 1);
  }

  #[tokio::test]
  async fn test_backend_rejection_drops_item_and_continues() {
    let queue = WriteQueue::open_in_memory().unwrap();
    let rejected = mutation("comments");
    queue.enqueue(&rejected).unwrap();
    queue.enqueue(&mutation("crops")).unwrap();

    let fetcher = ScriptedFetcher::online();
    fetcher.respond_with(&rejected, Ok(ResponseSnapshot::new(409, b"conflict".to_vec())));

    let outcome = queue.drain_all(&fetcher).await.unwrap();

    assert_eq!(outcome.dropped_rejected, 1);
    assert_eq!(outcome.replayed, 1);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_item_past_retention_is_dropped_unreplayed() {
    let queue = WriteQueue::open_in_memory().unwrap();
    queue
      .enqueue_at(&mutation("comments"), Utc::now() - Duration::hours(25))
      .unwrap();

    let fetcher = ScriptedFetcher::online();
    let outcome = queue.drain_all(&fetcher).await.unwrap();

    assert_eq!(outcome.dropped_expired, 1);
    assert_eq!(outcome.replayed, 0);
    assert!(fetcher.calls().is_empty());
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_item_within_retention_is_replayed() {
    let queue = WriteQueue::open_in_memory().unwrap();
    queue
      .enqueue_at(&mutation("comments"), Utc::now() - Duration::hours(23))
      .unwrap();

    let fetcher = ScriptedFetcher::online();
    let outcome = queue.drain_all(&fetcher).await.unwrap();

    assert_eq!(outcome.replayed, 1);
  }

  #[tokio::test]
  async fn test_queue_shares_database_file_with_cache() {
    use crate::cache::{entry_key, policy, CacheStore, SqliteStore};

    let path = std::env::temp_dir().join(format!(
      "agrosync-shared-db-{}-{}.db",
      std::process::id(),
      Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));

    // Two connections on one file: interleaved cache writes and
    // enqueues must all succeed, not fail busy.
    let store = SqliteStore::open(&path).unwrap();
    let queue = WriteQueue::open(&path).unwrap();

    for i in 0..5 {
      let url = format!("https://abc.supabase.co/rest/v1/posts?page={}", i);
      store
        .put(
          policy::API_READ,
          &entry_key(&url),
          &ResponseSnapshot::ok(b"[]".to_vec()),
          Utc::now(),
        )
        .unwrap();
      queue.enqueue(&mutation("comments")).unwrap();
    }
    assert_eq!(queue.len().unwrap(), 5);

    let fetcher = ScriptedFetcher::online();
    let outcome = queue.drain_all(&fetcher).await.unwrap();
    assert_eq!(outcome.replayed, 5);

    drop(queue);
    drop(store);
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_concurrent_drain_is_skipped() {
    let queue = std::sync::Arc::new(WriteQueue::open_in_memory().unwrap());
    queue.enqueue(&mutation("comments")).unwrap();

    // A slow fetcher keeps the first drain in flight while the second
    // trigger arrives.
    let fetcher = std::sync::Arc::new(
      ScriptedFetcher::online().with_delay(std::time::Duration::from_millis(200)),
    );

    let first = tokio::spawn({
      let queue = std::sync::Arc::clone(&queue);
      let fetcher = std::sync::Arc::clone(&fetcher);
      async move { queue.drain_all(fetcher.as_ref()).await.unwrap() }
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let second = queue.drain_all(fetcher.as_ref()).await.unwrap();
    assert!(second.skipped);

    let first = first.await.unwrap();
    assert!(!first.skipped);
    assert_eq!(first.replayed, 1);
  }
}
