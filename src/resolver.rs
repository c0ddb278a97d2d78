//! Strategy dispatch: how each class of request is satisfied.
//!
//! The resolver sits between the application's data-access calls and the
//! network. Every request is classified once, then served by the strategy
//! of its class: network-first with cache fallback for backend reads,
//! stale-while-revalidate for assets/weather/tiles, network-only with
//! offline queueing for mutations, and the precached shell for
//! navigation. Caching is strictly best-effort: a storage failure never
//! blocks returning a valid response.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{entry_key, policy, CachePolicy, CacheStore, SHELL_KEY};
use crate::error::FetchError;
use crate::http::{RequestDescriptor, ResponseSnapshot};
use crate::queue::WriteQueue;
use crate::route::{PolicyClass, RouteClassifier};

/// Network seam. The real implementation wraps reqwest; tests inject
/// scripted fetchers.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot, FetchError>;
}

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network.
  Network,
  /// From cache, within its TTL.
  CacheFresh,
  /// From cache, past its TTL; a background refresh is in flight.
  CacheStale,
  /// The precached application shell.
  Shell,
  /// Synthetic acknowledgement; the mutation is queued for replay.
  PendingSync,
}

/// A response plus its provenance.
#[derive(Debug, Clone)]
pub struct ResolvedResponse {
  pub response: ResponseSnapshot,
  pub source: ResponseSource,
}

impl ResolvedResponse {
  fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Default network timeout for the network-first strategy.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves requests against the network, the named caches, and the
/// write-replay queue.
pub struct Resolver {
  classifier: RouteClassifier,
  store: Arc<dyn CacheStore>,
  queue: Arc<WriteQueue>,
  fetcher: Arc<dyn Fetch>,
  network_timeout: Duration,
}

impl Resolver {
  pub fn new(store: Arc<dyn CacheStore>, queue: Arc<WriteQueue>, fetcher: Arc<dyn Fetch>) -> Self {
    Self {
      classifier: RouteClassifier::new(),
      store,
      queue,
      fetcher,
      network_timeout: DEFAULT_NETWORK_TIMEOUT,
    }
  }

  pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
    self.network_timeout = timeout;
    self
  }

  /// Store the application shell document so navigation requests can be
  /// answered fully offline. Called once at startup with the current
  /// build's shell.
  pub fn precache_shell(&self, document: ResponseSnapshot) -> color_eyre::Result<()> {
    self
      .store
      .put(policy::APP_SHELL, SHELL_KEY, &document, Utc::now())
  }

  /// Resolve a request according to its policy class.
  pub async fn resolve(&self, request: &RequestDescriptor) -> Result<ResolvedResponse, FetchError> {
    match self.classifier.classify(request) {
      PolicyClass::ApiRead => self.network_first(policy::API_READ, request).await,
      PolicyClass::StorageAsset => {
        self.stale_while_revalidate(policy::STORAGE_ASSET, request).await
      }
      PolicyClass::WeatherData => {
        self.stale_while_revalidate(policy::WEATHER_DATA, request).await
      }
      PolicyClass::MapTile => self.stale_while_revalidate(policy::MAP_TILE, request).await,
      PolicyClass::WriteMutation => self.network_only_or_queue(request).await,
      PolicyClass::NavigationShell => self.shell(),
      PolicyClass::PassThrough => {
        let response = self.fetcher.fetch(request).await?;
        Ok(ResolvedResponse::new(response, ResponseSource::Network))
      }
    }
  }

  /// Network-first with timeout: a live response wins; on connectivity
  /// failure fall back to the most recent cached entry, fresh ones only.
  async fn network_first(
    &self,
    policy: CachePolicy,
    request: &RequestDescriptor,
  ) -> Result<ResolvedResponse, FetchError> {
    let key = entry_key(&request.url);

    match fetch_with_retry(self.fetcher.as_ref(), request, self.network_timeout).await {
      Ok(response) => {
        // HTTP errors pass through untouched and are never cached.
        if response.is_success() {
          self.cache_put(policy, &key, &response);
        }
        Ok(ResolvedResponse::new(response, ResponseSource::Network))
      }
      Err(err) => {
        if let Some(entry) = self.cache_get(policy, &key) {
          tracing::debug!(url = %request.url, "network unavailable, serving cached response");
          return Ok(ResolvedResponse::new(entry.response, ResponseSource::CacheFresh));
        }
        Err(err)
      }
    }
  }

  /// Serve the cached entry immediately, even past its TTL, and refresh
  /// the cache in the background for next time.
  async fn stale_while_revalidate(
    &self,
    policy: CachePolicy,
    request: &RequestDescriptor,
  ) -> Result<ResolvedResponse, FetchError> {
    let key = entry_key(&request.url);

    if let Some(entry) = self.cache_get_stale(policy, &key) {
      let source = if policy.is_expired(entry.stored_at, Utc::now()) {
        ResponseSource::CacheStale
      } else {
        ResponseSource::CacheFresh
      };
      self.spawn_revalidate(policy, key, request.clone());
      return Ok(ResolvedResponse::new(entry.response, source));
    }

    let response = fetch_with_retry(self.fetcher.as_ref(), request, self.network_timeout).await?;
    if response.is_success() {
      self.cache_put(policy, &key, &response);
    }
    Ok(ResolvedResponse::new(response, ResponseSource::Network))
  }

  fn spawn_revalidate(&self, policy: CachePolicy, key: String, request: RequestDescriptor) {
    let fetcher = Arc::clone(&self.fetcher);
    let store = Arc::clone(&self.store);
    let timeout = self.network_timeout;

    tokio::spawn(async move {
      match fetch_with_retry(fetcher.as_ref(), &request, timeout).await {
        Ok(response) if response.is_success() => {
          if let Err(err) = store.put(policy, &key, &response, Utc::now()) {
            tracing::warn!(%err, cache = policy.cache_name, "cache refresh write failed");
          }
        }
        Ok(response) => {
          tracing::debug!(url = %request.url, status = response.status, "revalidation returned error status");
        }
        Err(err) => {
          tracing::debug!(url = %request.url, %err, "background revalidation failed");
        }
      }
    });
  }

  /// Network-only for mutations. A connectivity failure enqueues the
  /// request for replay and acknowledges the caller synthetically; the
  /// user is never blocked on connectivity.
  async fn network_only_or_queue(
    &self,
    request: &RequestDescriptor,
  ) -> Result<ResolvedResponse, FetchError> {
    match fetch_once(self.fetcher.as_ref(), request, self.network_timeout).await {
      Ok(response) => Ok(ResolvedResponse::new(response, ResponseSource::Network)),
      Err(err) if err.is_connectivity() => {
        if let Err(queue_err) = self.queue.enqueue(request) {
          tracing::error!(url = %request.url, %queue_err, "failed to enqueue mutation for replay");
          return Err(err);
        }
        tracing::info!(
          method = %request.method,
          url = %request.url,
          "mutation queued for replay when connectivity returns"
        );
        Ok(ResolvedResponse::new(
          ResponseSnapshot::accepted_pending_sync(),
          ResponseSource::PendingSync,
        ))
      }
      Err(err) => Err(err),
    }
  }

  /// Cache-only: the shell is served regardless of network state.
  fn shell(&self) -> Result<ResolvedResponse, FetchError> {
    match self.cache_get_stale(policy::APP_SHELL, SHELL_KEY) {
      Some(entry) => Ok(ResolvedResponse::new(entry.response, ResponseSource::Shell)),
      None => Err(FetchError::Connectivity(
        "application shell not precached".into(),
      )),
    }
  }

  fn cache_get(&self, policy: CachePolicy, key: &str) -> Option<crate::cache::CachedEntry> {
    match self.store.get(policy, key) {
      Ok(entry) => entry,
      Err(err) => {
        tracing::warn!(%err, cache = policy.cache_name, "cache read failed");
        None
      }
    }
  }

  fn cache_get_stale(&self, policy: CachePolicy, key: &str) -> Option<crate::cache::CachedEntry> {
    match self.store.get_stale(policy, key) {
      Ok(entry) => entry,
      Err(err) => {
        tracing::warn!(%err, cache = policy.cache_name, "cache read failed");
        None
      }
    }
  }

  /// Best-effort write: a quota or storage failure must never block
  /// returning the response.
  fn cache_put(&self, policy: CachePolicy, key: &str, response: &ResponseSnapshot) {
    if let Err(err) = self.store.put(policy, key, response, Utc::now()) {
      tracing::warn!(%err, cache = policy.cache_name, "cache write failed, serving uncached");
    }
  }
}

/// One fetch attempt bounded by the configured timeout. A timeout
/// abandons the attempt (the future is dropped, not awaited further) and
/// surfaces as a connectivity error.
async fn fetch_once(
  fetcher: &dyn Fetch,
  request: &RequestDescriptor,
  timeout: Duration,
) -> Result<ResponseSnapshot, FetchError> {
  match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
    Ok(result) => result,
    Err(_) => Err(FetchError::Connectivity(format!(
      "network timeout after {:?}",
      timeout
    ))),
  }
}

/// Fetch with one silent retry on connectivity failure.
async fn fetch_with_retry(
  fetcher: &dyn Fetch,
  request: &RequestDescriptor,
  timeout: Duration,
) -> Result<ResponseSnapshot, FetchError> {
  match fetch_once(fetcher, request, timeout).await {
    Err(err) if err.is_connectivity() => {
      tracing::debug!(url = %request.url, %err, "retrying after connectivity error");
      fetch_once(fetcher, request, timeout).await
    }
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::testutil::ScriptedFetcher;

  const REST_URL: &str = "https://abc.supabase.co/rest/v1/articles?select=*";
  const TILE_URL: &str = "https://a.tile.openweathermap.org/map/clouds_new/4/3/5.png";

  struct Harness {
    store: Arc<SqliteStore>,
    queue: Arc<WriteQueue>,
    fetcher: Arc<ScriptedFetcher>,
    resolver: Resolver,
  }

  fn harness(fetcher: ScriptedFetcher) -> Harness {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let queue = Arc::new(WriteQueue::open_in_memory().unwrap());
    let fetcher = Arc::new(fetcher);
    let resolver = Resolver::new(
      Arc::clone(&store) as Arc<dyn CacheStore>,
      Arc::clone(&queue),
      Arc::clone(&fetcher) as Arc<dyn Fetch>,
    )
    .with_network_timeout(Duration::from_millis(100));
    Harness {
      store,
      queue,
      fetcher,
      resolver,
    }
  }

  fn get(url: &str) -> RequestDescriptor {
    RequestDescriptor::get(url)
  }

  #[tokio::test]
  async fn test_api_read_success_is_cached_and_returned() {
    let h = harness(ScriptedFetcher::online());
    h.fetcher
      .respond_to("GET", REST_URL, Ok(ResponseSnapshot::ok(b"[1,2]".to_vec())));

    let resolved = h.resolver.resolve(&get(REST_URL)).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(resolved.response.body, b"[1,2]");

    let cached = h
      .store
      .get(policy::API_READ, &entry_key(REST_URL))
      .unwrap()
      .unwrap();
    assert_eq!(cached.response.body, b"[1,2]");
  }

  #[tokio::test]
  async fn test_api_read_timeout_falls_back_to_cache() {
    // Fetcher never answers within the resolver's window.
    let h = harness(ScriptedFetcher::online().with_delay(Duration::from_secs(5)));
    let key = entry_key(REST_URL);
    h.store
      .put(policy::API_READ, &key, &ResponseSnapshot::ok(b"cached".to_vec()), Utc::now())
      .unwrap();

    let resolved = h.resolver.resolve(&get(REST_URL)).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::CacheFresh);
    assert_eq!(resolved.response.body, b"cached");
    // One attempt plus one silent retry.
    assert_eq!(h.fetcher.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_api_read_offline_without_fresh_cache_is_an_error() {
    let h = harness(ScriptedFetcher::offline());
    // Only an expired entry exists, so the fallback must not use it.
    let key = entry_key(REST_URL);
    let stored_at = Utc::now() - chrono::Duration::seconds(policy::API_READ.max_age_seconds + 1);
    h.store
      .put(policy::API_READ, &key, &ResponseSnapshot::ok(b"old".to_vec()), stored_at)
      .unwrap();

    let err = h.resolver.resolve(&get(REST_URL)).await.unwrap_err();
    assert!(err.is_connectivity());
  }

  #[tokio::test]
  async fn test_api_read_http_error_propagates_uncached() {
    let h = harness(ScriptedFetcher::online());
    h.fetcher.respond_to(
      "GET",
      REST_URL,
      Ok(ResponseSnapshot::new(404, b"not found".to_vec())),
    );

    let resolved = h.resolver.resolve(&get(REST_URL)).await.unwrap();
    assert_eq!(resolved.response.status, 404);
    assert_eq!(resolved.source, ResponseSource::Network);
    assert!(h
      .store
      .get(policy::API_READ, &entry_key(REST_URL))
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_serves_stale_then_refreshed() {
    let h = harness(ScriptedFetcher::online());
    let key = entry_key(TILE_URL);

    // Expired entry: still served for this class.
    let stored_at = Utc::now() - chrono::Duration::seconds(policy::MAP_TILE.max_age_seconds + 60);
    h.store
      .put(policy::MAP_TILE, &key, &ResponseSnapshot::ok(b"old tile".to_vec()), stored_at)
      .unwrap();
    h.fetcher
      .respond_to("GET", TILE_URL, Ok(ResponseSnapshot::ok(b"new tile".to_vec())));

    let first = h.resolver.resolve(&get(TILE_URL)).await.unwrap();
    assert_eq!(first.source, ResponseSource::CacheStale);
    assert_eq!(first.response.body, b"old tile");

    // Let the background refresh settle.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = h.resolver.resolve(&get(TILE_URL)).await.unwrap();
    assert_eq!(second.response.body, b"new tile");
    assert_eq!(second.source, ResponseSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_cold_cache_awaits_network() {
    let h = harness(ScriptedFetcher::online());
    h.fetcher
      .respond_to("GET", TILE_URL, Ok(ResponseSnapshot::ok(b"tile".to_vec())));

    let resolved = h.resolver.resolve(&get(TILE_URL)).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::Network);
    assert!(h
      .store
      .get(policy::MAP_TILE, &entry_key(TILE_URL))
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_offline_mutation_is_queued_with_synthetic_ack() {
    let h = harness(ScriptedFetcher::offline());
    let request = RequestDescriptor::new("DELETE", "https://abc.supabase.co/rest/v1/comments?id=eq.7");

    let resolved = h.resolver.resolve(&request).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::PendingSync);
    assert!(resolved.response.is_pending_sync());
    assert_eq!(h.queue.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_online_mutation_is_never_cached_or_queued() {
    let h = harness(ScriptedFetcher::online());
    let request = RequestDescriptor::new("POST", "https://abc.supabase.co/rest/v1/comments")
      .with_body(b"{}".to_vec());
    h.fetcher
      .respond_with(&request, Ok(ResponseSnapshot::new(201, b"created".to_vec())));

    let resolved = h.resolver.resolve(&request).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(resolved.response.status, 201);
    assert!(h.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_mutation_http_error_is_not_queued() {
    let h = harness(ScriptedFetcher::online());
    let request = RequestDescriptor::new("PATCH", "https://abc.supabase.co/rest/v1/crops?id=eq.1");
    h.fetcher
      .respond_with(&request, Ok(ResponseSnapshot::new(403, b"forbidden".to_vec())));

    let resolved = h.resolver.resolve(&request).await.unwrap();
    assert_eq!(resolved.response.status, 403);
    assert!(h.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_navigation_serves_precached_shell_offline() {
    let h = harness(ScriptedFetcher::offline());
    h.resolver
      .precache_shell(ResponseSnapshot::ok(b"<html>shell</html>".to_vec()))
      .unwrap();

    let request = get("https://app.example.com/crops/42").with_header("accept", "text/html");
    let resolved = h.resolver.resolve(&request).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::Shell);
    assert_eq!(resolved.response.body, b"<html>shell</html>");
    // Never touches the network.
    assert!(h.fetcher.calls().is_empty());
  }

  #[tokio::test]
  async fn test_navigation_without_precache_is_an_error() {
    let h = harness(ScriptedFetcher::offline());
    let request = get("https://app.example.com/").with_header("accept", "text/html");
    assert!(h.resolver.resolve(&request).await.is_err());
  }

  #[tokio::test]
  async fn test_pass_through_is_uncached_and_errors_propagate() {
    let h = harness(ScriptedFetcher::online());
    let url = "https://cdn.example.com/fonts/inter.woff2";
    let resolved = h.resolver.resolve(&get(url)).await.unwrap();
    assert_eq!(resolved.source, ResponseSource::Network);

    h.fetcher.set_online(false);
    assert!(h.resolver.resolve(&get(url)).await.is_err());
  }
}
