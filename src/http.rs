//! Request and response value types shared across the sync layer.

use serde::{Deserialize, Serialize};

/// Header marking a synthetic response for a mutation queued for replay.
pub const PENDING_SYNC_HEADER: &str = "x-sync-pending";

/// An outgoing HTTP request as seen by the resilience layer.
///
/// Immutable once issued; classified exactly once. Serializable so that
/// mutations can be persisted in the write-replay queue and reissued later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
  pub url: String,
  /// Uppercase HTTP method ("GET", "POST", "PATCH", "DELETE", ...)
  pub method: String,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Vec<u8>>,
}

impl RequestDescriptor {
  pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: method.into().to_uppercase(),
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new("GET", url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: Vec<u8>) -> Self {
    self.body = Some(body);
    self
  }

  /// Look up a header value by name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A materialized HTTP response: what the layer caches, replays against,
/// and hands back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(default)]
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, body: Vec<u8>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body,
    }
  }

  pub fn ok(body: Vec<u8>) -> Self {
    Self::new(200, body)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Look up a header value by name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Synthetic "accepted, pending sync" response returned to the caller
  /// when a mutation is enqueued for later replay instead of failing.
  pub fn accepted_pending_sync() -> Self {
    Self::new(202, b"{}".to_vec())
      .with_header(PENDING_SYNC_HEADER, "true")
      .with_header("content-type", "application/json")
  }

  /// True for the synthetic response produced by [`accepted_pending_sync`].
  ///
  /// [`accepted_pending_sync`]: Self::accepted_pending_sync
  pub fn is_pending_sync(&self) -> bool {
    self.status == 202 && self.header(PENDING_SYNC_HEADER) == Some("true")
  }
}
