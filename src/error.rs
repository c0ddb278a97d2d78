//! Error taxonomy for network fetches.
//!
//! Only failures that never produced an HTTP response are errors at this
//! level. Responses with 4xx/5xx status codes come back as ordinary
//! [`ResponseSnapshot`](crate::http::ResponseSnapshot)s and are propagated
//! to the caller untouched, never cached, queued, or retried.

use std::fmt;

/// Failure modes of a single network fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  /// The request never reached the backend: DNS failure, refused or
  /// dropped connection, or timeout. Recoverable locally by cache
  /// fallback (reads) or enqueue-for-replay (writes).
  Connectivity(String),
  /// The request could not be constructed (bad URL, invalid header).
  /// Not recoverable by retrying.
  InvalidRequest(String),
}

impl FetchError {
  pub fn is_connectivity(&self) -> bool {
    matches!(self, FetchError::Connectivity(_))
  }
}

impl fmt::Display for FetchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FetchError::Connectivity(msg) => write!(f, "connectivity error: {}", msg),
      FetchError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
    }
  }
}

impl std::error::Error for FetchError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_connectivity_classification() {
    assert!(FetchError::Connectivity("timeout".into()).is_connectivity());
    assert!(!FetchError::InvalidRequest("bad url".into()).is_connectivity());
  }
}
