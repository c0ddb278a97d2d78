//! Scripted network fetcher shared by the module tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::FetchError;
use crate::http::{RequestDescriptor, ResponseSnapshot};
use crate::resolver::Fetch;

/// A fake network: scripted responses per (method, url), an online/offline
/// switch, an optional artificial latency, and a call log.
pub struct ScriptedFetcher {
  online: AtomicBool,
  delay: Mutex<Option<Duration>>,
  responses: Mutex<HashMap<String, Result<ResponseSnapshot, FetchError>>>,
  calls: Mutex<Vec<RequestDescriptor>>,
  delivered: Mutex<Vec<RequestDescriptor>>,
}

fn route_key(method: &str, url: &str) -> String {
  format!("{} {}", method, url)
}

impl ScriptedFetcher {
  pub fn online() -> Self {
    Self {
      online: AtomicBool::new(true),
      delay: Mutex::new(None),
      responses: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      delivered: Mutex::new(Vec::new()),
    }
  }

  pub fn offline() -> Self {
    let fetcher = Self::online();
    fetcher.online.store(false, Ordering::SeqCst);
    fetcher
  }

  pub fn with_delay(self, delay: Duration) -> Self {
    *self.delay.lock().unwrap() = Some(delay);
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Script the response for requests matching this descriptor's method
  /// and URL. The response is returned on every matching call.
  pub fn respond_with(
    &self,
    request: &RequestDescriptor,
    response: Result<ResponseSnapshot, FetchError>,
  ) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(route_key(&request.method, &request.url), response);
  }

  pub fn respond_to(
    &self,
    method: &str,
    url: &str,
    response: Result<ResponseSnapshot, FetchError>,
  ) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(route_key(method, url), response);
  }

  /// Every fetch attempt, including ones that failed with a
  /// connectivity error.
  pub fn calls(&self) -> Vec<RequestDescriptor> {
    self.calls.lock().unwrap().clone()
  }

  /// Fetches that actually produced an HTTP response ("reached the
  /// backend").
  pub fn delivered(&self) -> Vec<RequestDescriptor> {
    self.delivered.lock().unwrap().clone()
  }

  pub fn delivered_count(&self, method: &str, url: &str) -> usize {
    self
      .delivered
      .lock()
      .unwrap()
      .iter()
      .filter(|r| r.method == method && r.url == url)
      .count()
  }
}

#[async_trait]
impl Fetch for ScriptedFetcher {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot, FetchError> {
    self.calls.lock().unwrap().push(request.clone());

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    if !self.online.load(Ordering::SeqCst) {
      return Err(FetchError::Connectivity("scripted offline".into()));
    }

    let scripted = self
      .responses
      .lock()
      .unwrap()
      .get(&route_key(&request.method, &request.url))
      .cloned();

    let result = match scripted {
      Some(result) => result,
      None => Ok(ResponseSnapshot::ok(b"ok".to_vec())),
    };

    if result.is_ok() {
      self.delivered.lock().unwrap().push(request.clone());
    }
    result
  }
}
