//! reqwest-backed network fetcher.

use async_trait::async_trait;

use crate::error::FetchError;
use crate::http::{RequestDescriptor, ResponseSnapshot};
use crate::resolver::Fetch;

/// Real network implementation of the [`Fetch`] seam.
///
/// Per-attempt timeouts are owned by the resolver, so the client itself
/// carries none; a hung socket is abandoned by the caller.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("agrosync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| FetchError::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|e| FetchError::InvalidRequest(format!("bad method {}: {}", request.method, e)))?;

    let mut builder = self.client.request(method, &request.url);
    for (name, value) in &request.headers {
      builder = builder.header(name, value);
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder.send().await.map_err(classify_reqwest_error)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::Connectivity(format!("connection dropped mid-body: {}", e)))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
    })
  }
}

fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
  if err.is_builder() {
    FetchError::InvalidRequest(err.to_string())
  } else {
    // Everything that made it past request construction but produced no
    // HTTP response is a connectivity failure: DNS, connect, timeout.
    FetchError::Connectivity(err.to_string())
  }
}
