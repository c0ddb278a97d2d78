//! Request classification: URL pattern + HTTP method to a caching policy.
//!
//! Classification is pure and total: a request matching none of the
//! explicit patterns falls through to [`PolicyClass::PassThrough`], never
//! an error. Patterns are evaluated in a fixed priority order so the
//! method-qualified backend REST rules win over the generic host rules.

use regex::Regex;

use crate::http::RequestDescriptor;

/// The caching/replay strategy assigned to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyClass {
  /// Read-only backend REST query: network-first with cache fallback.
  ApiRead,
  /// Mutating backend call: network-only, queued for replay when offline.
  WriteMutation,
  /// Backend object storage (images): stale-while-revalidate.
  StorageAsset,
  /// Weather provider API: stale-while-revalidate with a short TTL.
  WeatherData,
  /// Weather provider map tiles: stale-while-revalidate.
  MapTile,
  /// Navigation request served from the precached application shell.
  NavigationShell,
  /// No matching pattern: straight to network, never cached.
  PassThrough,
}

/// Assigns every request to exactly one [`PolicyClass`].
pub struct RouteClassifier {
  backend_rest: Regex,
  backend_storage: Regex,
  weather_api: Regex,
  weather_tiles: Regex,
}

impl RouteClassifier {
  pub fn new() -> Self {
    // Hosts mirror the hosted backend (Supabase) and the weather provider.
    Self {
      backend_rest: Regex::new(r"(?i)^https://[a-z0-9-]+\.supabase\.co/rest/v1/.*$")
        .expect("static pattern"),
      backend_storage: Regex::new(r"(?i)^https://[a-z0-9-]+\.supabase\.co/storage/v1/.*$")
        .expect("static pattern"),
      weather_api: Regex::new(r"(?i)^https://api\.openweathermap\.org/.*$")
        .expect("static pattern"),
      weather_tiles: Regex::new(r"(?i)^https://[abc]\.tile\.openweathermap\.org/.*$")
        .expect("static pattern"),
    }
  }

  /// Classify a request. Same descriptor always yields the same class.
  pub fn classify(&self, request: &RequestDescriptor) -> PolicyClass {
    let url = request.url.as_str();
    let method = request.method.as_str();

    if self.backend_rest.is_match(url) {
      return match method {
        "GET" => PolicyClass::ApiRead,
        "POST" | "PATCH" | "DELETE" => PolicyClass::WriteMutation,
        _ => PolicyClass::PassThrough,
      };
    }

    if self.backend_storage.is_match(url) {
      return PolicyClass::StorageAsset;
    }

    if self.weather_api.is_match(url) {
      return PolicyClass::WeatherData;
    }

    if self.weather_tiles.is_match(url) {
      return PolicyClass::MapTile;
    }

    // Unmatched navigation requests get the application shell so the app
    // boots even fully offline.
    if method == "GET" && is_navigation(request) {
      return PolicyClass::NavigationShell;
    }

    PolicyClass::PassThrough
  }
}

impl Default for RouteClassifier {
  fn default() -> Self {
    Self::new()
  }
}

/// A navigation request asks for an HTML document.
fn is_navigation(request: &RequestDescriptor) -> bool {
  request
    .header("accept")
    .map(|accept| accept.contains("text/html"))
    .unwrap_or(false)
}
