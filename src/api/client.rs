//! Typed client for the community backend and the weather provider.
//!
//! Every call goes through the [`Resolver`], so reads transparently fall
//! back to cache when the network is down and mutations are queued for
//! replay instead of failing. The facade only builds URLs and decodes
//! rows; resilience lives one layer below.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::cache::{CacheStore, SqliteStore};
use crate::config::Config;
use crate::http::{RequestDescriptor, ResponseSnapshot};
use crate::net::HttpFetcher;
use crate::queue::WriteQueue;
use crate::resolver::{Fetch, Resolver, ResponseSource};

use super::types::{
  daily_from_forecast, Article, Comment, CommentInput, Crop, CropInput, CurrentWeather,
  DailyForecast, OwmCurrentResponse, OwmForecastResponse, Post, UserProfile,
};

/// Outcome of a mutating call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAck<T> {
  /// The backend applied the mutation.
  Applied(T),
  /// Offline: the mutation is queued and will replay when connectivity
  /// returns. The caller proceeds as if it succeeded.
  Queued,
}

impl<T> WriteAck<T> {
  pub fn is_queued(&self) -> bool {
    matches!(self, WriteAck::Queued)
  }
}

/// Data-access client with transparent offline resilience.
pub struct ApiClient {
  resolver: Arc<Resolver>,
  base_url: String,
  anon_key: String,
  access_token: Option<String>,
  weather_key: Option<String>,
  city_id: u64,
}

impl ApiClient {
  /// Build a fully wired client: reqwest fetcher, SQLite-backed caches
  /// and write queue at the configured location.
  pub fn new(config: &Config) -> Result<Self> {
    let db_path = config.sync_db_path()?;
    let store = Arc::new(SqliteStore::open(&db_path)?) as Arc<dyn CacheStore>;
    let queue = Arc::new(WriteQueue::open(&db_path)?);
    let fetcher = Arc::new(
      HttpFetcher::new().map_err(|e| eyre!("Failed to create HTTP client: {}", e))?,
    ) as Arc<dyn Fetch>;
    let resolver = Arc::new(Resolver::new(store, queue, fetcher));

    Ok(Self::with_resolver(
      resolver,
      config,
      Config::get_anon_key()?,
      Config::get_weather_key().ok(),
    ))
  }

  /// Build a client over an existing resolver. Used by tests and by
  /// hosts that share one resolver between several facades.
  pub fn with_resolver(
    resolver: Arc<Resolver>,
    config: &Config,
    anon_key: String,
    weather_key: Option<String>,
  ) -> Self {
    Self {
      resolver,
      base_url: config.supabase.url.trim_end_matches('/').to_string(),
      anon_key,
      access_token: None,
      weather_key,
      city_id: config.weather.city_id,
    }
  }

  /// Use the signed-in user's token for subsequent calls (row-level
  /// access control needs it for personal records).
  pub fn set_access_token(&mut self, token: Option<String>) {
    self.access_token = token;
  }

  // Articles ---------------------------------------------------------

  pub async fn list_articles(&self) -> Result<Vec<Article>> {
    let request = self.rest_get("articles?select=*&status=eq.published&order=created_at.desc");
    decode_rows(self.send(&request).await?)
  }

  pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
    let request = self.rest_get(&format!("articles?select=*&id=eq.{}", id));
    let rows: Vec<Article> = decode_rows(self.send(&request).await?)?;
    Ok(rows.into_iter().next())
  }

  // Posts ------------------------------------------------------------

  pub async fn list_posts(&self) -> Result<Vec<Post>> {
    let request = self.rest_get("posts?select=*&status=eq.published&order=created_at.desc");
    decode_rows(self.send(&request).await?)
  }

  pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
    let request = self.rest_get(&format!("posts?select=*&id=eq.{}", id));
    let rows: Vec<Post> = decode_rows(self.send(&request).await?)?;
    Ok(rows.into_iter().next())
  }

  // Comments ---------------------------------------------------------

  pub async fn list_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
    let request = self.rest_get(&format!(
      "comments?select=*&post_id=eq.{}&order=created_at.asc",
      post_id
    ));
    decode_rows(self.send(&request).await?)
  }

  pub async fn create_comment(&self, input: &CommentInput) -> Result<WriteAck<Comment>> {
    let body = serde_json::to_vec(input).map_err(|e| eyre!("Failed to encode comment: {}", e))?;
    let request = self.rest_write("POST", "comments", body);
    self.write(&request).await
  }

  pub async fn delete_comment(&self, id: &str) -> Result<WriteAck<()>> {
    let request = self.rest_delete(&format!("comments?id=eq.{}", id));
    self.write_no_content(&request).await
  }

  // Crops ------------------------------------------------------------

  pub async fn list_crops(&self, user_id: &str) -> Result<Vec<Crop>> {
    let request = self.rest_get(&format!(
      "crops?select=*&user_id=eq.{}&order=created_at.desc",
      user_id
    ));
    decode_rows(self.send(&request).await?)
  }

  pub async fn create_crop(&self, user_id: &str, input: &CropInput) -> Result<WriteAck<Crop>> {
    let mut payload = serde_json::to_value(input).map_err(|e| eyre!("Failed to encode crop: {}", e))?;
    payload["user_id"] = serde_json::Value::String(user_id.to_string());
    let body =
      serde_json::to_vec(&payload).map_err(|e| eyre!("Failed to encode crop: {}", e))?;
    let request = self.rest_write("POST", "crops", body);
    self.write(&request).await
  }

  pub async fn update_crop(&self, id: &str, patch: &CropInput) -> Result<WriteAck<Crop>> {
    let body = serde_json::to_vec(patch).map_err(|e| eyre!("Failed to encode crop: {}", e))?;
    let request = self.rest_write("PATCH", &format!("crops?id=eq.{}", id), body);
    self.write(&request).await
  }

  pub async fn delete_crop(&self, id: &str) -> Result<WriteAck<()>> {
    let request = self.rest_delete(&format!("crops?id=eq.{}", id));
    self.write_no_content(&request).await
  }

  // Profiles ---------------------------------------------------------

  pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
    let request = self.rest_get(&format!("profiles?select=*&id=eq.{}", user_id));
    let rows: Vec<UserProfile> = decode_rows(self.send(&request).await?)?;
    Ok(rows.into_iter().next())
  }

  // Weather ----------------------------------------------------------

  pub async fn current_weather(&self) -> Result<CurrentWeather> {
    let key = self
      .weather_key
      .as_deref()
      .ok_or_else(|| eyre!("No weather API key configured"))?;
    let url = format!(
      "https://api.openweathermap.org/data/2.5/weather?id={}&appid={}&lang=es",
      self.city_id, key
    );
    let response = self.send(&RequestDescriptor::get(url)).await?;
    expect_success(&response)?;
    let raw: OwmCurrentResponse = decode_json(response)?;
    Ok(raw.into())
  }

  /// Daily forecast for the configured city, aggregated from the free
  /// 5-day 3-hourly endpoint.
  pub async fn daily_forecast(&self) -> Result<Vec<DailyForecast>> {
    let key = self
      .weather_key
      .as_deref()
      .ok_or_else(|| eyre!("No weather API key configured"))?;
    let url = format!(
      "https://api.openweathermap.org/data/2.5/forecast?id={}&appid={}&lang=es",
      self.city_id, key
    );
    let response = self.send(&RequestDescriptor::get(url)).await?;
    expect_success(&response)?;
    let raw: OwmForecastResponse = decode_json(response)?;
    Ok(daily_from_forecast(raw))
  }

  /// Fetch one weather-overlay tile (PNG bytes).
  pub async fn map_tile(&self, layer: &str, z: u32, x: u32, y: u32) -> Result<Vec<u8>> {
    let key = self
      .weather_key
      .as_deref()
      .ok_or_else(|| eyre!("No weather API key configured"))?;
    let url = format!(
      "https://a.tile.openweathermap.org/map/{}/{}/{}/{}.png?appid={}",
      layer, z, x, y, key
    );
    let response = self.send(&RequestDescriptor::get(url)).await?;
    expect_success(&response)?;
    Ok(response.body)
  }

  // Storage ----------------------------------------------------------

  /// Fetch a public object (e.g. an article image) from backend storage.
  pub async fn storage_object(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
    let url = format!(
      "{}/storage/v1/object/public/{}/{}",
      self.base_url, bucket, path
    );
    let response = self.send(&RequestDescriptor::get(url)).await?;
    expect_success(&response)?;
    Ok(response.body)
  }

  // Plumbing ---------------------------------------------------------

  fn rest_get(&self, path_query: &str) -> RequestDescriptor {
    self.with_auth(RequestDescriptor::get(format!(
      "{}/rest/v1/{}",
      self.base_url, path_query
    )))
    .with_header("accept", "application/json")
  }

  fn rest_write(&self, method: &str, path_query: &str, body: Vec<u8>) -> RequestDescriptor {
    self
      .with_auth(RequestDescriptor::new(
        method,
        format!("{}/rest/v1/{}", self.base_url, path_query),
      ))
      .with_header("content-type", "application/json")
      // Ask the backend to return the written row.
      .with_header("prefer", "return=representation")
      .with_body(body)
  }

  fn rest_delete(&self, path_query: &str) -> RequestDescriptor {
    self.with_auth(RequestDescriptor::new(
      "DELETE",
      format!("{}/rest/v1/{}", self.base_url, path_query),
    ))
  }

  fn with_auth(&self, request: RequestDescriptor) -> RequestDescriptor {
    let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
    request
      .with_header("apikey", &self.anon_key)
      .with_header("authorization", format!("Bearer {}", bearer))
  }

  async fn send(&self, request: &RequestDescriptor) -> Result<ResponseSnapshot> {
    let resolved = self
      .resolver
      .resolve(request)
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;
    Ok(resolved.response)
  }

  /// Mutation returning the written row, or `Queued` while offline.
  async fn write<T: DeserializeOwned>(&self, request: &RequestDescriptor) -> Result<WriteAck<T>> {
    let resolved = self
      .resolver
      .resolve(request)
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;

    if resolved.source == ResponseSource::PendingSync {
      return Ok(WriteAck::Queued);
    }
    expect_success(&resolved.response)?;
    let rows: Vec<T> = decode_json(resolved.response)?;
    rows
      .into_iter()
      .next()
      .map(WriteAck::Applied)
      .ok_or_else(|| eyre!("Backend returned no row for {}", request.url))
  }

  /// Mutation where the backend returns no body (DELETE).
  async fn write_no_content(&self, request: &RequestDescriptor) -> Result<WriteAck<()>> {
    let resolved = self
      .resolver
      .resolve(request)
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;

    if resolved.source == ResponseSource::PendingSync {
      return Ok(WriteAck::Queued);
    }
    expect_success(&resolved.response)?;
    Ok(WriteAck::Applied(()))
  }
}

fn expect_success(response: &ResponseSnapshot) -> Result<()> {
  if response.is_success() {
    Ok(())
  } else {
    Err(eyre!(
      "Backend returned status {}: {}",
      response.status,
      String::from_utf8_lossy(&response.body)
    ))
  }
}

fn decode_json<T: DeserializeOwned>(response: ResponseSnapshot) -> Result<T> {
  serde_json::from_slice(&response.body).map_err(|e| eyre!("Failed to parse response: {}", e))
}

fn decode_rows<T: DeserializeOwned>(response: ResponseSnapshot) -> Result<Vec<T>> {
  expect_success(&response)?;
  decode_json(response)
}
