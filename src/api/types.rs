//! Domain models for the community backend and the weather provider.
//!
//! Field names follow the backend's column names (snake_case rows from
//! the REST interface), so these types deserialize rows directly.

use serde::{Deserialize, Serialize};

/// Minimal author reference embedded in articles, posts and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRef {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
}

/// Publication state shared by articles and posts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
  Published,
  Draft,
}

/// An editorial article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
  pub id: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub slug: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub excerpt: Option<String>,
  pub content_html: String,
  #[serde(default)]
  pub images: Vec<String>,
  #[serde(default)]
  pub categories: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<PublishStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comments_count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<AuthorRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub published_at: Option<String>,
}

/// A community post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub excerpt: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
  #[serde(default)]
  pub images: Vec<String>,
  #[serde(default)]
  pub categories: Vec<String>,
  /// e.g. a reading-time badge such as "8 min"
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub badge: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub comments_count: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<AuthorRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<PublishStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
}

/// A comment on a post or article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  pub id: String,
  pub post_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub author: Option<AuthorRef>,
  pub text: String,
  pub created_at: String,
}

/// Payload for creating a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentInput {
  pub post_id: String,
  pub text: String,
}

/// Unit a crop's area is recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaUnit {
  #[serde(rename = "ha")]
  Hectare,
  #[serde(rename = "mz")]
  Manzana,
  #[serde(rename = "m2")]
  SquareMeter,
}

/// Lifecycle state of a crop record. Serialized labels match the
/// backend's Spanish values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CropStatus {
  #[serde(rename = "Sembrado")]
  Sown,
  #[serde(rename = "En crecimiento")]
  Growing,
  #[serde(rename = "Cosechado")]
  Harvested,
  #[serde(rename = "Pausado")]
  Paused,
}

/// A personal crop record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crop {
  pub id: String,
  pub user_id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub crop_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub species_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub species_name: Option<String>,
  pub area: f64,
  pub area_unit: AreaUnit,
  pub status: CropStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sowing_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expected_harvest_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  pub created_at: String,
  pub updated_at: String,
}

/// Payload for creating or patching a crop record. Absent fields are
/// left untouched by a PATCH.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CropInput {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
  pub crop_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub species_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub species_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub area: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub area_unit: Option<AreaUnit>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<CropStatus>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sowing_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub expected_harvest_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

/// A user's public profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub email: Option<String>,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub avatar_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub location: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub role: Option<String>,
}

/// One day of forecast, aggregated from the provider's 3-hourly entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
  /// ISO timestamp pinned to midday of the forecast day.
  pub date: String,
  pub min_c: f64,
  pub max_c: f64,
  /// Probability of precipitation, 0..1 (the day's maximum).
  pub pop: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Current conditions, normalized to the units the UI shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
  pub temp_c: f64,
  pub summary: String,
  pub humidity: u8,
  pub wind_kmh: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub feels_c: Option<f64>,
  pub lat: f64,
  pub lon: f64,
}

// Wire shapes of the weather provider's current-conditions endpoint.

#[derive(Debug, Deserialize)]
pub(crate) struct OwmCurrentResponse {
  pub coord: OwmCoord,
  pub weather: Vec<OwmCondition>,
  pub main: OwmMain,
  pub wind: OwmWind,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmCoord {
  pub lat: f64,
  pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmCondition {
  pub description: String,
  #[serde(default)]
  pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmMain {
  pub temp: f64,
  pub feels_like: f64,
  pub humidity: u8,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmWind {
  pub speed: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmForecastResponse {
  #[serde(default)]
  pub list: Vec<OwmForecastEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmForecastEntry {
  pub dt: i64,
  pub main: OwmForecastMain,
  #[serde(default)]
  pub pop: f64,
  #[serde(default)]
  pub weather: Vec<OwmCondition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OwmForecastMain {
  pub temp: f64,
}

/// Collapse the provider's 3-hourly forecast into at most seven daily
/// summaries: per-day temperature min/max, the day's highest rain
/// probability, and the first description seen.
pub(crate) fn daily_from_forecast(raw: OwmForecastResponse) -> Vec<DailyForecast> {
  let mut days: Vec<DailyForecast> = Vec::new();

  for entry in raw.list {
    let day = match chrono::DateTime::from_timestamp(entry.dt, 0) {
      Some(at) => at.date_naive().to_string(),
      None => continue,
    };
    let temp_c = kelvin_to_celsius(entry.main.temp);
    let condition = entry.weather.first();
    let date = format!("{}T12:00:00Z", day);

    match days.iter_mut().find(|d| d.date == date) {
      Some(existing) => {
        existing.min_c = existing.min_c.min(temp_c);
        existing.max_c = existing.max_c.max(temp_c);
        existing.pop = existing.pop.max(entry.pop);
        if existing.description.is_none() {
          existing.description = condition.map(|c| c.description.clone());
        }
        if existing.icon.is_none() {
          existing.icon = condition.and_then(|c| c.icon.clone());
        }
      }
      None => days.push(DailyForecast {
        date,
        min_c: temp_c,
        max_c: temp_c,
        pop: entry.pop,
        description: condition.map(|c| c.description.clone()),
        icon: condition.and_then(|c| c.icon.clone()),
      }),
    }
  }

  days.truncate(7);
  days
}

impl From<OwmCurrentResponse> for CurrentWeather {
  fn from(raw: OwmCurrentResponse) -> Self {
    Self {
      temp_c: kelvin_to_celsius(raw.main.temp),
      summary: raw
        .weather
        .first()
        .map(|c| capitalize_first(&c.description))
        .unwrap_or_default(),
      humidity: raw.main.humidity,
      wind_kmh: mps_to_kmh(raw.wind.speed),
      feels_c: Some(kelvin_to_celsius(raw.main.feels_like)),
      lat: raw.coord.lat,
      lon: raw.coord.lon,
    }
  }
}

/// Kelvin to Celsius, one decimal.
fn kelvin_to_celsius(k: f64) -> f64 {
  ((k - 273.15) * 10.0).round() / 10.0
}

fn mps_to_kmh(mps: f64) -> u32 {
  (mps * 3.6).round() as u32
}

/// Provider descriptions arrive lowercase ("lluvia ligera").
fn capitalize_first(text: &str) -> String {
  let mut chars = text.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    None => String::new(),
  }
}
