//! Named-cache bounds, one per policy class.

use chrono::{DateTime, Utc};

use crate::route::PolicyClass;

/// Bounds for one named cache: an entry-count ceiling and a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  pub cache_name: &'static str,
  pub max_entries: usize,
  pub max_age_seconds: i64,
}

impl CachePolicy {
  /// Whether an entry stored at `stored_at` has outlived this cache's TTL.
  pub fn is_expired(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now - stored_at).num_seconds() > self.max_age_seconds
  }

  /// Oldest `stored_at` still considered live at `now`.
  pub fn expiry_cutoff(&self, now: DateTime<Utc>) -> i64 {
    now.timestamp() - self.max_age_seconds
  }
}

/// Read-heavy backend REST cache.
pub const API_READ: CachePolicy = CachePolicy {
  cache_name: "api-supabase",
  max_entries: 200,
  max_age_seconds: 3_600,
};

/// Backend object-storage assets (images).
pub const STORAGE_ASSET: CachePolicy = CachePolicy {
  cache_name: "supabase-storage",
  max_entries: 200,
  max_age_seconds: 86_400,
};

/// Weather provider API responses.
pub const WEATHER_DATA: CachePolicy = CachePolicy {
  cache_name: "openweather-api",
  max_entries: 200,
  max_age_seconds: 600,
};

/// Weather provider map tiles.
pub const MAP_TILE: CachePolicy = CachePolicy {
  cache_name: "openweather-tiles",
  max_entries: 300,
  max_age_seconds: 86_400,
};

/// The precached application shell. Served regardless of age; the long
/// TTL only exists so the shell survives routine expiry sweeps.
pub const APP_SHELL: CachePolicy = CachePolicy {
  cache_name: "app-shell",
  max_entries: 16,
  max_age_seconds: 365 * 86_400,
};

/// The named cache backing a policy class, if the class is cached at all.
/// Write mutations go to the replay queue and pass-through is never stored.
pub fn policy_for(class: PolicyClass) -> Option<CachePolicy> {
  match class {
    PolicyClass::ApiRead => Some(API_READ),
    PolicyClass::StorageAsset => Some(STORAGE_ASSET),
    PolicyClass::WeatherData => Some(WEATHER_DATA),
    PolicyClass::MapTile => Some(MAP_TILE),
    PolicyClass::NavigationShell => Some(APP_SHELL),
    PolicyClass::WriteMutation | PolicyClass::PassThrough => None,
  }
}

/// All caches with eviction bounds, for maintenance sweeps and stats.
pub fn all_policies() -> [CachePolicy; 5] {
  [API_READ, STORAGE_ASSET, WEATHER_DATA, MAP_TILE, APP_SHELL]
}
