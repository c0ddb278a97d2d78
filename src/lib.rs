//! Offline-resilient data-sync layer for the community app.
//!
//! Incoming requests are classified into policy classes by URL and
//! method, then resolved with the matching strategy: network-first with
//! cache fallback for API reads, stale-while-revalidate for assets and
//! weather data, network-or-queue for mutations, and a cache-only
//! application shell. Caches and the write-replay queue live in one
//! SQLite database and survive restarts.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod queue;
pub mod resolver;
pub mod route;
pub mod sync;
pub mod update;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{ApiClient, WriteAck};
pub use config::Config;
pub use error::FetchError;
pub use http::{RequestDescriptor, ResponseSnapshot};
pub use resolver::{Fetch, ResolvedResponse, Resolver, ResponseSource};
pub use route::PolicyClass;
pub use sync::ConnectivityMonitor;
pub use update::{UpdateCoordinator, UpdateEvent};
