use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use agrosync::cache::{all_policies, CacheStore, SqliteStore};
use agrosync::config::Config;
use agrosync::net::HttpFetcher;
use agrosync::queue::WriteQueue;
use agrosync::resolver::Fetch;

#[derive(Parser, Debug)]
#[command(name = "agrosync")]
#[command(about = "Maintenance tool for the offline sync database")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/agrosync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show per-cache entry counts and the queued-mutation count
  Stats,
  /// Sweep expired entries from every cache
  Evict,
  /// Replay queued mutations against the backend now
  Drain,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agrosync=info".into()),
    )
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let db_path = config.sync_db_path()?;

  match args.command {
    Command::Stats => {
      let store = SqliteStore::open(&db_path)?;
      let queue = WriteQueue::open(&db_path)?;
      for policy in all_policies() {
        println!("{:<20} {:>6} entries", policy.cache_name, store.count(policy)?);
      }
      println!("{:<20} {:>6} queued", "write-queue", queue.len()?);
    }
    Command::Evict => {
      let store = SqliteStore::open(&db_path)?;
      for policy in all_policies() {
        let expired = store.evict_expired(policy)?;
        let over = store.evict_over_capacity(policy)?;
        if expired > 0 || over > 0 {
          println!(
            "{}: removed {} expired, {} over capacity",
            policy.cache_name, expired, over
          );
        }
      }
    }
    Command::Drain => {
      let queue = Arc::new(WriteQueue::open(&db_path)?);
      let fetcher: Arc<dyn Fetch> =
        Arc::new(HttpFetcher::new().map_err(|e| eyre!("Failed to create HTTP client: {}", e))?);
      let outcome = queue.drain_all(fetcher.as_ref()).await?;
      println!(
        "replayed {}, dropped {} expired, dropped {} rejected{}",
        outcome.replayed,
        outcome.dropped_expired,
        outcome.dropped_rejected,
        if outcome.aborted { " (aborted: still offline)" } else { "" }
      );
    }
  }

  Ok(())
}
