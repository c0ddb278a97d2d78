//! Connectivity tracking and drain triggering.
//!
//! The platform gives no background-sync event here, so connectivity is
//! observed explicitly: a periodic probe against a cheap health endpoint,
//! plus a manual nudge for hosts that already know the network came back.
//! Every offline-to-online transition triggers one drain of the
//! write-replay queue.

use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::http::RequestDescriptor;
use crate::queue::{DrainOutcome, WriteQueue};
use crate::resolver::Fetch;

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Watches connectivity and drains the write queue when it returns.
pub struct ConnectivityMonitor {
  queue: Arc<WriteQueue>,
  fetcher: Arc<dyn Fetch>,
  health_url: String,
  probe_interval: Duration,
  status_tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  pub fn new(queue: Arc<WriteQueue>, fetcher: Arc<dyn Fetch>, health_url: impl Into<String>) -> Self {
    // Assume online until a probe says otherwise.
    let (status_tx, _) = watch::channel(true);
    Self {
      queue,
      fetcher,
      health_url: health_url.into(),
      probe_interval: DEFAULT_PROBE_INTERVAL,
      status_tx,
    }
  }

  pub fn with_probe_interval(mut self, interval: Duration) -> Self {
    self.probe_interval = interval;
    self
  }

  /// Current and future online/offline status.
  pub fn status(&self) -> watch::Receiver<bool> {
    self.status_tx.subscribe()
  }

  pub fn is_online(&self) -> bool {
    *self.status_tx.borrow()
  }

  /// Explicit connectivity-restored signal: marks the link online and
  /// drains the queue now. The drain itself is non-reentrant, so racing
  /// signals cannot overlap replays.
  pub async fn notify_online(&self) -> Result<DrainOutcome> {
    self.status_tx.send_replace(true);
    self.queue.drain_all(self.fetcher.as_ref()).await
  }

  /// Explicit connectivity-lost signal.
  pub fn notify_offline(&self) {
    self.status_tx.send_replace(false);
  }

  /// Probe loop. Spawn with `tokio::spawn(monitor.run())`; runs for the
  /// life of the process.
  pub async fn run(self: Arc<Self>) {
    let mut online = self.is_online();
    loop {
      tokio::time::sleep(self.probe_interval).await;
      let now_online = self.probe().await;

      if now_online && !online {
        tracing::info!("connectivity restored, draining write queue");
        match self.queue.drain_all(self.fetcher.as_ref()).await {
          Ok(outcome) => {
            tracing::info!(
              replayed = outcome.replayed,
              dropped_expired = outcome.dropped_expired,
              dropped_rejected = outcome.dropped_rejected,
              aborted = outcome.aborted,
              "drain cycle finished"
            );
          }
          Err(err) => tracing::warn!(%err, "drain cycle failed"),
        }
      }

      if now_online != online {
        self.status_tx.send_replace(now_online);
        online = now_online;
      }
    }
  }

  async fn probe(&self) -> bool {
    let request = RequestDescriptor::new("HEAD", &self.health_url);
    self.fetcher.fetch(&request).await.is_ok()
  }
}
