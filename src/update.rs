//! Update-availability coordination between the background update check
//! and the running application.
//!
//! An explicit singleton service: constructed once at startup, injected
//! where needed, never torn down within a process. The state machine is
//! Idle -> UpdateAvailable -> Idle, where the only way back is
//! [`UpdateCoordinator::activate_and_reload`] (whose reload restarts the
//! process, so the cycle runs at most once per deployed version).

use color_eyre::Result;
use std::sync::{Arc, Mutex};

/// Typed notification delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
  /// A new version of the application is staged and waiting to activate.
  UpdateAvailable,
  /// Activation is about to happen; hide the prompt before the reload.
  UpdateApplied,
}

/// Applies a staged update: tells the waiting version to take control
/// and forces a full reload of the application.
pub trait ApplyUpdate: Send + Sync {
  fn apply(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Idle,
  UpdateAvailable,
}

type Listener = Arc<dyn Fn(UpdateEvent) + Send + Sync>;

struct Inner {
  state: State,
  listeners: Vec<(u64, Listener)>,
  next_id: u64,
}

/// Process-wide update notification channel.
pub struct UpdateCoordinator {
  inner: Arc<Mutex<Inner>>,
  applier: Box<dyn ApplyUpdate>,
}

impl UpdateCoordinator {
  pub fn new(applier: Box<dyn ApplyUpdate>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Inner {
        state: State::Idle,
        listeners: Vec::new(),
        next_id: 0,
      })),
      applier,
    }
  }

  // A panicked listener must not wedge the coordinator for the rest of
  // the process; recover the guard on poison.
  fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Register a listener. Dropping (or explicitly unsubscribing) the
  /// returned handle removes it.
  pub fn subscribe<F>(&self, listener: F) -> Subscription
  where
    F: Fn(UpdateEvent) + Send + Sync + 'static,
  {
    let mut inner = self.lock_inner();
    let id = inner.next_id;
    inner.next_id += 1;
    inner.listeners.push((id, Arc::new(listener)));
    Subscription {
      id,
      inner: Arc::clone(&self.inner),
    }
  }

  /// Whether an update is currently staged.
  pub fn update_available(&self) -> bool {
    self.lock_inner().state == State::UpdateAvailable
  }

  /// Signal that a new version was detected waiting to activate.
  ///
  /// Fires at most once per page lifetime: a second detection before the
  /// first is acted on is a no-op, not a duplicate notification. Returns
  /// whether subscribers were notified.
  pub fn notify_update_available(&self) -> bool {
    let listeners = {
      let mut inner = self.lock_inner();
      if inner.state == State::UpdateAvailable {
        tracing::debug!("update already staged, ignoring duplicate detection");
        return false;
      }
      inner.state = State::UpdateAvailable;
      inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>()
    };

    tracing::info!("new application version available");
    // Notify outside the lock so a listener may subscribe/unsubscribe.
    for listener in listeners {
      listener(UpdateEvent::UpdateAvailable);
    }
    true
  }

  /// Activate the staged version and reload. Listeners are notified with
  /// [`UpdateEvent::UpdateApplied`] immediately beforehand so UI can hide
  /// the prompt. A no-op when nothing is staged.
  pub fn activate_and_reload(&self) -> Result<()> {
    let listeners = {
      let mut inner = self.lock_inner();
      if inner.state != State::UpdateAvailable {
        tracing::debug!("no update staged, nothing to activate");
        return Ok(());
      }
      inner.state = State::Idle;
      inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>()
    };

    for listener in listeners {
      listener(UpdateEvent::UpdateApplied);
    }

    tracing::info!("activating new application version");
    self.applier.apply()
  }
}

/// Handle returned by [`UpdateCoordinator::subscribe`]; removing it stops
/// further notifications.
pub struct Subscription {
  id: u64,
  inner: Arc<Mutex<Inner>>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    // Drop does the work.
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Ok(mut inner) = self.inner.lock() {
      inner.listeners.retain(|(id, _)| *id != self.id);
    }
  }
}
