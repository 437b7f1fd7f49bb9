//! Passive refetch triggers: visibility, reconnect and a fixed interval.
//!
//! The host feeds visibility and connectivity changes into a [`LifecycleBus`].
//! Trigger tasks hold only a weak reference to the engine and stop on
//! teardown. Every trigger goes through the same deduplicating fetch entry as
//! parameter changes.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::coordinator::FetchMode;
use crate::state::Shared;

/// Environment changes a host can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
  Visible,
  Hidden,
  Online,
  Offline,
}

/// Broadcasts lifecycle events to every engine bound with it.
#[derive(Debug, Clone)]
pub struct LifecycleBus {
  tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleBus {
  pub fn new() -> Self {
    let (tx, _) = broadcast::channel(32);
    Self { tx }
  }

  pub fn emit(&self, event: LifecycleEvent) {
    // No listeners is fine
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
    self.tx.subscribe()
  }
}

impl Default for LifecycleBus {
  fn default() -> Self {
    Self::new()
  }
}

/// Decides which events should refetch.
///
/// Only transitions count: becoming visible after being hidden, coming back
/// online after being offline.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleWatch {
  on_focus: bool,
  on_reconnect: bool,
  visible: bool,
  online: bool,
}

impl LifecycleWatch {
  pub(crate) fn new(on_focus: bool, on_reconnect: bool) -> Self {
    Self {
      on_focus,
      on_reconnect,
      visible: true,
      online: true,
    }
  }

  pub(crate) fn observe(&mut self, event: LifecycleEvent) -> bool {
    match event {
      LifecycleEvent::Visible => {
        let was_hidden = !self.visible;
        self.visible = true;
        self.on_focus && was_hidden
      }
      LifecycleEvent::Hidden => {
        self.visible = false;
        false
      }
      LifecycleEvent::Online => {
        let was_offline = !self.online;
        self.online = true;
        self.on_reconnect && was_offline
      }
      LifecycleEvent::Offline => {
        self.online = false;
        false
      }
    }
  }
}

/// Start the triggers enabled in the engine's config.
pub(crate) fn spawn(shared: &Arc<Shared>, bus: Option<&LifecycleBus>) {
  let config = &shared.config;

  if let Some(bus) = bus {
    if config.refetch_on_window_focus || config.refetch_on_reconnect {
      let watch = LifecycleWatch::new(config.refetch_on_window_focus, config.refetch_on_reconnect);
      tokio::spawn(listen(
        Arc::downgrade(shared),
        shared.shutdown.clone(),
        bus.subscribe(),
        watch,
      ));
    }
  }

  if let Some(period) = config.refetch_interval() {
    tokio::spawn(tick(Arc::downgrade(shared), shared.shutdown.clone(), period));
  }
}

async fn listen(
  engine: Weak<Shared>,
  shutdown: CancellationToken,
  mut rx: broadcast::Receiver<LifecycleEvent>,
  mut watch: LifecycleWatch,
) {
  loop {
    let event = tokio::select! {
      _ = shutdown.cancelled() => break,
      event = rx.recv() => event,
    };

    let event = match event {
      Ok(event) => event,
      Err(RecvError::Lagged(skipped)) => {
        debug!(skipped, "lifecycle listener lagged");
        continue;
      }
      Err(RecvError::Closed) => break,
    };

    if watch.observe(event) {
      let Some(shared) = engine.upgrade() else {
        break;
      };
      debug!(?event, endpoint = %shared.endpoint, "lifecycle refetch");
      trigger(&shared);
    }
  }
}

async fn tick(engine: Weak<Shared>, shutdown: CancellationToken, period: Duration) {
  let mut interval = tokio::time::interval(period);
  interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
  // The first tick completes immediately; the bind fetch already covers it
  interval.tick().await;

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      _ = interval.tick() => {}
    }
    let Some(shared) = engine.upgrade() else {
      break;
    };
    trigger(&shared);
  }
}

fn trigger(shared: &Arc<Shared>) {
  if shared.lock().enabled {
    shared.spawn_fetch(FetchMode::Deduplicate);
  }
}
