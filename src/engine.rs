//! The consumer-facing handle of a bound engine.
//!
//! An [`Engine`] is bound to one endpoint. Handles are cheap to clone and all
//! clones drive the same state. Reads come from the latest published
//! [`Snapshot`]; [`Engine::subscribe`] hands out a watch receiver for reactive
//! consumers.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::coordinator::FetchMode;
use crate::error::SyncError;
use crate::mutation::{is_optimistic, MutationOptions};
use crate::normalize::{Envelope, PageMeta};
use crate::params::Params;
use crate::state::{MutationLoading, Shared, Snapshot};
use crate::transport::Transport;
use crate::triggers::{self, LifecycleBus};

#[derive(Clone)]
pub struct Engine {
  shared: Arc<Shared>,
}

impl Engine {
  /// Bind to `endpoint` and start the interval trigger if one is configured.
  ///
  /// Must be called inside a tokio runtime.
  pub fn bind(
    endpoint: impl Into<String>,
    config: EngineConfig,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self::start(endpoint.into(), config, transport, None)
  }

  /// Like [`Engine::bind`], also refetching on the bus's focus and reconnect events.
  pub fn with_lifecycle(
    endpoint: impl Into<String>,
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    bus: &LifecycleBus,
  ) -> Self {
    Self::start(endpoint.into(), config, transport, Some(bus))
  }

  fn start(
    endpoint: String,
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    bus: Option<&LifecycleBus>,
  ) -> Self {
    info!(%endpoint, enabled = config.enabled, "binding engine");
    let shared = Arc::new(Shared::new(endpoint, config, transport));
    triggers::spawn(&shared, bus);
    if shared.config.enabled {
      shared.spawn_fetch(FetchMode::Deduplicate);
    }
    Self { shared }
  }

  pub fn endpoint(&self) -> &str {
    &self.shared.endpoint
  }

  pub fn config(&self) -> &EngineConfig {
    &self.shared.config
  }

  // Output surface

  pub fn snapshot(&self) -> Snapshot {
    self.shared.snapshot()
  }

  pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
    self.shared.subscribe()
  }

  pub fn data(&self) -> Option<Envelope> {
    self.snapshot().data
  }

  pub fn params(&self) -> Params {
    self.snapshot().params
  }

  pub fn is_loading(&self) -> bool {
    self.snapshot().loading
  }

  pub fn error(&self) -> Option<String> {
    self.snapshot().error
  }

  pub fn is_error(&self) -> bool {
    self.snapshot().is_error()
  }

  pub fn mutation_loading(&self) -> MutationLoading {
    self.shared.flags.load()
  }

  // Reads

  /// GET the current parameters unless the same URL is already pending.
  pub async fn get(&self) -> Result<Option<Envelope>, SyncError> {
    self.shared.fetch(FetchMode::Deduplicate).await
  }

  /// GET the current parameters, superseding anything pending.
  pub async fn refetch(&self) -> Result<Option<Envelope>, SyncError> {
    self.shared.fetch(FetchMode::Force).await
  }

  /// Clear the error and retry counter, then refetch.
  pub async fn retry(&self) -> Result<Option<Envelope>, SyncError> {
    self.shared.update(|core| {
      core.error = None;
      core.attempt = 0;
    });
    self.refetch().await
  }

  /// Abort the pending GET. The abort is silent: no error, no retry.
  pub fn cancel(&self) {
    debug!(endpoint = %self.shared.endpoint, "cancel");
    self.shared.cancel_pending();
  }

  /// Merge `partial` into the parameters. Fetches automatically when enabled,
  /// debounced if `search` changed.
  pub fn update_params(&self, partial: Params) {
    let change = self.shared.lock().params.update(&partial);
    self.shared.params_changed(change);
  }

  pub fn update_page(&self, page: i64) -> Result<(), SyncError> {
    let change = self.shared.lock().params.set_page(page)?;
    self.shared.params_changed(change);
    Ok(())
  }

  /// Whether the server has more pages after the held ones.
  ///
  /// `totalPages` is compared with the current page. With only `total`, an
  /// accumulated list compares its server items with it, and a single page
  /// compares `page * per_page`, taking the page size from meta, then the
  /// configured limit, then the last page. Without meta a full last page
  /// means more.
  pub fn has_more(&self) -> bool {
    let core = self.shared.lock();
    let Some(page) = core.params.page() else {
      return false;
    };
    let Some(Envelope::List { items, meta }) = core.data.as_ref() else {
      return false;
    };
    let page = page.max(1) as u64;
    let config = &self.shared.config;

    match meta {
      Some(PageMeta {
        total_pages: Some(total_pages),
        ..
      }) => page < *total_pages,
      Some(PageMeta {
        total: Some(total),
        limit,
        ..
      }) => {
        if config.infinite_scroll {
          let held = items.iter().filter(|item| !is_optimistic(item)).count();
          (held as u64) < *total
        } else {
          let per_page = limit
            .or(config.limit.map(u64::from))
            .unwrap_or(core.last_page_len as u64);
          per_page > 0 && page.saturating_mul(per_page) < *total
        }
      }
      _ => config
        .limit
        .is_some_and(|limit| core.last_page_len >= limit as usize),
    }
  }

  /// Request the next page. Returns whether a load was started.
  pub fn load_more(&self) -> bool {
    let pending = self.shared.lock().pending.is_some();
    if pending || !self.has_more() {
      return false;
    }
    let next = self.shared.lock().params.page().unwrap_or(1) + 1;
    self.update_page(next).is_ok()
  }

  pub fn clear_error(&self) {
    self.shared.update(|core| core.error = None);
  }

  /// Back to the state right after binding: initial parameters, no data.
  pub fn reset(&self) {
    let enabled = self.shared.update(|core| {
      if let Some(token) = core.debounce.take() {
        token.cancel();
      }
      if let Some(pending) = core.pending.take() {
        pending.cancel.cancel();
      }
      core.generation += 1;
      core.params.reset();
      core.data = None;
      core.loading = false;
      core.error = None;
      core.attempt = 0;
      core.last_page_len = 0;
      core.last_page = None;
      core.page_start = 0;
      core.enabled
    });

    info!(endpoint = %self.shared.endpoint, "reset");
    if enabled {
      self.shared.spawn_fetch(FetchMode::Force);
    }
  }

  /// Turn automatic fetching on or off. Turning it on fetches right away;
  /// turning it off closes any open debounce window.
  pub fn set_enabled(&self, enabled: bool) {
    let was = self.shared.update(|core| {
      if !enabled {
        if let Some(token) = core.debounce.take() {
          token.cancel();
        }
      }
      std::mem::replace(&mut core.enabled, enabled)
    });
    if enabled && !was {
      self.shared.spawn_fetch(FetchMode::Deduplicate);
    }
  }

  /// Stop triggers, timers and the pending GET. Idempotent.
  pub fn shutdown(&self) {
    if !self.shared.shutdown.is_cancelled() {
      debug!(endpoint = %self.shared.endpoint, "shutdown");
    }
    self.shared.shutdown.cancel();
    self.shared.cancel_pending();
  }

  // Writes

  pub async fn post(&self, payload: Value, options: MutationOptions) -> Result<Value, SyncError> {
    self.shared.create(payload, options).await
  }

  /// PUT to `endpoint/id`, or to the endpoint itself when `id` is `None`.
  pub async fn put(
    &self,
    id: Option<&str>,
    payload: Value,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    self.shared.replace(id, payload, options).await
  }

  pub async fn patch(
    &self,
    id: Option<&str>,
    payload: Value,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    self.shared.patch(id, payload, options).await
  }

  pub async fn delete(&self, id: &str, options: MutationOptions) -> Result<Value, SyncError> {
    self.shared.delete(id, options).await
  }
}

impl std::fmt::Debug for Engine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Engine")
      .field("endpoint", &self.shared.endpoint)
      .finish_non_exhaustive()
  }
}
