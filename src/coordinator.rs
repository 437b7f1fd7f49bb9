//! GET orchestration: deduplication, debouncing, retries and stale-result discarding.
//!
//! Each issued GET gets a fresh id from a generation counter and replaces the
//! previous in-flight request, whose token is canceled. A result is applied
//! only if its id is still the current generation when it comes back, so
//! results land in completion order filtered by freshness. Cancellation is
//! best-effort: a transport may finish a superseded request anyway, and that
//! result is simply dropped.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{classify, SyncError};
use crate::mutation::is_optimistic;
use crate::normalize::{normalize, Envelope};
use crate::params::ParamChange;
use crate::state::{Core, Shared};
use crate::url_builder::build_url;

/// The in-flight GET.
#[derive(Debug, Clone)]
pub(crate) struct RequestDescriptor {
  pub(crate) id: u64,
  pub(crate) url: String,
  pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
  /// Skip the request when the same URL is already pending.
  Deduplicate,
  /// Always issue, superseding whatever is pending.
  Force,
}

enum Failure {
  /// Superseded or aborted; leave state alone.
  Discard,
  Surface,
  Retry { delay: Duration },
}

impl Shared {
  /// Issue a GET for the current parameters and apply its result.
  ///
  /// Resolves to `Ok(None)` when the call turned out to be a no-op: a
  /// duplicate of the pending request, superseded by a newer one, or aborted.
  pub(crate) async fn fetch(self: &Arc<Self>, mode: FetchMode) -> Result<Option<Envelope>, SyncError> {
    let Some((mut id, url, mut cancel)) = self.begin(mode)? else {
      return Ok(None);
    };

    loop {
      let error = match self.transport.get(&url, cancel.clone()).await {
        Ok(response) => return Ok(self.apply(id, response.body)),
        Err(err) => classify(err),
      };

      match self.settle_failure(id, &error) {
        Failure::Discard => return Ok(None),
        Failure::Surface => {
          warn!(%url, %error, "GET failed");
          return Err(error);
        }
        Failure::Retry { delay } => {
          warn!(%url, %error, delay_ms = delay.as_millis() as u64, "GET failed, retrying");
          tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep(delay) => {}
          }
          match self.reissue(id) {
            Some((next_id, next_cancel)) => {
              id = next_id;
              cancel = next_cancel;
            }
            None => return Ok(None),
          }
        }
      }
    }
  }

  /// Mint a request id and make it the pending request.
  fn begin(&self, mode: FetchMode) -> Result<Option<(u64, String, CancellationToken)>, SyncError> {
    let mut core = self.lock();

    let url = self
      .request_url(&core)
      .ok_or_else(|| SyncError::InvalidUrl {
        endpoint: self.endpoint.clone(),
      })?;

    if mode == FetchMode::Deduplicate {
      if let Some(pending) = &core.pending {
        if pending.url == url {
          debug!(%url, "GET already pending, skipping");
          return Ok(None);
        }
      }
    }

    if let Some(previous) = core.pending.take() {
      debug!(id = previous.id, url = %previous.url, "superseding pending GET");
      previous.cancel.cancel();
    }

    core.generation += 1;
    let id = core.generation;
    let cancel = self.shutdown.child_token();
    core.pending = Some(RequestDescriptor {
      id,
      url: url.clone(),
      cancel: cancel.clone(),
    });
    core.loading = true;
    self.publish(&core);

    debug!(id, %url, "GET issued");
    Ok(Some((id, url, cancel)))
  }

  fn request_url(&self, core: &Core) -> Option<String> {
    build_url(
      &self.endpoint,
      core.params.current(),
      self.config.limit,
      self.config.resource_id.as_deref(),
    )
  }

  /// Apply a successful body if `id` is still current.
  ///
  /// Under infinite scroll the page after the last applied one is appended,
  /// and a refetch of the last applied page replaces its slice. Any other
  /// list replaces the held one. Placeholders of creates still in flight are
  /// carried over in front.
  fn apply(&self, id: u64, body: Value) -> Option<Envelope> {
    let mut core = self.lock();
    if core.generation != id {
      debug!(id, current = core.generation, "discarding stale GET result");
      return None;
    }

    let incoming = normalize(body);
    core.last_page_len = incoming.len();
    let page = core.params.page().unwrap_or(1);

    let next = match incoming {
      Envelope::List { items, meta } => {
        let held = match core.data.take() {
          Some(Envelope::List { items, .. }) => items,
          _ => Vec::new(),
        };
        let (mut merged, mut held): (Vec<Value>, Vec<Value>) =
          held.into_iter().partition(is_optimistic);

        let accumulate = self.config.infinite_scroll && page > 1;
        match core.last_page {
          Some(last) if accumulate && last == page - 1 => core.page_start = held.len(),
          Some(last) if accumulate && last == page => held.truncate(core.page_start),
          _ => {
            core.page_start = 0;
            held.clear();
          }
        }
        core.last_page = Some(page);

        merged.extend(held);
        merged.extend(items);
        Envelope::List {
          items: merged,
          meta,
        }
      }
      single => {
        core.last_page = None;
        core.page_start = 0;
        single
      }
    };

    core.data = Some(next.clone());
    core.loading = false;
    core.error = None;
    core.attempt = 0;
    core.pending = None;
    self.publish(&core);

    Some(next)
  }

  fn settle_failure(&self, id: u64, error: &SyncError) -> Failure {
    let mut core = self.lock();
    if core.generation != id || error.is_abort() {
      return Failure::Discard;
    }

    if error.is_retryable() && core.attempt < self.config.retry_count {
      let factor = 2u32.checked_pow(core.attempt).unwrap_or(u32::MAX);
      let delay = self.config.retry_delay().saturating_mul(factor);
      core.attempt += 1;
      self.publish(&core);
      return Failure::Retry { delay };
    }

    core.loading = false;
    core.error = Some(error.to_string());
    core.pending = None;
    self.publish(&core);
    Failure::Surface
  }

  /// New id and token for a retry of `id`, unless something superseded it
  /// meanwhile or the parameters moved away from its URL.
  fn reissue(&self, id: u64) -> Option<(u64, CancellationToken)> {
    let mut core = self.lock();
    if core.generation != id {
      return None;
    }
    let url = self.request_url(&core);
    let pending_url = core.pending.as_ref()?.url.clone();
    if url.as_deref() != Some(pending_url.as_str()) {
      debug!(id, url = %pending_url, "parameters changed during backoff, dropping retry");
      core.pending = None;
      core.loading = false;
      self.publish(&core);
      return None;
    }

    let cancel = self.shutdown.child_token();
    core.generation = id + 1;
    if let Some(pending) = core.pending.as_mut() {
      pending.id = id + 1;
      pending.cancel = cancel.clone();
    }
    Some((id + 1, cancel))
  }

  /// Fire-and-forget fetch; results are observed through snapshots.
  pub(crate) fn spawn_fetch(self: &Arc<Self>, mode: FetchMode) {
    let shared = Arc::clone(self);
    tokio::spawn(async move {
      if let Err(err) = shared.fetch(mode).await {
        debug!(%err, "background GET failed");
      }
    });
  }

  /// Fetch after the debounce window, restarting any window already open.
  pub(crate) fn spawn_debounced(self: &Arc<Self>) {
    let token = self.shutdown.child_token();
    if let Some(previous) = self.lock().debounce.replace(token.clone()) {
      previous.cancel();
    }

    let shared = Arc::clone(self);
    let window = self.config.debounce();
    tokio::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(window) => {}
      }
      {
        let mut core = shared.lock();
        if token.is_cancelled() {
          return;
        }
        core.debounce = None;
        if !core.enabled {
          return;
        }
      }
      if let Err(err) = shared.fetch(FetchMode::Deduplicate).await {
        debug!(%err, "debounced GET failed");
      }
    });
  }

  /// Schedule the automatic fetch that follows a parameter change.
  ///
  /// A search change opens the debounce window; any call while the window is
  /// open restarts it. Other changes fetch right away.
  pub(crate) fn params_changed(self: &Arc<Self>, change: ParamChange) {
    let debounce = {
      let mut core = self.lock();
      let window_open = core.debounce.is_some();
      if !change.changed && !window_open {
        return;
      }
      if change.changed {
        core.attempt = 0;
      }
      self.publish(&core);
      if !core.enabled {
        return;
      }
      change.search_changed || window_open
    };

    if debounce {
      self.spawn_debounced();
    } else {
      self.spawn_fetch(FetchMode::Deduplicate);
    }
  }

  /// Abort the pending GET and any open debounce window.
  pub(crate) fn cancel_pending(&self) {
    self.update(|core| {
      if let Some(token) = core.debounce.take() {
        token.cancel();
      }
      if let Some(pending) = core.pending.take() {
        pending.cancel.cancel();
        core.generation += 1;
      }
      core.loading = false;
    });
  }
}
