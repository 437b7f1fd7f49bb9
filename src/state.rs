//! Engine state: the shared container and the snapshots published from it.
//!
//! All state lives behind one mutex that is only locked for short,
//! non-async sections. Every change is followed by publishing a fresh
//! [`Snapshot`] on a watch channel, which is how consumers observe the engine.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::coordinator::RequestDescriptor;
use crate::normalize::Envelope;
use crate::params::{ParamStore, Params};
use crate::transport::Transport;

/// Mutation kinds, one loading flag each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
  Create,
  Replace,
  Patch,
  Delete,
}

/// In-flight status per mutation kind.
///
/// A flag means "some call of this kind is running". Concurrent calls of the
/// same kind share it: the first one to settle clears it for all of them.
/// Call sites that need per-call tracking keep their own flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationLoading {
  pub create: bool,
  pub replace: bool,
  pub patch: bool,
  pub delete: bool,
}

impl MutationLoading {
  pub fn any(&self) -> bool {
    self.create || self.replace || self.patch || self.delete
  }
}

/// Four independent cells behind [`MutationLoading`].
#[derive(Debug, Default)]
pub(crate) struct MutationFlags {
  create: AtomicBool,
  replace: AtomicBool,
  patch: AtomicBool,
  delete: AtomicBool,
}

impl MutationFlags {
  fn cell(&self, verb: Verb) -> &AtomicBool {
    match verb {
      Verb::Create => &self.create,
      Verb::Replace => &self.replace,
      Verb::Patch => &self.patch,
      Verb::Delete => &self.delete,
    }
  }

  pub(crate) fn set(&self, verb: Verb, loading: bool) {
    self.cell(verb).store(loading, Ordering::SeqCst);
  }

  pub(crate) fn load(&self) -> MutationLoading {
    MutationLoading {
      create: self.create.load(Ordering::SeqCst),
      replace: self.replace.load(Ordering::SeqCst),
      patch: self.patch.load(Ordering::SeqCst),
      delete: self.delete.load(Ordering::SeqCst),
    }
  }
}

/// What consumers see of an engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
  pub data: Option<Envelope>,
  pub params: Params,
  pub loading: bool,
  pub error: Option<String>,
  pub retry_attempt: u32,
  pub mutations: MutationLoading,
}

impl Snapshot {
  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  pub fn data(&self) -> Option<&Envelope> {
    self.data.as_ref()
  }

  /// Held list items, empty when nothing is loaded or the data is a single record.
  pub fn items(&self) -> &[serde_json::Value] {
    self.data.as_ref().and_then(Envelope::items).unwrap_or(&[])
  }
}

/// Mutable engine state. Only touched under [`Shared::lock`].
pub(crate) struct Core {
  pub(crate) params: ParamStore,
  pub(crate) data: Option<Envelope>,
  pub(crate) loading: bool,
  pub(crate) error: Option<String>,
  pub(crate) attempt: u32,
  /// Id of the newest GET; results from older ids are discarded
  pub(crate) generation: u64,
  pub(crate) pending: Option<RequestDescriptor>,
  pub(crate) debounce: Option<CancellationToken>,
  pub(crate) enabled: bool,
  /// Item count of the last applied page
  pub(crate) last_page_len: usize,
  /// Page number of the last applied list
  pub(crate) last_page: Option<i64>,
  /// Held server items that precede the last applied page
  pub(crate) page_start: usize,
}

/// Everything one bound engine shares between its handle and its tasks.
pub(crate) struct Shared {
  pub(crate) endpoint: String,
  pub(crate) config: EngineConfig,
  pub(crate) transport: Arc<dyn Transport>,
  pub(crate) flags: MutationFlags,
  /// Last synthetic id handed to an optimistic placeholder
  pub(crate) placeholder_id: AtomicI64,
  /// Parent of every token the engine hands out; canceled on teardown
  pub(crate) shutdown: CancellationToken,
  core: Mutex<Core>,
  tx: watch::Sender<Snapshot>,
}

impl Shared {
  pub(crate) fn new(endpoint: String, config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
    let core = Core {
      params: ParamStore::new(&config.initial_params, config.pagination),
      data: None,
      loading: false,
      error: None,
      attempt: 0,
      generation: 0,
      pending: None,
      debounce: None,
      enabled: config.enabled,
      last_page_len: 0,
      last_page: None,
      page_start: 0,
    };
    let (tx, _) = watch::channel(Snapshot {
      params: core.params.current().clone(),
      ..Snapshot::default()
    });

    Self {
      endpoint,
      config,
      transport,
      flags: MutationFlags::default(),
      placeholder_id: AtomicI64::new(0),
      shutdown: CancellationToken::new(),
      core: Mutex::new(core),
      tx,
    }
  }

  /// A panic while holding the lock leaves the state usable; keep going with it.
  pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
    self.core.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn publish(&self, core: &Core) {
    self.tx.send_replace(Snapshot {
      data: core.data.clone(),
      params: core.params.current().clone(),
      loading: core.loading,
      error: core.error.clone(),
      retry_attempt: core.attempt,
      mutations: self.flags.load(),
    });
  }

  /// Run `f` under the lock, then publish.
  pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
    let mut core = self.lock();
    let result = f(&mut core);
    self.publish(&core);
    result
  }

  pub(crate) fn snapshot(&self) -> Snapshot {
    self.tx.borrow().clone()
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<Snapshot> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::mock::MockTransport;

  #[test]
  fn test_flags_are_independent() {
    let flags = MutationFlags::default();
    flags.set(Verb::Create, true);
    flags.set(Verb::Delete, true);
    flags.set(Verb::Create, false);

    assert_eq!(
      flags.load(),
      MutationLoading {
        create: false,
        replace: false,
        patch: false,
        delete: true,
      }
    );
    assert!(flags.load().any());
  }

  #[test]
  fn test_update_publishes() {
    let shared = Shared::new("/assets".into(), EngineConfig::default(), MockTransport::new());
    let rx = shared.subscribe();
    assert_eq!(rx.borrow().params.search(), "");

    shared.update(|core| core.error = Some("boom".into()));

    let snapshot = shared.snapshot();
    assert!(snapshot.is_error());
    assert_eq!(snapshot.error(), Some("boom"));
    assert!(snapshot.items().is_empty());
  }
}
