//! Create, replace, patch and delete calls.
//!
//! Mutations are not retried, not cancelable and not queued against each
//! other. Optimistic changes are never reconciled in place: once a mutation
//! settles, the placeholder is dropped and the list is fetched again from the
//! server.

use chrono::Utc;
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::coordinator::FetchMode;
use crate::error::{classify, SyncError};
use crate::normalize::Envelope;
use crate::state::{Shared, Verb};
use crate::transport::{Response, TransportError};
use crate::url_builder::resource_path;

/// Marks records that exist only locally.
pub const OPTIMISTIC_MARKER: &str = "_optimistic";

type SuccessCallback = Box<dyn FnOnce(&Value) + Send>;
type ErrorCallback = Box<dyn FnOnce(&SyncError) + Send>;

/// Per-call mutation settings.
#[derive(Default)]
pub struct MutationOptions {
  endpoint: Option<String>,
  optimistic: Option<bool>,
  on_success: Option<SuccessCallback>,
  on_error: Option<ErrorCallback>,
}

impl MutationOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Send to this endpoint instead of the bound one.
  pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = Some(endpoint.into());
    self
  }

  /// Override the engine-wide optimistic-updates setting.
  pub fn optimistic(mut self, optimistic: bool) -> Self {
    self.optimistic = Some(optimistic);
    self
  }

  pub fn on_success(mut self, callback: impl FnOnce(&Value) + Send + 'static) -> Self {
    self.on_success = Some(Box::new(callback));
    self
  }

  pub fn on_error(mut self, callback: impl FnOnce(&SyncError) + Send + 'static) -> Self {
    self.on_error = Some(Box::new(callback));
    self
  }

  fn target<'a>(&'a self, bound: &'a str) -> &'a str {
    self.endpoint.as_deref().unwrap_or(bound)
  }
}

impl fmt::Debug for MutationOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MutationOptions")
      .field("endpoint", &self.endpoint)
      .field("optimistic", &self.optimistic)
      .finish_non_exhaustive()
  }
}

/// When to resync after a mutation settles.
#[derive(Debug, Clone, Copy)]
struct Resync {
  on_success: bool,
  on_failure: bool,
}

impl Shared {
  pub(crate) async fn create(
    self: &Arc<Self>,
    payload: Value,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    let optimistic = options.optimistic.unwrap_or(self.config.optimistic_updates);
    let target = options.target(&self.endpoint).to_string();

    let placeholder = if optimistic {
      self.insert_placeholder(&payload)
    } else {
      None
    };

    let result = self
      .run(Verb::Create, self.transport.post(&target, &payload))
      .await;

    if let Some(id) = placeholder {
      self.remove_placeholder(id);
    }

    let resync = Resync {
      on_success: true,
      on_failure: placeholder.is_some(),
    };
    self.settle(Verb::Create, result, options, resync).await
  }

  pub(crate) async fn replace(
    self: &Arc<Self>,
    id: Option<&str>,
    payload: Value,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    self.write(Verb::Replace, id, payload, options).await
  }

  pub(crate) async fn patch(
    self: &Arc<Self>,
    id: Option<&str>,
    payload: Value,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    self.write(Verb::Patch, id, payload, options).await
  }

  /// PUT and PATCH never touch the held list before the server answers.
  async fn write(
    self: &Arc<Self>,
    verb: Verb,
    id: Option<&str>,
    payload: Value,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    let optimistic = options.optimistic.unwrap_or(self.config.optimistic_updates);
    let resync = Resync {
      on_success: optimistic,
      on_failure: false,
    };

    let target = match self.mutation_url(&options, id) {
      Ok(target) => target,
      Err(err) => return self.settle(verb, Err(err), options, resync).await,
    };

    let result = match verb {
      Verb::Patch => self.run(verb, self.transport.patch(&target, &payload)).await,
      _ => self.run(verb, self.transport.put(&target, &payload)).await,
    };
    self.settle(verb, result, options, resync).await
  }

  pub(crate) async fn delete(
    self: &Arc<Self>,
    id: &str,
    options: MutationOptions,
  ) -> Result<Value, SyncError> {
    let optimistic = options.optimistic.unwrap_or(self.config.optimistic_updates);

    let target = match self.mutation_url(&options, Some(id)) {
      Ok(target) => target,
      Err(err) => {
        let resync = Resync {
          on_success: false,
          on_failure: false,
        };
        return self.settle(Verb::Delete, Err(err), options, resync).await;
      }
    };

    let removed = optimistic && self.remove_optimistically(id);
    let result = self.run(Verb::Delete, self.transport.delete(&target)).await;

    let resync = Resync {
      on_success: true,
      on_failure: removed,
    };
    self.settle(Verb::Delete, result, options, resync).await
  }

  fn mutation_url(&self, options: &MutationOptions, id: Option<&str>) -> Result<String, SyncError> {
    let target = options.target(&self.endpoint);
    match id {
      Some(id) => resource_path(target, id).ok_or_else(|| SyncError::InvalidUrl {
        endpoint: target.to_string(),
      }),
      None => Ok(target.to_string()),
    }
  }

  /// Hold the verb's loading flag around the network call.
  async fn run(
    &self,
    verb: Verb,
    call: impl Future<Output = Result<Response, TransportError>>,
  ) -> Result<Value, SyncError> {
    self.flags.set(verb, true);
    self.publish(&self.lock());

    let result = call.await.map(|response| response.body).map_err(classify);

    self.flags.set(verb, false);
    self.publish(&self.lock());
    result
  }

  async fn settle(
    self: &Arc<Self>,
    verb: Verb,
    result: Result<Value, SyncError>,
    options: MutationOptions,
    resync: Resync,
  ) -> Result<Value, SyncError> {
    let refetch = match &result {
      Ok(_) => resync.on_success,
      Err(_) => resync.on_failure,
    };
    let enabled = self.lock().enabled;
    if refetch && enabled {
      if let Err(err) = self.fetch(FetchMode::Force).await {
        debug!(%err, "resync after mutation failed");
      }
    }

    let MutationOptions {
      on_success,
      on_error,
      ..
    } = options;
    match &result {
      Ok(body) => {
        info!(?verb, endpoint = %self.endpoint, "mutation succeeded");
        if let Some(callback) = on_success {
          callback(body);
        }
      }
      Err(err) => {
        warn!(?verb, endpoint = %self.endpoint, %err, "mutation failed");
        if let Some(callback) = on_error {
          callback(err);
        }
      }
    }
    result
  }

  /// Prepend a local copy of `payload` to the held list. Returns its synthetic id.
  fn insert_placeholder(&self, payload: &Value) -> Option<i64> {
    let Value::Object(fields) = payload else {
      return None;
    };

    let mut core = self.lock();
    let Some(Envelope::List { items, .. }) = core.data.as_mut() else {
      return None;
    };

    // Millisecond clock, bumped past the last id handed out
    let now = Utc::now().timestamp_millis();
    let id = match self
      .placeholder_id
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
    {
      Ok(last) | Err(last) => now.max(last + 1),
    };
    let mut record = fields.clone();
    record.insert("id".to_string(), json!(id));
    record.insert(OPTIMISTIC_MARKER.to_string(), Value::Bool(true));
    items.insert(0, Value::Object(record));

    self.publish(&core);
    Some(id)
  }

  fn remove_placeholder(&self, id: i64) {
    self.update(|core| {
      if let Some(Envelope::List { items, .. }) = core.data.as_mut() {
        items.retain(|item| !(is_optimistic(item) && item.get("id") == Some(&json!(id))));
      }
    });
  }

  fn remove_optimistically(&self, id: &str) -> bool {
    let mut core = self.lock();
    let page_start = core.page_start;
    let Some(Envelope::List { items, .. }) = core.data.as_mut() else {
      return false;
    };

    let before = items.len();
    let mut position = 0;
    let mut removed_before_page = 0;
    items.retain(|item| {
      let keep = !id_matches(item, id);
      if !is_optimistic(item) {
        if !keep && position < page_start {
          removed_before_page += 1;
        }
        position += 1;
      }
      keep
    });
    let removed = items.len() != before;

    // Keep the last page's slice aligned for a later refetch of that page
    core.page_start -= removed_before_page;
    if removed {
      self.publish(&core);
    }
    removed
  }
}

pub fn is_optimistic(item: &Value) -> bool {
  item.get(OPTIMISTIC_MARKER) == Some(&Value::Bool(true))
}

/// Compare a record's `id` with an id taken from a URL.
fn id_matches(item: &Value, id: &str) -> bool {
  match item.get("id") {
    Some(Value::String(s)) => s == id,
    Some(Value::Number(n)) => n.to_string() == id,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::EngineConfig;
  use crate::engine::Engine;
  use crate::transport::mock::{status, MockTransport};
  use crate::transport::Method;
  use std::sync::Mutex;
  use std::time::Duration;
  use tokio::time::sleep;

  async fn bound(config: EngineConfig, transport: &Arc<MockTransport>) -> Engine {
    let engine = Engine::bind("/departments", config, transport.clone());
    sleep(Duration::from_millis(1)).await;
    engine
  }

  fn optimistic() -> EngineConfig {
    EngineConfig::default().with_optimistic_updates(true)
  }

  #[tokio::test(start_paused = true)]
  async fn test_optimistic_create_shows_placeholder_then_resyncs() {
    let transport = MockTransport::new();
    transport.reply(Method::Get, json!([{"id": 1, "name": "Finance"}]));
    let engine = bound(optimistic(), &transport).await;

    transport.reply_after(Method::Post, Duration::from_millis(100), json!({"id": 2, "name": "Ops"}));
    transport.reply(Method::Get, json!([{"id": 1, "name": "Finance"}, {"id": 2, "name": "Ops"}]));

    let call = tokio::spawn({
      let engine = engine.clone();
      async move { engine.post(json!({"name": "Ops"}), MutationOptions::new()).await }
    });
    sleep(Duration::from_millis(10)).await;

    let during = engine.snapshot();
    assert_eq!(during.items().len(), 2);
    assert!(is_optimistic(&during.items()[0]));
    assert!(during.items()[0]["id"].is_i64());
    assert_eq!(during.items()[0]["name"], "Ops");
    assert!(during.mutations.create);

    let created = call.await.unwrap().unwrap();
    assert_eq!(created["id"], 2);

    let after = engine.snapshot();
    assert_eq!(after.items().len(), 2);
    assert!(!after.items().iter().any(is_optimistic));
    assert!(!after.mutations.create);
    assert_eq!(transport.calls_to(Method::Get).len(), 2);
    assert_eq!(transport.calls_to(Method::Post)[0].body, Some(json!({"name": "Ops"})));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_optimistic_create_rolls_back() {
    let transport = MockTransport::new();
    transport.reply(Method::Get, json!([{"id": 1}]));
    let engine = bound(optimistic(), &transport).await;

    transport.fail_after(Method::Post, Duration::from_millis(50), status(500, "database down"));
    transport.reply(Method::Get, json!([{"id": 1}]));

    let seen = Arc::new(Mutex::new(None));
    let options = MutationOptions::new().on_error({
      let seen = seen.clone();
      move |err| *seen.lock().unwrap() = Some(err.to_string())
    });
    let result = engine.post(json!({"name": "Ops"}), options).await;

    assert!(matches!(result, Err(SyncError::Transient { .. })));
    assert_eq!(seen.lock().unwrap().as_deref(), Some("database down"));
    assert_eq!(engine.snapshot().items(), &[json!({"id": 1})]);
    // mutations are never retried and never set the fetch error
    assert_eq!(transport.calls_to(Method::Post).len(), 1);
    assert!(!engine.snapshot().is_error());
    assert_eq!(transport.calls_to(Method::Get).len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_without_optimism_refetches_on_success() {
    let transport = MockTransport::new();
    let engine = bound(EngineConfig::default(), &transport).await;

    transport.reply_after(Method::Post, Duration::from_millis(50), json!({"id": 5}));
    transport.reply(Method::Get, json!([{"id": 5}]));

    let call = tokio::spawn({
      let engine = engine.clone();
      async move { engine.post(json!({"name": "Legal"}), MutationOptions::new()).await }
    });
    sleep(Duration::from_millis(10)).await;
    assert!(engine.snapshot().items().is_empty());

    let fired = Arc::new(Mutex::new(false));
    call.await.unwrap().unwrap();
    engine
      .post(
        json!({"name": "HR"}),
        MutationOptions::new().on_success({
          let fired = fired.clone();
          move |_| *fired.lock().unwrap() = true
        }),
      )
      .await
      .unwrap();

    assert!(*fired.lock().unwrap());
    assert_eq!(transport.calls_to(Method::Get).len(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_optimistic_delete_removes_then_restores_on_failure() {
    let transport = MockTransport::new();
    transport.reply(Method::Get, json!([{"id": 1}, {"id": "2"}]));
    let engine = bound(optimistic(), &transport).await;

    transport.fail_after(Method::Delete, Duration::from_millis(50), status(422, "Asset in custody"));
    transport.reply(Method::Get, json!([{"id": 1}, {"id": "2"}]));

    let call = tokio::spawn({
      let engine = engine.clone();
      async move { engine.delete("1", MutationOptions::new()).await }
    });
    sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.snapshot().items(), &[json!({"id": "2"})]);
    assert!(engine.mutation_loading().delete);

    let result = call.await.unwrap();
    assert_eq!(
      result,
      Err(SyncError::Client {
        status: 422,
        message: "Asset in custody".into()
      })
    );
    assert_eq!(engine.snapshot().items().len(), 2);
    assert_eq!(transport.urls(Method::Delete), vec!["/departments/1".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_replace_and_patch_targets() {
    let transport = MockTransport::new();
    let engine = bound(EngineConfig::default(), &transport).await;

    engine
      .put(Some("7"), json!({"name": "Main"}), MutationOptions::new())
      .await
      .unwrap();
    engine
      .patch(
        None,
        json!({"status": "closed"}),
        MutationOptions::new().endpoint("/warehouses/3"),
      )
      .await
      .unwrap();

    assert_eq!(transport.urls(Method::Put), vec!["/departments/7".to_string()]);
    assert_eq!(transport.urls(Method::Patch), vec!["/warehouses/3".to_string()]);
    // no optimism requested: no resync
    assert_eq!(transport.calls_to(Method::Get).len(), 1);

    engine
      .patch(Some("7"), json!({"name": "Main"}), MutationOptions::new().optimistic(true))
      .await
      .unwrap();
    assert_eq!(transport.calls_to(Method::Get).len(), 2);
  }

  #[tokio::test]
  async fn test_missing_id_is_rejected() {
    let transport = MockTransport::new();
    let engine = Engine::bind("/custody", EngineConfig::default().with_enabled(false), transport.clone());

    let result = engine.delete("undefined", MutationOptions::new()).await;
    assert!(matches!(result, Err(SyncError::InvalidUrl { .. })));
    assert!(transport.calls().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_optimistic_creates_keep_own_placeholders() {
    let transport = MockTransport::new();
    transport.reply(Method::Get, json!([{"id": 1}]));
    let engine = bound(optimistic(), &transport).await;

    transport.reply_after(Method::Post, Duration::from_millis(100), json!({"id": 2}));
    transport.reply_after(Method::Post, Duration::from_millis(300), json!({"id": 3}));
    transport.reply(Method::Get, json!([{"id": 1}, {"id": 2}]));
    transport.reply(Method::Get, json!([{"id": 1}, {"id": 2}, {"id": 3}]));

    let first = tokio::spawn({
      let engine = engine.clone();
      async move { engine.post(json!({"name": "Ops"}), MutationOptions::new()).await }
    });
    let second = tokio::spawn({
      let engine = engine.clone();
      async move { engine.post(json!({"name": "Legal"}), MutationOptions::new()).await }
    });
    sleep(Duration::from_millis(10)).await;

    let placeholders: Vec<Value> = engine
      .snapshot()
      .items()
      .iter()
      .filter(|item| is_optimistic(item))
      .cloned()
      .collect();
    assert_eq!(placeholders.len(), 2);
    assert_ne!(placeholders[0]["id"], placeholders[1]["id"]);

    // the first create settled and resynced; the second is still pending
    sleep(Duration::from_millis(150)).await;
    let items = engine.snapshot().items().to_vec();
    let pending: Vec<&Value> = items.iter().filter(|item| is_optimistic(item)).collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(items.len(), 3);

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    let items = engine.snapshot().items().to_vec();
    assert_eq!(items, vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_optimistic_delete_on_scrolled_list_keeps_earlier_pages() {
    let transport = MockTransport::new();
    transport.reply(Method::Get, json!([{"id": "a"}, {"id": "b"}]));
    transport.reply(Method::Get, json!([{"id": "c"}]));
    let config = optimistic().with_pagination(true).with_infinite_scroll(true);
    let engine = bound(config, &transport).await;
    engine.update_page(2).unwrap();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(engine.snapshot().items().len(), 3);

    // the resync refetches page 2 only
    transport.reply(Method::Get, json!([{"id": "c"}]));
    engine.delete("a", MutationOptions::new()).await.unwrap();

    assert_eq!(
      transport.urls(Method::Get).last().map(String::as_str),
      Some("/departments?page=2")
    );
    assert_eq!(engine.snapshot().items(), &[json!({"id": "b"}), json!({"id": "c"})]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_same_verb_share_flag() {
    let transport = MockTransport::new();
    let engine = bound(EngineConfig::default().with_enabled(false), &transport).await;

    transport.reply_after(Method::Post, Duration::from_millis(100), json!({"id": 1}));
    transport.reply_after(Method::Post, Duration::from_millis(200), json!({"id": 2}));

    let first = engine.post(json!({"name": "A"}), MutationOptions::new());
    let second = engine.post(json!({"name": "B"}), MutationOptions::new());
    let observe = async {
      sleep(Duration::from_millis(50)).await;
      let both_running = engine.mutation_loading().create;
      sleep(Duration::from_millis(100)).await;
      // the second call is still in flight, but the first cleared the shared flag
      let after_first = engine.mutation_loading().create;
      (both_running, after_first)
    };

    let (first, second, (both_running, after_first)) = tokio::join!(first, second, observe);
    assert!(first.is_ok() && second.is_ok());
    assert!(both_running);
    assert!(!after_first);
    assert!(!engine.mutation_loading().any());
  }

  #[test]
  fn test_id_matching() {
    assert!(id_matches(&json!({"id": 12}), "12"));
    assert!(id_matches(&json!({"id": "a-1"}), "a-1"));
    assert!(!id_matches(&json!({"id": 12}), "1"));
    assert!(!id_matches(&json!({"name": "x"}), "x"));
  }
}
