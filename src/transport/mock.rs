//! Scripted in-memory transport for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Method, Response, Transport, TransportError, TransportResult};

/// A request as seen by the transport.
#[derive(Debug, Clone)]
pub struct Call {
  pub method: Method,
  pub url: String,
  pub body: Option<Value>,
  pub at: Instant,
}

struct Reply {
  delay: Duration,
  result: Result<Value, TransportError>,
}

/// Replays queued replies per verb in call order.
///
/// An empty queue answers GET with `[]` and mutations with `{}`.
#[derive(Default)]
pub struct MockTransport {
  replies: Mutex<HashMap<Method, VecDeque<Reply>>>,
  calls: Mutex<Vec<Call>>,
  ignore_cancel: AtomicBool,
}

impl MockTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn reply(&self, method: Method, body: Value) {
    self.push(method, Duration::ZERO, Ok(body));
  }

  pub fn reply_after(&self, method: Method, delay: Duration, body: Value) {
    self.push(method, delay, Ok(body));
  }

  pub fn fail(&self, method: Method, error: TransportError) {
    self.push(method, Duration::ZERO, Err(error));
  }

  pub fn fail_after(&self, method: Method, delay: Duration, error: TransportError) {
    self.push(method, delay, Err(error));
  }

  /// Let GETs finish even after their token is canceled.
  pub fn ignore_cancellation(&self) {
    self.ignore_cancel.store(true, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, method: Method) -> Vec<Call> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.method == method)
      .collect()
  }

  pub fn urls(&self, method: Method) -> Vec<String> {
    self.calls_to(method).into_iter().map(|c| c.url).collect()
  }

  fn push(&self, method: Method, delay: Duration, result: Result<Value, TransportError>) {
    self
      .replies
      .lock()
      .unwrap()
      .entry(method)
      .or_default()
      .push_back(Reply { delay, result });
  }

  fn respond<'a>(
    &'a self,
    method: Method,
    url: &str,
    body: Option<&Value>,
    cancel: Option<CancellationToken>,
  ) -> TransportResult<'a> {
    self.calls.lock().unwrap().push(Call {
      method,
      url: url.to_string(),
      body: body.cloned(),
      at: Instant::now(),
    });

    let reply = self
      .replies
      .lock()
      .unwrap()
      .get_mut(&method)
      .and_then(VecDeque::pop_front)
      .unwrap_or_else(|| Reply {
        delay: Duration::ZERO,
        result: Ok(if method == Method::Get { json!([]) } else { json!({}) }),
      });

    let cancel = cancel.filter(|_| !self.ignore_cancel.load(Ordering::SeqCst));

    async move {
      match cancel {
        Some(token) => {
          tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TransportError::Aborted),
            _ = tokio::time::sleep(reply.delay) => {}
          }
        }
        None => tokio::time::sleep(reply.delay).await,
      }
      reply.result.map(|body| Response { status: 200, body })
    }
    .boxed()
  }
}

impl Transport for MockTransport {
  fn get<'a>(&'a self, url: &'a str, cancel: CancellationToken) -> TransportResult<'a> {
    self.respond(Method::Get, url, None, Some(cancel))
  }

  fn post<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a> {
    self.respond(Method::Post, url, Some(body), None)
  }

  fn put<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a> {
    self.respond(Method::Put, url, Some(body), None)
  }

  fn patch<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a> {
    self.respond(Method::Patch, url, Some(body), None)
  }

  fn delete<'a>(&'a self, url: &'a str) -> TransportResult<'a> {
    self.respond(Method::Delete, url, None, None)
  }
}

/// A non-2xx reply carrying `{ "message": ... }`.
pub fn status(code: u16, message: &str) -> TransportError {
  TransportError::Status {
    status: code,
    body: json!({ "message": message }),
  }
}
