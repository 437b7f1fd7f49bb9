//! The HTTP transport contract the engine talks through.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use std::fmt;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A successful (2xx) response with its decoded JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: u16,
  pub body: Value,
}

/// Failure reported by a transport.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
  #[error("request aborted")]
  Aborted,

  /// The request never produced a response.
  #[error("{0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("request failed with status {status}")]
  Status { status: u16, body: Value },

  #[error("{0}")]
  Other(String),
}

pub type TransportResult<'a> = BoxFuture<'a, Result<Response, TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    })
  }
}

/// HTTP verbs as used by the engine.
///
/// Only GET takes a cancellation token; mutations always run to completion.
/// URLs are relative paths with an optional query string.
pub trait Transport: Send + Sync {
  fn get<'a>(&'a self, url: &'a str, cancel: CancellationToken) -> TransportResult<'a>;

  fn post<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a>;

  fn put<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a>;

  fn patch<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a>;

  fn delete<'a>(&'a self, url: &'a str) -> TransportResult<'a>;
}
