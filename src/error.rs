//! Error taxonomy for fetches and mutations.

use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the engine.
///
/// Only [`SyncError::Transient`] is retried, and only for GET requests.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
  /// The request was canceled or superseded. Never surfaced as an error state.
  #[error("request aborted")]
  Aborted,

  /// 400, 404 or 422: the request itself is wrong and retrying will not help.
  #[error("{message}")]
  Client { status: u16, message: String },

  /// No response at all, or a 5xx.
  #[error("{message}")]
  Transient { status: Option<u16>, message: String },

  /// Anything else. Treated as terminal.
  #[error("{message}")]
  Unclassified { status: Option<u16>, message: String },

  #[error("cannot build a request URL for endpoint '{endpoint}'")]
  InvalidUrl { endpoint: String },

  #[error("pagination is not enabled for this endpoint")]
  PaginationDisabled,

  #[error("page must be 1 or greater, got {0}")]
  InvalidPage(i64),

  #[error("failed to decode response: {0}")]
  Decode(String),
}

impl SyncError {
  pub fn is_retryable(&self) -> bool {
    matches!(self, SyncError::Transient { .. })
  }

  pub fn is_abort(&self) -> bool {
    matches!(self, SyncError::Aborted)
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      SyncError::Client { status, .. } => Some(*status),
      SyncError::Transient { status, .. } | SyncError::Unclassified { status, .. } => *status,
      _ => None,
    }
  }
}

/// Map a transport failure onto the taxonomy.
pub fn classify(error: TransportError) -> SyncError {
  match error {
    TransportError::Aborted => SyncError::Aborted,
    TransportError::Network(message) => SyncError::Transient {
      status: None,
      message,
    },
    TransportError::Status { status, body } => {
      let message = server_message(&body)
        .unwrap_or_else(|| format!("Request failed with status code {}", status));
      match status {
        400 | 404 | 422 => SyncError::Client { status, message },
        s if s >= 500 => SyncError::Transient {
          status: Some(s),
          message,
        },
        s => SyncError::Unclassified {
          status: Some(s),
          message,
        },
      }
    }
    TransportError::Other(message) => SyncError::Unclassified {
      status: None,
      message,
    },
  }
}

/// Human-readable message carried in an error body, if any.
pub fn server_message(body: &Value) -> Option<String> {
  let candidates = [
    body.get("message"),
    body.get("error"),
    body.get("data").and_then(|d| d.get("message")),
  ];
  candidates
    .into_iter()
    .flatten()
    .find_map(|v| v.as_str().filter(|s| !s.is_empty()).map(String::from))
    .or_else(|| body.as_str().filter(|s| !s.is_empty()).map(String::from))
}
