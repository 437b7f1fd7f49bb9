//! Response envelope normalization.
//!
//! The backend answers with one of three shapes: a bare array, a page object
//! `{ data: { items, meta } }`, or a single record (optionally wrapped in
//! `data`). [`normalize`] folds all of them into an [`Envelope`] by looking at
//! the structure of the body only.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Pagination metadata attached to a list page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
  #[serde(default)]
  pub total: Option<u64>,
  #[serde(default)]
  pub page: Option<u64>,
  #[serde(default)]
  pub limit: Option<u64>,
  #[serde(default, alias = "total_pages")]
  pub total_pages: Option<u64>,
}

impl PageMeta {
  fn from_value(value: &Value) -> Option<Self> {
    serde_json::from_value(value.clone()).ok()
  }
}

/// A normalized response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
  List {
    items: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<PageMeta>,
  },
  Single {
    value: Value,
  },
}

impl Envelope {
  pub fn list(items: Vec<Value>) -> Self {
    Envelope::List { items, meta: None }
  }

  pub fn is_list(&self) -> bool {
    matches!(self, Envelope::List { .. })
  }

  pub fn items(&self) -> Option<&[Value]> {
    match self {
      Envelope::List { items, .. } => Some(items),
      Envelope::Single { .. } => None,
    }
  }

  pub fn meta(&self) -> Option<&PageMeta> {
    match self {
      Envelope::List { meta, .. } => meta.as_ref(),
      Envelope::Single { .. } => None,
    }
  }

  pub fn value(&self) -> Option<&Value> {
    match self {
      Envelope::Single { value } => Some(value),
      Envelope::List { .. } => None,
    }
  }

  /// Number of held records; a single record counts as one.
  pub fn len(&self) -> usize {
    match self {
      Envelope::List { items, .. } => items.len(),
      Envelope::Single { .. } => 1,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Decode list items into a caller type.
  pub fn items_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, SyncError> {
    let items = self
      .items()
      .ok_or_else(|| SyncError::Decode("expected a list response".to_string()))?;
    items
      .iter()
      .map(|item| serde_json::from_value(item.clone()).map_err(|e| SyncError::Decode(e.to_string())))
      .collect()
  }

  /// Decode a single record into a caller type.
  pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
    let value = self
      .value()
      .ok_or_else(|| SyncError::Decode("expected a single-record response".to_string()))?;
    serde_json::from_value(value.clone()).map_err(|e| SyncError::Decode(e.to_string()))
  }
}

/// Fold a decoded body into an [`Envelope`].
///
/// Precedence: `data.items`, then `data` as an array, then `data` as an
/// object, then the body as an array, and finally the body itself.
pub fn normalize(body: Value) -> Envelope {
  let mut body = body;

  if let Some(data) = body.get_mut("data") {
    if let Some(Value::Array(items)) = data.get_mut("items") {
      let items = std::mem::take(items);
      let meta = data.get("meta").and_then(PageMeta::from_value);
      return Envelope::List { items, meta };
    }
    match data.take() {
      Value::Array(items) => return Envelope::list(items),
      Value::Object(fields) => {
        return Envelope::Single {
          value: Value::Object(fields),
        }
      }
      other => *data = other,
    }
  }

  match body {
    Value::Array(items) => Envelope::list(items),
    value => Envelope::Single { value },
  }
}
