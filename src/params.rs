//! Query parameters bound to an endpoint.
//!
//! Parameters are an ordered map of scalar values. Two keys are reserved:
//! `page` (only present when pagination is enabled) and `search` (defaults
//! to an empty string). The store is only ever changed through a shallow
//! merge, never by removing individual keys.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;

pub const PAGE: &str = "page";
pub const SEARCH: &str = "search";

/// A scalar query parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
}

impl ParamValue {
  /// Empty values are never sent as query parameters.
  pub fn is_empty(&self) -> bool {
    match self {
      ParamValue::Null => true,
      ParamValue::Text(s) => s.is_empty(),
      _ => false,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      ParamValue::Int(n) => Some(*n),
      ParamValue::Text(s) => s.parse().ok(),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      ParamValue::Text(s) => Some(s),
      _ => None,
    }
  }

  /// Parse a value typed on a command line: integers, then booleans, then text.
  pub fn parse(raw: &str) -> Self {
    if raw.is_empty() {
      return ParamValue::Text(String::new());
    }
    if let Ok(n) = raw.parse::<i64>() {
      return ParamValue::Int(n);
    }
    match raw {
      "true" => ParamValue::Bool(true),
      "false" => ParamValue::Bool(false),
      "null" => ParamValue::Null,
      _ => ParamValue::Text(raw.to_string()),
    }
  }
}

impl fmt::Display for ParamValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamValue::Null => Ok(()),
      ParamValue::Bool(b) => write!(f, "{}", b),
      ParamValue::Int(n) => write!(f, "{}", n),
      ParamValue::Float(x) => write!(f, "{}", x),
      ParamValue::Text(s) => f.write_str(s),
    }
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    ParamValue::Text(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    ParamValue::Text(value)
  }
}

impl From<i64> for ParamValue {
  fn from(value: i64) -> Self {
    ParamValue::Int(value)
  }
}

impl From<i32> for ParamValue {
  fn from(value: i32) -> Self {
    ParamValue::Int(value.into())
  }
}

impl From<u32> for ParamValue {
  fn from(value: u32) -> Self {
    ParamValue::Int(value.into())
  }
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    ParamValue::Bool(value)
  }
}

impl From<f64> for ParamValue {
  fn from(value: f64) -> Self {
    ParamValue::Float(value)
  }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
  fn from(value: Option<T>) -> Self {
    value.map(Into::into).unwrap_or(ParamValue::Null)
  }
}

/// Ordered parameter map. Iteration order is insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(IndexMap<String, ParamValue>);

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&ParamValue> {
    self.0.get(key)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Shallow merge; values from `partial` win. Existing keys keep their position.
  pub fn merge(&mut self, partial: &Params) {
    for (key, value) in partial.iter() {
      self.0.insert(key.to_string(), value.clone());
    }
  }

  pub fn page(&self) -> Option<i64> {
    self.get(PAGE).and_then(ParamValue::as_i64)
  }

  pub fn search(&self) -> &str {
    self.get(SEARCH).and_then(ParamValue::as_str).unwrap_or("")
  }

  fn without(&self, key: &str) -> Params {
    self
      .iter()
      .filter(|(k, _)| *k != key)
      .map(|(k, v)| (k.to_string(), v.clone()))
      .collect()
  }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Params(
      iter
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect(),
    )
  }
}

/// What a merge did to the parameter set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamChange {
  pub changed: bool,
  pub search_changed: bool,
}

/// Current and initial parameters for one bound engine.
#[derive(Debug, Clone)]
pub struct ParamStore {
  initial: Params,
  current: Params,
  pagination: bool,
}

impl ParamStore {
  pub fn new(initial: &Params, pagination: bool) -> Self {
    let initial = Self::seed(initial, pagination);
    Self {
      current: initial.clone(),
      initial,
      pagination,
    }
  }

  /// Reserved keys come first, caller-supplied values override them in place.
  fn seed(initial: &Params, pagination: bool) -> Params {
    let mut seeded = Params::new();
    if pagination {
      seeded.insert(PAGE, 1);
    }
    seeded.insert(SEARCH, "");
    if pagination {
      seeded.merge(initial);
    } else {
      seeded.merge(&initial.without(PAGE));
    }
    seeded
  }

  pub fn current(&self) -> &Params {
    &self.current
  }

  pub fn initial(&self) -> &Params {
    &self.initial
  }

  pub fn pagination(&self) -> bool {
    self.pagination
  }

  pub fn page(&self) -> Option<i64> {
    if self.pagination {
      self.current.page()
    } else {
      None
    }
  }

  /// Merge `partial` into the current set. `page` is ignored unless pagination is on.
  pub fn update(&mut self, partial: &Params) -> ParamChange {
    let partial = if self.pagination {
      partial.clone()
    } else {
      partial.without(PAGE)
    };

    let before = self.current.clone();
    self.current.merge(&partial);

    ParamChange {
      changed: before != self.current,
      search_changed: before.search() != self.current.search(),
    }
  }

  /// Pages are 1-based.
  pub fn set_page(&mut self, page: i64) -> Result<ParamChange, SyncError> {
    if !self.pagination {
      return Err(SyncError::PaginationDisabled);
    }
    if page < 1 {
      return Err(SyncError::InvalidPage(page));
    }
    Ok(self.update(&Params::new().with(PAGE, page)))
  }

  pub fn reset(&mut self) {
    self.current = self.initial.clone();
  }
}
