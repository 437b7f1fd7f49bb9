use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::Config;

use super::{Response, Transport, TransportError, TransportResult};

/// reqwest-backed transport rooted at the configured base URL
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    let mut base = config.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid base URL {}: {}", config.base_url, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &config.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid header name {}: {}", name, e))?;
      let value =
        HeaderValue::from_str(value).map_err(|e| eyre!("Invalid value for header {}: {}", name, e))?;
      headers.insert(name, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  /// Resolve an engine path (`/assets?page=2`) against the base URL
  fn resolve(&self, path: &str) -> Result<Url, TransportError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| TransportError::Other(format!("Invalid request path {}: {}", path, e)))
  }

  async fn send(
    &self,
    method: reqwest::Method,
    path: &str,
    body: Option<&Value>,
  ) -> Result<Response, TransportError> {
    let url = self.resolve(path)?;

    let mut request = self.client.request(method, url);
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    let status = response.status().as_u16();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| TransportError::Network(e.to_string()))?;

    // Non-JSON bodies (plain-text error pages) are kept as a string
    let body = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    if (200..300).contains(&status) {
      Ok(Response { status, body })
    } else {
      Err(TransportError::Status { status, body })
    }
  }
}

impl Transport for HttpTransport {
  fn get<'a>(&'a self, url: &'a str, cancel: CancellationToken) -> TransportResult<'a> {
    async move {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Aborted),
        result = self.send(reqwest::Method::GET, url, None) => result,
      }
    }
    .boxed()
  }

  fn post<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a> {
    self.send(reqwest::Method::POST, url, Some(body)).boxed()
  }

  fn put<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a> {
    self.send(reqwest::Method::PUT, url, Some(body)).boxed()
  }

  fn patch<'a>(&'a self, url: &'a str, body: &'a Value) -> TransportResult<'a> {
    self.send(reqwest::Method::PATCH, url, Some(body)).boxed()
  }

  fn delete<'a>(&'a self, url: &'a str) -> TransportResult<'a> {
    self.send(reqwest::Method::DELETE, url, None).boxed()
  }
}
