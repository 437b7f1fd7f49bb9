//! Request URL composition.

use url::form_urlencoded;

use crate::params::Params;

/// Path segment produced when a caller formats a missing id into an endpoint.
pub const UNDEFINED_SEGMENT: &str = "undefined";

/// Build the GET URL for an endpoint.
///
/// With a resource id the result is `endpoint/id` and list parameters are not
/// applied. Otherwise every non-empty parameter is appended in insertion order
/// and `limit` comes last. Returns `None` when the path is malformed.
pub fn build_url(
  endpoint: &str,
  params: &Params,
  limit: Option<u32>,
  resource_id: Option<&str>,
) -> Option<String> {
  if let Some(id) = resource_id {
    return resource_path(endpoint, id);
  }

  if !is_well_formed(endpoint) {
    return None;
  }

  let mut query = form_urlencoded::Serializer::new(String::new());
  for (key, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
    query.append_pair(key, &value.to_string());
  }
  if let Some(limit) = limit {
    query.append_pair("limit", &limit.to_string());
  }
  let query = query.finish();

  if query.is_empty() {
    Some(endpoint.to_string())
  } else if endpoint.contains('?') {
    Some(format!("{}&{}", endpoint, query))
  } else {
    Some(format!("{}?{}", endpoint, query))
  }
}

/// Path of a single resource below `endpoint`.
pub fn resource_path(endpoint: &str, id: &str) -> Option<String> {
  if id.is_empty() {
    return None;
  }
  let path = format!("{}/{}", endpoint.trim_end_matches('/'), id);
  is_well_formed(&path).then_some(path)
}

fn is_well_formed(endpoint: &str) -> bool {
  let path = endpoint.split('?').next().unwrap_or_default();
  !path.split('/').any(|segment| segment == UNDEFINED_SEGMENT)
}
