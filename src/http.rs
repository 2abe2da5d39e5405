use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::ApiError;
use crate::redact::redact_secrets;
use crate::settings::ClientSettings;
use crate::types::ApiEnvelope;

const CLIENT_USER_AGENT: &str = concat!("bookstore-client/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
  #[error("request timed out")]
  Timeout,
  #[error("connection failed: {0}")]
  Connect(String),
  #[error("{0}")]
  Other(String),
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    let msg = redact_secrets(&err.to_string()).to_string();
    if err.is_timeout() {
      Self::Timeout
    } else if err.is_connect() {
      Self::Connect(msg)
    } else {
      Self::Other(msg)
    }
  }
}

/// One outbound call, described independently of any attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
}

impl ApiRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: vec![],
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  pub fn post(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::POST, path).with_body(body)
  }

  pub fn put(path: impl Into<String>, body: Value) -> Self {
    Self::new(Method::PUT, path).with_body(body)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::DELETE, path)
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.push((key.into(), value.into()));
    self
  }

  pub fn path_and_query(&self) -> String {
    if self.query.is_empty() {
      return self.path.clone();
    }
    let query = self
      .query
      .iter()
      .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
      .collect::<Vec<_>>()
      .join("&");
    format!("{}?{query}", self.path)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
  pub status: u16,
  pub body: String,
}

impl RawResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status == 401
  }

  fn envelope(&self) -> Option<ApiEnvelope> {
    serde_json::from_str(&self.body).ok()
  }

  fn server_message(&self) -> Option<String> {
    let message = self.envelope()?.message;
    let message = message.trim();
    (!message.is_empty()).then(|| redact_secrets(message).to_string())
  }

  /// The failure this response represents. Only meaningful for non-2xx statuses.
  pub fn error(&self) -> ApiError {
    let message = self
      .server_message()
      .unwrap_or_else(|| format!("Request failed ({})", self.status));
    match self.status {
      401 => ApiError::Unauthorized { message },
      status => ApiError::Http { status, message },
    }
  }

  /// Unwraps the `{success, message, data}` envelope into `T`.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
    if !self.is_success() {
      return Err(self.error());
    }
    let envelope = self
      .envelope()
      .ok_or_else(|| ApiError::Malformed("response is not a JSON envelope".to_string()))?;
    if !envelope.success {
      let message = envelope.message.trim();
      return Err(ApiError::Rejected {
        status: self.status,
        message: if message.is_empty() {
          "Request was rejected.".to_string()
        } else {
          redact_secrets(message).to_string()
        },
      });
    }
    serde_json::from_value(envelope.data)
      .map_err(|e| ApiError::Malformed(redact_secrets(&e.to_string()).to_string()))
  }
}

/// Wire port. Production uses [`ReqwestTransport`]; tests script responses.
#[async_trait]
pub trait HttpTransport: Send + Sync {
  async fn execute(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> Result<RawResponse, TransportError>;
}

pub(crate) fn build_headers(bearer: Option<&str>) -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
  headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
  if let Some(token) = bearer.map(str::trim).filter(|s| !s.is_empty()) {
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
      headers.insert(AUTHORIZATION, value);
    }
  }
  headers
}

pub struct ReqwestTransport {
  http: reqwest::Client,
  settings: ClientSettings,
}

impl ReqwestTransport {
  pub fn new(settings: &ClientSettings) -> Result<Self, reqwest::Error> {
    Ok(Self {
      http: reqwest::Client::builder()
        .timeout(settings.request_timeout())
        .connect_timeout(settings.connect_timeout())
        .build()?,
      settings: settings.clone(),
    })
  }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
  async fn execute(
    &self,
    request: &ApiRequest,
    bearer: Option<&str>,
  ) -> Result<RawResponse, TransportError> {
    let url = self.settings.api_url(&request.path_and_query());
    let mut builder = self
      .http
      .request(request.method.clone(), url)
      .headers(build_headers(bearer));
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let res = builder.send().await?;
    let status = res.status().as_u16();
    let body = res.text().await?;
    Ok(RawResponse { status, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn path_and_query_encodes_pairs() {
    let req = ApiRequest::get("/books")
      .with_query("q", "war & peace")
      .with_query("page", "2");
    assert_eq!(req.path_and_query(), "/books?q=war%20%26%20peace&page=2");
    assert_eq!(ApiRequest::get("/books").path_and_query(), "/books");
  }

  #[test]
  fn build_headers_attaches_bearer_when_present() {
    let headers = build_headers(Some("tok"));
    assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
    assert!(build_headers(None).get(AUTHORIZATION).is_none());
    assert!(build_headers(Some("  ")).get(AUTHORIZATION).is_none());
  }

  #[test]
  fn decode_unwraps_envelope_data() {
    let raw = RawResponse::new(
      200,
      json!({"success": true, "message": "", "data": {"id": 3}}).to_string(),
    );
    let value: Value = raw.decode().unwrap();
    assert_eq!(value, json!({"id": 3}));

    let empty = RawResponse::new(200, json!({"success": true, "message": "Deleted."}).to_string());
    assert!(empty.decode::<()>().is_ok());
    assert!(empty.decode::<Option<Value>>().unwrap().is_none());
  }

  #[test]
  fn decode_maps_failures() {
    let rejected = RawResponse::new(200, json!({"success": false, "message": "Out of stock."}).to_string());
    assert!(matches!(
      rejected.decode::<Value>(),
      Err(ApiError::Rejected { status: 200, ref message }) if message == "Out of stock."
    ));

    let unauthorized = RawResponse::new(401, "");
    assert!(matches!(
      unauthorized.decode::<Value>(),
      Err(ApiError::Unauthorized { ref message }) if message == "Request failed (401)"
    ));

    let validation = RawResponse::new(
      400,
      json!({"success": false, "message": "Quantity must be positive."}).to_string(),
    );
    assert!(matches!(
      validation.decode::<Value>(),
      Err(ApiError::Http { status: 400, ref message }) if message == "Quantity must be positive."
    ));

    let html = RawResponse::new(200, "<html>");
    assert!(matches!(html.decode::<Value>(), Err(ApiError::Malformed(_))));
  }

  #[test]
  fn server_messages_are_redacted() {
    let raw = RawResponse::new(
      500,
      json!({"message": "bad token eyJhbGciOiJub25lIn0.eyJzdWIiOiIxIn0.x"}).to_string(),
    );
    assert_eq!(raw.error().to_string(), "bad token REDACTED");
  }
}
