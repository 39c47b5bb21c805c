//! Contracts of the authoritative read and write endpoints.

use serde::Deserialize;
use serde_json::Value;

/// A failed authoritative read.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("unknown dataset `{0}`")]
  UnknownDataset(String),
  #[error("upstream returned {status}: {message}")]
  Status { status: u16, message: String },
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("invalid endpoint url: {0}")]
  Url(#[from] url::ParseError),
}

/// A failed authoritative write.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
  /// The endpoint rejected the write. Displayed verbatim.
  #[error("{message}")]
  Validation { status: u16, message: String },
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("invalid endpoint url: {0}")]
  Url(#[from] url::ParseError),
}

/// Kind of write sent to an entity endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Create,
  Update,
  Delete,
  StatusChange,
}

impl MutationKind {
  pub fn method(&self) -> reqwest::Method {
    match self {
      MutationKind::Create | MutationKind::StatusChange => reqwest::Method::POST,
      MutationKind::Update => reqwest::Method::PUT,
      MutationKind::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A write against one entity endpoint, tagged with the dataset it changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub dataset: String,
  pub kind: MutationKind,
  /// Endpoint path, including any query string
  pub path: String,
  pub body: Option<Value>,
}

impl Mutation {
  pub fn new(dataset: impl Into<String>, kind: MutationKind, path: impl Into<String>) -> Self {
    Self {
      dataset: dataset.into(),
      kind,
      path: path.into(),
      body: None,
    }
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }
}

/// Structured error body of a non-success response.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub error: Option<String>,
  pub message: Option<String>,
}

impl ApiErrorBody {
  /// Pull a human-readable message out of a response body.
  pub fn message_from(body: &str, status: u16) -> String {
    let parsed: ApiErrorBody = serde_json::from_str(body).unwrap_or_default();
    parsed
      .error
      .or(parsed.message)
      .filter(|m| !m.trim().is_empty())
      .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty()))
      .unwrap_or_else(|| format!("request failed with status {}", status))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_message_prefers_error_field() {
    let body = r#"{"error": "Nome obrigatório", "message": "other"}"#;
    assert_eq!(ApiErrorBody::message_from(body, 400), "Nome obrigatório");
  }

  #[test]
  fn test_message_falls_back_to_message_then_text() {
    assert_eq!(ApiErrorBody::message_from(r#"{"message":"bad"}"#, 400), "bad");
    assert_eq!(ApiErrorBody::message_from("Gateway down", 502), "Gateway down");
    assert_eq!(
      ApiErrorBody::message_from("", 500),
      "request failed with status 500"
    );
  }

  #[test]
  fn test_kind_methods() {
    assert_eq!(MutationKind::Create.method(), reqwest::Method::POST);
    assert_eq!(MutationKind::Update.method(), reqwest::Method::PUT);
    assert_eq!(MutationKind::Delete.method(), reqwest::Method::DELETE);
    assert_eq!(MutationKind::StatusChange.method(), reqwest::Method::POST);
  }
}
