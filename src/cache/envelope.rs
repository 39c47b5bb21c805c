//! Normalization of upstream response envelopes.
//!
//! Upstream endpoints answer with a bare array, a `{ "data": [...] }` wrapper,
//! or a wrapper keyed by a domain-specific field name. Every shape is accepted
//! only if its field name has been declared up front.

use serde_json::Value;

use super::traits::{Collection, SourceShape};

/// The conventional wrapper field.
pub const DATA_FIELD: &str = "data";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
  #[error("payload is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),
  #[error("field `{0}` is not an array")]
  NotArray(String),
  #[error("payload is neither an array nor an envelope with one of {0:?}")]
  UnknownShape(Vec<String>),
  #[error("stored payload failed its checksum")]
  Checksum,
}

/// The declared set of accepted envelope field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
  named_fields: Vec<String>,
}

impl Default for Envelope {
  fn default() -> Self {
    Self::new(Vec::<String>::new())
  }
}

impl Envelope {
  /// Create an envelope accepting `data` plus the given named fields.
  /// Named fields are tried in order, before `data`.
  pub fn new<I, S>(named_fields: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut fields: Vec<String> = Vec::new();
    for field in named_fields {
      let field = field.into();
      if field != DATA_FIELD && !fields.contains(&field) {
        fields.push(field);
      }
    }
    Self {
      named_fields: fields,
    }
  }

  /// Every field name this envelope accepts, `data` last.
  pub fn accepted_fields(&self) -> Vec<String> {
    let mut fields = self.named_fields.clone();
    fields.push(DATA_FIELD.to_string());
    fields
  }

  /// Parse serialized text and normalize it.
  pub fn parse(&self, text: &str) -> Result<(Collection, SourceShape), DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    self.normalize(value)
  }

  /// Normalize a decoded body into its canonical collection.
  ///
  /// A wrapper field that is present but `null` is skipped so a later field can
  /// match; present with any other non-array value is an error.
  pub fn normalize(&self, body: Value) -> Result<(Collection, SourceShape), DecodeError> {
    let mut object = match body {
      Value::Array(items) => return Ok((items, SourceShape::BareArray)),
      Value::Object(object) => object,
      _ => return Err(DecodeError::UnknownShape(self.accepted_fields())),
    };

    for field in &self.named_fields {
      if let Some(items) = take_array(&mut object, field)? {
        return Ok((items, SourceShape::NamedEnvelope));
      }
    }

    if let Some(items) = take_array(&mut object, DATA_FIELD)? {
      return Ok((items, SourceShape::DataEnvelope));
    }

    Err(DecodeError::UnknownShape(self.accepted_fields()))
  }
}

fn take_array(
  object: &mut serde_json::Map<String, Value>,
  field: &str,
) -> Result<Option<Collection>, DecodeError> {
  match object.remove(field) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::Array(items)) => Ok(Some(items)),
    Some(_) => Err(DecodeError::NotArray(field.to_string())),
  }
}
