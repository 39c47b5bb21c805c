//! Core types shared by the cache and the readers built on top of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single loosely-typed record as it came from upstream.
pub type Record = serde_json::Value;

/// An ordered collection of records for one dataset.
pub type Collection = Vec<Record>;

/// The wrapper shape a collection was stored or received in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceShape {
  /// `[ ... ]`
  BareArray,
  /// `{ "data": [ ... ] }`
  DataEnvelope,
  /// `{ "configs": [ ... ] }` or any other declared field name
  NamedEnvelope,
}

/// A decoded cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
  pub key: String,
  pub payload: Collection,
  pub source_shape: SourceShape,
  /// When the entry was written to storage
  pub stored_at: DateTime<Utc>,
}

/// Where the items of a load came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// Fetched from upstream during this load
  Fresh,
  /// Served from the cache without touching the network
  Cache,
  /// Served from the cache after the network fetch failed
  Stale,
  /// Nothing to serve: the fetch failed and nothing was cached
  Unavailable,
}

/// Non-fatal read-path failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
  #[error("upstream did not answer within the time limit")]
  Timeout,
  #[error("upstream unavailable: {0}")]
  Network(String),
  #[error("no data and nothing cached ({cause})")]
  EmptyNoCache { cause: Box<LoadError> },
}

impl LoadError {
  /// True when the load (or the load behind an empty result) timed out.
  pub fn is_timeout(&self) -> bool {
    match self {
      LoadError::Timeout => true,
      LoadError::Network(_) => false,
      LoadError::EmptyNoCache { cause } => cause.is_timeout(),
    }
  }
}

/// What the user should be told about a load result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
  /// Showing cached data because upstream could not be reached
  Offline,
  /// The request hit the time limit and there was nothing to fall back on
  TimeLimit,
  /// No connection and no cached data
  NoData,
}

impl Notice {
  pub fn message(&self) -> &'static str {
    match self {
      Notice::Offline => "Showing cached data. Reconnect to refresh.",
      Notice::TimeLimit => "The request took too long. Check your connection.",
      Notice::NoData => "No connection and no cached data.",
    }
  }
}

/// Structured result of a resilient load. Never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
  pub key: String,
  pub items: Collection,
  pub origin: Origin,
  /// The failure behind a stale or empty result
  pub error: Option<LoadError>,
}

impl LoadResult {
  pub fn fresh(key: &str, items: Collection) -> Self {
    Self {
      key: key.to_string(),
      items,
      origin: Origin::Fresh,
      error: None,
    }
  }

  pub fn cached(key: &str, items: Collection) -> Self {
    Self {
      key: key.to_string(),
      items,
      origin: Origin::Cache,
      error: None,
    }
  }

  pub fn stale(key: &str, items: Collection, error: LoadError) -> Self {
    Self {
      key: key.to_string(),
      items,
      origin: Origin::Stale,
      error: Some(error),
    }
  }

  pub fn empty(key: &str, cause: LoadError) -> Self {
    Self {
      key: key.to_string(),
      items: Vec::new(),
      origin: Origin::Unavailable,
      error: Some(LoadError::EmptyNoCache {
        cause: Box::new(cause),
      }),
    }
  }

  /// Classify this result for the user.
  pub fn notice(&self) -> Option<Notice> {
    match (self.origin, &self.error) {
      (Origin::Stale, _) => Some(Notice::Offline),
      (Origin::Unavailable, Some(e)) if e.is_timeout() => Some(Notice::TimeLimit),
      (Origin::Unavailable, _) => Some(Notice::NoData),
      _ => None,
    }
  }
}
