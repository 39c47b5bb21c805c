//! Authoritative data source: one read endpoint per dataset, plus entity writes.

mod client;
mod types;

pub use client::HttpUpstream;
pub use types::{FetchError, Mutation, MutationKind, WriteError};

use serde_json::Value;
use std::future::Future;

/// The authoritative source the cache sits in front of.
pub trait Upstream: Send + Sync + 'static {
  /// Fetch the full collection for a dataset key. The body is returned as-is,
  /// in whatever envelope the endpoint uses.
  fn fetch(&self, key: &str) -> impl Future<Output = Result<Value, FetchError>> + Send;

  /// Send a write. Resolves to the response body on success.
  fn write(&self, mutation: &Mutation) -> impl Future<Output = Result<Value, WriteError>> + Send;
}
