//! Cache-first dataset reads with bounded fetches and stale fallback.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::guard::InFlightGuard;
use crate::cache::{CacheStore, LoadError, LoadResult, Notice, Origin};
use crate::query::{filter_and_paginate, Filter, Page};
use crate::upstream::Upstream;

/// Default budget for a reader-initiated fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// One reader context: the "obtain dataset X for display" operation.
///
/// Each reader has its own in-flight flags, so concurrent loads of one key
/// through the same reader issue a single fetch. Separate readers do not
/// coordinate with each other.
pub struct ResilientReader<U: Upstream> {
  store: Arc<CacheStore>,
  upstream: Arc<U>,
  guard: InFlightGuard,
  timeout: Duration,
}

/// A page of a dataset plus how the dataset was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedLoad {
  pub page: Page,
  pub origin: Origin,
  pub error: Option<LoadError>,
}

impl PagedLoad {
  pub fn notice(&self) -> Option<Notice> {
    LoadResult {
      key: String::new(),
      items: Vec::new(),
      origin: self.origin,
      error: self.error.clone(),
    }
    .notice()
  }
}

impl<U: Upstream> ResilientReader<U> {
  pub fn new(store: Arc<CacheStore>, upstream: Arc<U>) -> Self {
    Self {
      store,
      upstream,
      guard: InFlightGuard::new(),
      timeout: DEFAULT_TIMEOUT,
    }
  }

  /// Set the fetch budget.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// Whether this reader is currently fetching `key`.
  #[cfg(test)]
  pub fn is_loading(&self, key: &str) -> bool {
    self.guard.is_in_flight(key)
  }

  /// Load a dataset.
  ///
  /// 1. Non-empty cache entry: returned as-is, no network call
  /// 2. Otherwise one fetch bounded by the timeout; success is cached
  /// 3. On failure, whatever the cache holds now, else an empty result
  ///
  /// Returns `None` only when this reader already has a fetch for `key` in
  /// flight; that call is dropped rather than waiting on the first one.
  pub async fn load(&self, key: &str) -> Option<LoadResult> {
    if let Some(items) = self.store.get(key).filter(|items| !items.is_empty()) {
      debug!(key, count = items.len(), "serving dataset from cache");
      return Some(LoadResult::cached(key, items));
    }

    self
      .guard
      .run_exclusive(key, || self.fetch_or_fallback(key))
      .await
  }

  /// Fetch a dataset even if it is cached, falling back to the cached copy
  /// when the fetch fails. `None` when a fetch for `key` is already in flight.
  pub async fn refresh(&self, key: &str) -> Option<LoadResult> {
    self
      .guard
      .run_exclusive(key, || self.fetch_or_fallback(key))
      .await
  }

  /// Load a dataset and cut one page out of it.
  pub async fn load_page(&self, key: &str, filter: &Filter, page: usize, page_size: usize) -> Option<PagedLoad> {
    let result = self.load(key).await?;
    Some(PagedLoad {
      page: filter_and_paginate(&result.items, filter, page, page_size),
      origin: result.origin,
      error: result.error,
    })
  }

  async fn fetch_or_fallback(&self, key: &str) -> LoadResult {
    let generation = self.store.generation(key);

    let error = match tokio::time::timeout(self.timeout, self.upstream.fetch(key)).await {
      Ok(Ok(body)) => match self.store.normalize(key, body) {
        Ok(items) => {
          match self.store.set_if_current(key, &items, generation) {
            Ok(true) => {}
            Ok(false) => debug!(key, "dataset invalidated during fetch, not caching"),
            Err(e) => warn!(key, error = %e, "failed to cache fetched dataset"),
          }
          info!(key, count = items.len(), "fetched dataset");
          return LoadResult::fresh(key, items);
        }
        Err(e) => LoadError::Network(format!("undecodable response: {}", e)),
      },
      Ok(Err(e)) => LoadError::Network(e.to_string()),
      // Dropping the fetch future aborts the request
      Err(_) => LoadError::Timeout,
    };

    warn!(key, error = %error, "fetch failed, falling back to cache");

    match self.store.get(key).filter(|items| !items.is_empty()) {
      Some(items) => {
        info!(key, count = items.len(), "serving stale dataset");
        LoadResult::stale(key, items, error)
      }
      None => LoadResult::empty(key, error),
    }
  }
}
