//! Per-key in-flight flags.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Suppresses duplicate concurrent loads of the same key.
///
/// A second `run_exclusive` for a key that is already running does not wait
/// for the first one and gets no result. Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
  in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Held while a load runs. Clears the flag when dropped.
#[derive(Debug)]
pub struct InFlightPermit {
  key: String,
  in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightPermit {
  fn drop(&mut self) {
    lock(&self.in_flight).remove(&self.key);
  }
}

fn lock(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
  set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InFlightGuard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mark `key` in progress, or `None` if it already is.
  pub fn try_acquire(&self, key: &str) -> Option<InFlightPermit> {
    if !lock(&self.in_flight).insert(key.to_string()) {
      return None;
    }
    Some(InFlightPermit {
      key: key.to_string(),
      in_flight: Arc::clone(&self.in_flight),
    })
  }

  #[cfg(test)]
  pub fn is_in_flight(&self, key: &str) -> bool {
    lock(&self.in_flight).contains(key)
  }

  /// Run `loader` unless a load for `key` is already in progress.
  ///
  /// The flag is cleared however the loader ends, including when the
  /// returned future is dropped before completion.
  pub async fn run_exclusive<F, Fut, T>(&self, key: &str, loader: F) -> Option<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    let Some(_permit) = self.try_acquire(key) else {
      debug!(key, "load already in flight, skipping");
      return None;
    };
    Some(loader().await)
  }
}
