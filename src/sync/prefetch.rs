//! Post-sign-in warm-up of the dataset cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{CacheStore, DecodeError};
use crate::upstream::{FetchError, Upstream};

/// Why one dataset could not be warmed.
#[derive(Debug, thiserror::Error)]
pub enum PrefetchError {
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error("undecodable response: {0}")]
  Decode(#[from] DecodeError),
  #[error("failed to cache: {0}")]
  Store(String),
}

/// Outcome of a warm-up, as far as it got within the allowance.
#[derive(Debug, Default)]
pub struct PrefetchReport {
  /// Keys cached, with their record counts
  pub populated: Vec<(String, usize)>,
  /// Keys whose fetch failed. Their prior entry is untouched.
  pub failed: Vec<(String, PrefetchError)>,
  /// Keys still fetching when the allowance ran out. They keep running.
  pub pending: Vec<String>,
}

impl PrefetchReport {
  pub fn is_complete(&self) -> bool {
    self.pending.is_empty()
  }
}

/// Fetches every configured dataset concurrently and caches each success.
pub struct PrefetchOrchestrator<U: Upstream> {
  store: Arc<CacheStore>,
  upstream: Arc<U>,
  keys: Vec<String>,
  allowance: Duration,
}

impl<U: Upstream> PrefetchOrchestrator<U> {
  pub fn new(store: Arc<CacheStore>, upstream: Arc<U>, keys: Vec<String>) -> Self {
    Self {
      store,
      upstream,
      keys,
      allowance: Duration::from_secs(15),
    }
  }

  /// How long `run` waits before handing control back.
  pub fn with_allowance(mut self, allowance: Duration) -> Self {
    self.allowance = allowance;
    self
  }

  /// Start one fetch per key and wait until all settle or the allowance
  /// elapses. Fetches still running afterwards finish in the background.
  pub async fn run(&self) -> PrefetchReport {
    let (tx, mut rx) = mpsc::unbounded_channel();

    for key in &self.keys {
      let store = Arc::clone(&self.store);
      let upstream = Arc::clone(&self.upstream);
      let tx = tx.clone();
      let key = key.clone();

      tokio::spawn(async move {
        let outcome = prefetch_one(&store, upstream.as_ref(), &key).await;
        match &outcome {
          Ok(count) => info!(key, count, "prefetched dataset"),
          Err(e) => warn!(key, error = %e, "prefetch failed, keeping any cached copy"),
        }
        // The receiver is gone once the allowance has elapsed
        let _ = tx.send((key, outcome));
      });
    }
    drop(tx);

    let mut report = PrefetchReport::default();
    let deadline = tokio::time::sleep(self.allowance);
    tokio::pin!(deadline);

    loop {
      tokio::select! {
        biased;
        received = rx.recv() => match received {
          Some((key, Ok(count))) => report.populated.push((key, count)),
          Some((key, Err(e))) => report.failed.push((key, e)),
          None => break,
        },
        _ = &mut deadline => {
          warn!(allowance_ms = self.allowance.as_millis() as u64, "prefetch allowance elapsed, continuing in background");
          break;
        }
      }
    }

    let settled: HashSet<&str> = report
      .populated
      .iter()
      .map(|(k, _)| k.as_str())
      .chain(report.failed.iter().map(|(k, _)| k.as_str()))
      .collect();
    let pending = self
      .keys
      .iter()
      .filter(|k| !settled.contains(k.as_str()))
      .cloned()
      .collect();
    report.pending = pending;

    info!(
      populated = report.populated.len(),
      failed = report.failed.len(),
      pending = report.pending.len(),
      "prefetch finished"
    );
    report
  }
}

async fn prefetch_one<U: Upstream>(store: &CacheStore, upstream: &U, key: &str) -> Result<usize, PrefetchError> {
  let generation = store.generation(key);
  let body = upstream.fetch(key).await?;
  let items = store.normalize(key, body)?;
  store
    .set_if_current(key, &items, generation)
    .map_err(|e| PrefetchError::Store(e.to_string()))?;
  Ok(items.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::testing::{catalog, memory_store, FakeUpstream, Reply};
  use serde_json::json;

  fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
  }

  #[tokio::test]
  async fn test_populates_every_key() {
    let store = memory_store();
    let upstream = Arc::new(
      FakeUpstream::new()
        .reply("produtos", Reply::Body(json!({"produtos": catalog(57)})))
        .reply("tabelasPrecosConfig", Reply::Body(json!({"configs": catalog(3)})))
        .reply("usuarios", Reply::Body(json!(catalog(8)))),
    );
    let prefetch = PrefetchOrchestrator::new(
      store.clone(),
      upstream.clone(),
      keys(&["produtos", "tabelasPrecosConfig", "usuarios"]),
    );

    let mut report = prefetch.run().await;
    report.populated.sort();
    assert_eq!(
      report.populated,
      vec![
        ("produtos".to_string(), 57),
        ("tabelasPrecosConfig".to_string(), 3),
        ("usuarios".to_string(), 8),
      ]
    );
    assert!(report.failed.is_empty());
    assert!(report.is_complete());
    assert_eq!(store.get("produtos").unwrap().len(), 57);
    assert_eq!(store.get("tabelasPrecosConfig").unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_one_failure_does_not_affect_others() {
    let store = memory_store();
    store.set("usuarios", &catalog(5)).unwrap();
    let upstream = Arc::new(
      FakeUpstream::new()
        .reply("produtos", Reply::Body(json!(catalog(2))))
        .reply("usuarios", Reply::Status(500, "Oracle offline".into())),
    );
    let prefetch = PrefetchOrchestrator::new(store.clone(), upstream, keys(&["usuarios", "produtos"]));

    let report = prefetch.run().await;
    assert_eq!(report.populated, vec![("produtos".to_string(), 2)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "usuarios");
    assert!(matches!(
      &report.failed[0].1,
      PrefetchError::Fetch(FetchError::Status { status: 500, message }) if message == "Oracle offline"
    ));

    // The earlier copy survives the failed refresh
    assert_eq!(store.get("usuarios").unwrap().len(), 5);
    assert_eq!(store.get("produtos").unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_undecodable_body_counts_as_failure() {
    let store = memory_store();
    let upstream = Arc::new(FakeUpstream::new().reply("estoques", Reply::Body(json!({"rows": []}))));
    let prefetch = PrefetchOrchestrator::new(store.clone(), upstream, keys(&["estoques"]));

    let report = prefetch.run().await;
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, PrefetchError::Decode(_)));
    assert_eq!(store.get("estoques"), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetches_run_concurrently() {
    let store = memory_store();
    let upstream = Arc::new(
      FakeUpstream::new()
        .reply("a", Reply::Slow(Duration::from_secs(4), json!([1])))
        .reply("b", Reply::Slow(Duration::from_secs(4), json!([2])))
        .reply("c", Reply::Slow(Duration::from_secs(4), json!([3]))),
    );
    // Sequential fetches would need 12s
    let prefetch = PrefetchOrchestrator::new(store.clone(), upstream, keys(&["a", "b", "c"]))
      .with_allowance(Duration::from_secs(5));

    let report = prefetch.run().await;
    assert!(report.is_complete());
    assert_eq!(report.populated.len(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_allowance_returns_early_and_slow_keys_finish_later() {
    let store = memory_store();
    let upstream = Arc::new(
      FakeUpstream::new()
        .reply("produtos", Reply::Body(json!(catalog(3))))
        .reply("financeiro", Reply::Slow(Duration::from_secs(30), json!(catalog(9)))),
    );
    let prefetch = PrefetchOrchestrator::new(store.clone(), upstream, keys(&["produtos", "financeiro"]))
      .with_allowance(Duration::from_secs(15));

    let report = prefetch.run().await;
    assert_eq!(report.populated, vec![("produtos".to_string(), 3)]);
    assert_eq!(report.pending, vec!["financeiro".to_string()]);
    assert_eq!(store.get("financeiro"), None);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(store.get("financeiro").unwrap().len(), 9);
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_prefetch_does_not_undo_invalidation() {
    let store = memory_store();
    let upstream = Arc::new(
      FakeUpstream::new().reply("tiposPedido", Reply::Slow(Duration::from_secs(20), json!([1]))),
    );
    let prefetch = PrefetchOrchestrator::new(store.clone(), upstream, keys(&["tiposPedido"]))
      .with_allowance(Duration::from_secs(1));

    let report = prefetch.run().await;
    assert_eq!(report.pending, vec!["tiposPedido".to_string()]);
    store.invalidate("tiposPedido").unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.get("tiposPedido"), None);
  }

  #[tokio::test]
  async fn test_no_keys_is_an_empty_report() {
    let prefetch = PrefetchOrchestrator::new(memory_store(), Arc::new(FakeUpstream::new()), Vec::new());
    let report = prefetch.run().await;
    assert!(report.populated.is_empty());
    assert!(report.failed.is_empty());
    assert!(report.is_complete());
  }
}
