//! Cache purging after successful writes.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::upstream::{Mutation, Upstream, WriteError};

/// Drops a dataset's snapshot once a write to it has been accepted.
///
/// There is no write-through: the next read of the key goes upstream.
#[derive(Clone)]
pub struct MutationInvalidator {
  store: Arc<CacheStore>,
}

impl MutationInvalidator {
  pub fn new(store: Arc<CacheStore>) -> Self {
    Self { store }
  }

  /// Call after the source confirmed a mutation of `key`.
  pub fn on_mutation_success(&self, key: &str) {
    match self.store.invalidate(key) {
      Ok(()) => info!(key, "invalidated after mutation"),
      // The generation was bumped anyway, so in-flight loads still lose
      Err(e) => warn!(key, error = %e, "failed to remove invalidated entry"),
    }
  }
}

/// Sends writes upstream and invalidates the touched dataset on success.
pub struct Mutations<U: Upstream> {
  upstream: Arc<U>,
  invalidator: MutationInvalidator,
}

impl<U: Upstream> Mutations<U> {
  pub fn new(upstream: Arc<U>, invalidator: MutationInvalidator) -> Self {
    Self { upstream, invalidator }
  }

  /// Apply a mutation. A rejected write leaves the cache untouched.
  pub async fn apply(&self, mutation: &Mutation) -> Result<Value, WriteError> {
    match self.upstream.write(mutation).await {
      Ok(body) => {
        self.invalidator.on_mutation_success(&mutation.dataset);
        Ok(body)
      }
      Err(e) => {
        warn!(dataset = %mutation.dataset, error = %e, "mutation rejected");
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{LoadError, Notice, Origin};
  use crate::sync::testing::{catalog, memory_store, FakeUpstream, Reply};
  use crate::sync::ResilientReader;
  use crate::upstream::MutationKind;
  use serde_json::json;

  #[tokio::test]
  async fn test_next_load_after_mutation_fetches() {
    let store = memory_store();
    store.set("tiposPedido", &catalog(2)).unwrap();
    let upstream = Arc::new(FakeUpstream::new().reply("tiposPedido", Reply::Body(json!(catalog(3)))));
    let reader = ResilientReader::new(store.clone(), upstream.clone());
    let mutations = Mutations::new(upstream.clone(), MutationInvalidator::new(store.clone()));

    let cached = reader.load("tiposPedido").await.unwrap();
    assert_eq!(cached.origin, Origin::Cache);
    assert_eq!(upstream.fetches("tiposPedido"), 0);

    let mutation = Mutation::new("tiposPedido", MutationKind::Create, "/tipos-pedido")
      .with_body(json!({"NOME": "Bonificação"}));
    mutations.apply(&mutation).await.unwrap();
    assert_eq!(store.get("tiposPedido"), None);

    let fresh = reader.load("tiposPedido").await.unwrap();
    assert_eq!(fresh.origin, Origin::Fresh);
    assert_eq!(fresh.items.len(), 3);
    assert_eq!(upstream.fetches("tiposPedido"), 1);
  }

  #[tokio::test]
  async fn test_failed_fetch_after_invalidation_does_not_resurrect_snapshot() {
    let store = memory_store();
    store.set("tiposOperacao", &catalog(4)).unwrap();
    let upstream = Arc::new(FakeUpstream::new().reply("tiposOperacao", Reply::Status(503, "down".into())));
    let reader = ResilientReader::new(store.clone(), upstream.clone());

    MutationInvalidator::new(store.clone()).on_mutation_success("tiposOperacao");

    let result = reader.load("tiposOperacao").await.unwrap();
    assert_eq!(result.origin, Origin::Unavailable);
    assert!(result.items.is_empty());
    assert!(matches!(result.error, Some(LoadError::EmptyNoCache { .. })));
    assert_eq!(result.notice(), Some(Notice::NoData));
  }

  #[tokio::test]
  async fn test_rejected_write_keeps_cache() {
    let store = memory_store();
    store.set("usuarios", &catalog(6)).unwrap();
    let upstream = Arc::new(FakeUpstream::new());
    upstream.reject_writes(422, "E-mail já cadastrado");
    let mutations = Mutations::new(upstream.clone(), MutationInvalidator::new(store.clone()));

    let mutation = Mutation::new("usuarios", MutationKind::Create, "/users").with_body(json!({"email": "a@b.c"}));
    let err = mutations.apply(&mutation).await.unwrap_err();
    assert_eq!(err.to_string(), "E-mail já cadastrado");
    assert_eq!(store.get("usuarios").unwrap().len(), 6);
    assert_eq!(upstream.writes.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_only_the_touched_dataset_is_invalidated() {
    let store = memory_store();
    store.set("produtos", &catalog(3)).unwrap();
    store.set("excecoesPrecos", &catalog(2)).unwrap();
    let mutations = Mutations::new(Arc::new(FakeUpstream::new()), MutationInvalidator::new(store.clone()));

    let mutation = Mutation::new("excecoesPrecos", MutationKind::Delete, "/excecoes-precos/7");
    mutations.apply(&mutation).await.unwrap();

    assert_eq!(store.get("excecoesPrecos"), None);
    assert_eq!(store.get("produtos").unwrap().len(), 3);
  }

  #[test]
  fn test_invalidating_absent_key_is_harmless() {
    let store = memory_store();
    MutationInvalidator::new(store.clone()).on_mutation_success("financeiro");
    assert_eq!(store.get("financeiro"), None);
  }
}
