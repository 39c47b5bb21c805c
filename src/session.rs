//! One signed-in session: the cache store and everything that shares it.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStorage, CacheStore, Envelope, MemoryStorage, SqliteStorage};
use crate::config::{CacheBackend, CacheConfig, Config};
use crate::datasets::DatasetRegistry;
use crate::sync::{MutationInvalidator, Mutations, PrefetchOrchestrator, PrefetchReport, ResilientReader};
use crate::upstream::Upstream;

/// Open the storage backend the config asks for.
pub fn open_storage(config: &CacheConfig) -> Result<Arc<dyn CacheStorage>> {
  let storage: Arc<dyn CacheStorage> = match config.backend {
    CacheBackend::Memory => Arc::new(MemoryStorage::new()),
    CacheBackend::Sqlite => match &config.path {
      Some(path) => Arc::new(SqliteStorage::open_at(path)?),
      None => Arc::new(SqliteStorage::open()?),
    },
  };
  Ok(storage)
}

pub struct Session<U: Upstream> {
  config: Config,
  registry: Arc<DatasetRegistry>,
  store: Arc<CacheStore>,
  upstream: Arc<U>,
}

impl<U: Upstream> Session<U> {
  /// Set up the session cache over `storage`. Nothing is fetched until
  /// `prefetch` or a reader asks.
  pub fn sign_in(
    config: Config,
    registry: Arc<DatasetRegistry>,
    storage: Arc<dyn CacheStorage>,
    upstream: Arc<U>,
  ) -> Result<Self> {
    for key in &config.prefetch.datasets {
      if registry.get(key).is_none() {
        return Err(eyre!("prefetch.datasets names unknown dataset `{}`", key));
      }
    }

    let store = registry
      .all()
      .iter()
      .fold(CacheStore::new(storage, Envelope::default()), |store, dataset| {
        store.with_envelope(&dataset.key, dataset.accepted_envelope())
      })
      .with_ttl(config.cache.ttl());
    info!(datasets = registry.all().len(), "session started");

    Ok(Self {
      config,
      registry,
      store: Arc::new(store),
      upstream,
    })
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn registry(&self) -> &DatasetRegistry {
    &self.registry
  }

  pub fn store(&self) -> &Arc<CacheStore> {
    &self.store
  }

  /// A new reader context with its own in-flight flags.
  pub fn reader(&self) -> ResilientReader<U> {
    ResilientReader::new(Arc::clone(&self.store), Arc::clone(&self.upstream)).with_timeout(self.config.api.timeout())
  }

  /// The configured prefetch keys, or every dataset if none are configured.
  pub fn prefetch_keys(&self) -> Vec<String> {
    if self.config.prefetch.datasets.is_empty() {
      self.registry.keys()
    } else {
      self.config.prefetch.datasets.clone()
    }
  }

  pub fn prefetcher(&self) -> PrefetchOrchestrator<U> {
    PrefetchOrchestrator::new(Arc::clone(&self.store), Arc::clone(&self.upstream), self.prefetch_keys())
      .with_allowance(self.config.prefetch.allowance())
  }

  /// Warm the cache, returning once done or once the allowance elapses.
  pub async fn prefetch(&self) -> PrefetchReport {
    self.prefetcher().run().await
  }

  pub fn invalidator(&self) -> MutationInvalidator {
    MutationInvalidator::new(Arc::clone(&self.store))
  }

  pub fn mutations(&self) -> Mutations<U> {
    Mutations::new(Arc::clone(&self.upstream), self.invalidator())
  }

  /// Drop every cached dataset.
  pub fn sign_out(self) -> Result<()> {
    self.store.clear()?;
    info!("session cache cleared");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Origin;
  use crate::sync::testing::{catalog, FakeUpstream, Reply};
  use serde_json::json;
  use std::time::Duration;

  fn config(extra: &str) -> Config {
    Config::parse(&format!("api:\n  base_url: http://localhost:3000\n  timeout_ms: 200\n{}", extra)).unwrap()
  }

  fn session(config: Config, upstream: FakeUpstream) -> (Arc<FakeUpstream>, Session<FakeUpstream>) {
    let registry = Arc::new(DatasetRegistry::with_overrides(&config.datasets));
    let upstream = Arc::new(upstream);
    let session = Session::sign_in(config, registry, Arc::new(MemoryStorage::new()), upstream.clone()).unwrap();
    (upstream, session)
  }

  #[tokio::test]
  async fn test_prefetch_then_read_from_cache() {
    let (upstream, session) = session(
      config("prefetch:\n  datasets: [produtos, tabelasPrecosConfig]\n"),
      FakeUpstream::new()
        .reply("produtos", Reply::Body(json!({"produtos": catalog(57)})))
        .reply("tabelasPrecosConfig", Reply::Body(json!({"configs": catalog(2)}))),
    );

    let report = session.prefetch().await;
    assert_eq!(report.populated.len(), 2);

    let result = session.reader().load("produtos").await.unwrap();
    assert_eq!(result.origin, Origin::Cache);
    assert_eq!(result.items.len(), 57);
    assert_eq!(upstream.fetches("produtos"), 1);
  }

  #[tokio::test]
  async fn test_shared_route_decodes_each_dataset_by_its_own_field() {
    let body = json!({
      "tiposOperacao": [{"op": 1}],
      "tiposNegociacao": [{"neg": 1}, {"neg": 2}],
    });
    let (_, session) = session(
      config(""),
      FakeUpstream::new()
        .reply("tiposNegociacao", Reply::Body(body.clone()))
        .reply("tiposOperacao", Reply::Body(body)),
    );
    let reader = session.reader();

    let negociacao = reader.load("tiposNegociacao").await.unwrap();
    assert_eq!(negociacao.items, vec![json!({"neg": 1}), json!({"neg": 2})]);
    let operacao = reader.load("tiposOperacao").await.unwrap();
    assert_eq!(operacao.items, vec![json!({"op": 1})]);
  }

  #[tokio::test]
  async fn test_price_tables_decode_their_envelope() {
    let (_, session) = session(
      config(""),
      FakeUpstream::new().reply("tabelasPrecos", Reply::Body(json!({"tabelas": catalog(4)}))),
    );
    let result = session.reader().load("tabelasPrecos").await.unwrap();
    assert_eq!(result.origin, Origin::Fresh);
    assert_eq!(result.items.len(), 4);
  }

  #[test]
  fn test_prefetch_keys_default_to_registry() {
    let (_, session) = session(config(""), FakeUpstream::new());
    assert_eq!(session.prefetch_keys(), session.registry().keys());
    assert!(session.prefetch_keys().contains(&"financeiro".to_string()));
  }

  #[test]
  fn test_unknown_prefetch_key_is_rejected() {
    let config = config("prefetch:\n  datasets: [nope]\n");
    let registry = Arc::new(DatasetRegistry::default());
    let result = Session::sign_in(
      config,
      registry,
      Arc::new(MemoryStorage::new()),
      Arc::new(FakeUpstream::new()),
    );
    assert!(result.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_reader_uses_configured_timeout() {
    let (_, session) = session(
      config(""),
      FakeUpstream::new().reply("estoques", Reply::Slow(Duration::from_millis(300), json!([]))),
    );
    let result = session.reader().load("estoques").await.unwrap();
    assert!(result.error.as_ref().is_some_and(|e| e.is_timeout()));
  }

  #[tokio::test]
  async fn test_sign_out_clears_store() {
    let (_, session) = session(config(""), FakeUpstream::new());
    session.store().set("usuarios", &catalog(2)).unwrap();
    let store = Arc::clone(session.store());
    session.sign_out().unwrap();
    assert_eq!(store.get("usuarios"), None);
  }

  #[test]
  fn test_open_storage_memory_backend() {
    let config = config("cache:\n  backend: memory\n");
    let storage = open_storage(&config.cache).unwrap();
    storage.write("k", "[]").unwrap();
    assert_eq!(storage.keys().unwrap(), vec!["k".to_string()]);
  }

  #[test]
  fn test_open_storage_sqlite_at_path() {
    let dir = std::env::temp_dir().join(format!("portal-cache-test-{}", std::process::id()));
    let config = config(&format!("cache:\n  path: {}\n", dir.join("session.db").display()));
    let storage = open_storage(&config.cache).unwrap();
    storage.write("produtos", "[1]").unwrap();
    assert_eq!(storage.read("produtos").unwrap().unwrap().text, "[1]");
    let _ = std::fs::remove_dir_all(&dir);
  }
}
