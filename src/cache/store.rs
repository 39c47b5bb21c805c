//! The session's dataset store.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::envelope::{DecodeError, Envelope};
use super::storage::{CacheStorage, StoredText};
use super::traits::{CacheEntry, Collection, Record};

/// Write generation of one key. A write tagged with an older generation than
/// the current one is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
  epoch: u64,
  key: u64,
}

#[derive(Debug, Default)]
struct Generations {
  /// Bumped by `clear`
  epoch: u64,
  /// Bumped by `invalidate`
  per_key: HashMap<String, u64>,
}

impl Generations {
  fn current(&self, key: &str) -> Generation {
    Generation {
      epoch: self.epoch,
      key: self.per_key.get(key).copied().unwrap_or(0),
    }
  }
}

/// Key/value store of dataset collections for one session.
///
/// Reads always hand out owned copies. Undecodable or expired entries are
/// purged on read and reported as absent. Every storage mutation happens
/// under the generations lock.
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  /// Used for keys without their own envelope
  fallback: Envelope,
  envelopes: HashMap<String, Envelope>,
  /// Entries older than this are treated as absent. `None` disables expiry.
  ttl: Option<Duration>,
  generations: Mutex<Generations>,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn CacheStorage>, fallback: Envelope) -> Self {
    Self {
      storage,
      fallback,
      envelopes: HashMap::new(),
      ttl: None,
      generations: Mutex::new(Generations::default()),
    }
  }

  /// Decode `key` with its own envelope instead of the fallback.
  pub fn with_envelope(mut self, key: &str, envelope: Envelope) -> Self {
    self.envelopes.insert(key.to_string(), envelope);
    self
  }

  /// Expire entries older than `ttl`.
  pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
    self.ttl = ttl;
    self
  }

  fn envelope_for(&self, key: &str) -> &Envelope {
    self.envelopes.get(key).unwrap_or(&self.fallback)
  }

  fn generations(&self) -> MutexGuard<'_, Generations> {
    self
      .generations
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Get the collection for a key, or `None` if absent or undecodable.
  pub fn get(&self, key: &str) -> Option<Collection> {
    self.entry(key).map(|entry| entry.payload)
  }

  /// Get the full entry for a key, including the shape it was stored in.
  pub fn entry(&self, key: &str) -> Option<CacheEntry> {
    let stored = match self.storage.read(key) {
      Ok(Some(stored)) => stored,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "cache read failed, treating as absent");
        return None;
      }
    };

    if let Some(ttl) = self.ttl {
      if Utc::now() - stored.stored_at >= ttl {
        debug!(key, "cache entry expired");
        self.purge(key, &stored);
        return None;
      }
    }

    let decoded = if stored.intact {
      self.envelope_for(key).parse(&stored.text)
    } else {
      Err(DecodeError::Checksum)
    };

    match decoded {
      Ok((payload, source_shape)) => Some(CacheEntry {
        key: key.to_string(),
        payload,
        source_shape,
        stored_at: stored.stored_at,
      }),
      Err(e) => {
        warn!(key, error = %e, "purging undecodable cache entry");
        self.purge(key, &stored);
        None
      }
    }
  }

  /// Store a collection in canonical form, replacing any prior entry.
  pub fn set(&self, key: &str, collection: &[Record]) -> Result<()> {
    let _generations = self.generations();
    self.write(key, collection)
  }

  /// Store only if no invalidation happened since `generation` was taken.
  ///
  /// Returns `false` when the write was dropped.
  pub fn set_if_current(&self, key: &str, collection: &[Record], generation: Generation) -> Result<bool> {
    let generations = self.generations();
    if generations.current(key) != generation {
      debug!(key, "dropping write from before the last invalidation");
      return Ok(false);
    }
    self.write(key, collection)?;
    Ok(true)
  }

  /// Normalize a raw response body with the envelope declared for `key`.
  pub fn normalize(&self, key: &str, body: Value) -> Result<Collection, DecodeError> {
    self.envelope_for(key).normalize(body).map(|(items, _)| items)
  }

  /// Snapshot of a key's generation, to be passed to `set_if_current`.
  pub fn generation(&self, key: &str) -> Generation {
    self.generations().current(key)
  }

  /// Remove the entry for a key unconditionally.
  pub fn invalidate(&self, key: &str) -> Result<()> {
    let mut generations = self.generations();
    *generations.per_key.entry(key.to_string()).or_insert(0) += 1;
    self.storage.remove(key)
  }

  /// Keys that currently have an entry.
  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.keys()
  }

  /// Remove every entry.
  pub fn clear(&self) -> Result<()> {
    let mut generations = self.generations();
    generations.epoch += 1;
    generations.per_key.clear();
    self.storage.clear()
  }

  /// Caller must hold the generations lock.
  fn write(&self, key: &str, collection: &[Record]) -> Result<()> {
    let text = serde_json::to_string(collection)
      .map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
    self.storage.write(key, &text)?;
    debug!(key, count = collection.len(), "cache entry stored");
    Ok(())
  }

  /// Remove `key` if it still holds the entry that was judged bad.
  fn purge(&self, key: &str, judged: &StoredText) {
    let _generations = self.generations();
    let unchanged = match self.storage.read(key) {
      Ok(Some(current)) => current.text == judged.text && current.stored_at == judged.stored_at,
      Ok(None) => return,
      Err(e) => {
        warn!(key, error = %e, "failed to re-read cache entry before purge");
        return;
      }
    };
    if !unchanged {
      debug!(key, "entry replaced since it was read, not purging");
      return;
    }
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "failed to purge cache entry");
    }
  }
}
