//! Trailing-edge debounce for interactive searches.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs only the last scheduled action, once `delay` has passed without a
/// newer one.
///
/// Scheduling replaces whatever is pending. Dropping the debouncer cancels
/// the pending action.
#[derive(Debug)]
pub struct Debouncer {
  delay: Duration,
  pending: Option<JoinHandle<()>>,
}

impl Debouncer {
  pub fn new(delay: Duration) -> Self {
    Self { delay, pending: None }
  }

  pub fn schedule<F>(&mut self, action: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.cancel();
    let delay = self.delay;
    self.pending = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      action.await;
    }));
  }

  pub fn cancel(&mut self) {
    if let Some(handle) = self.pending.take() {
      handle.abort();
    }
  }

  /// Wait for the pending action, if any, to run.
  pub async fn settle(&mut self) {
    if let Some(handle) = self.pending.take() {
      let _ = handle.await;
    }
  }

  /// True while an action is waiting or running.
  #[cfg(test)]
  pub fn is_pending(&self) -> bool {
    self.pending.as_ref().is_some_and(|h| !h.is_finished())
  }
}

impl Drop for Debouncer {
  fn drop(&mut self) {
    self.cancel();
  }
}

/// Whether a search term is long enough to be worth running.
pub fn worth_searching(term: &str, min_len: usize) -> bool {
  term.trim().chars().count() >= min_len
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let record = move |term: &str| {
      let sink = sink.clone();
      let term = term.to_string();
      Box::pin(async move { sink.lock().unwrap().push(term) }) as std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
    };
    (seen, record)
  }

  #[tokio::test(start_paused = true)]
  async fn test_only_last_term_runs() {
    let (seen, record) = recorder();
    let mut debouncer = Debouncer::new(Duration::from_millis(500));

    for term in ["pa", "par", "para"] {
      debouncer.schedule(record(term));
      tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(seen.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(*seen.lock().unwrap(), vec!["para".to_string()]);
    assert!(!debouncer.is_pending());
  }

  #[tokio::test(start_paused = true)]
  async fn test_spaced_terms_each_run() {
    let (seen, record) = recorder();
    let mut debouncer = Debouncer::new(Duration::from_millis(500));

    debouncer.schedule(record("pa"));
    tokio::time::sleep(Duration::from_millis(700)).await;
    debouncer.schedule(record("parafuso"));
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["pa".to_string(), "parafuso".to_string()]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_and_drop_stop_pending_action() {
    let (seen, record) = recorder();

    let mut debouncer = Debouncer::new(Duration::from_millis(500));
    debouncer.schedule(record("cancelled"));
    assert!(debouncer.is_pending());
    debouncer.cancel();
    assert!(!debouncer.is_pending());

    let mut dropped = Debouncer::new(Duration::from_millis(500));
    dropped.schedule(record("dropped"));
    drop(dropped);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(seen.lock().unwrap().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_settle_runs_last_action() {
    let (seen, record) = recorder();
    let mut debouncer = Debouncer::new(Duration::from_millis(500));
    debouncer.schedule(record("par"));
    debouncer.schedule(record("parafuso"));
    debouncer.settle().await;
    assert_eq!(*seen.lock().unwrap(), vec!["parafuso".to_string()]);
    assert!(!debouncer.is_pending());
  }

  #[test]
  fn test_worth_searching() {
    assert!(!worth_searching("", 2));
    assert!(!worth_searching(" a ", 2));
    assert!(worth_searching("ab", 2));
    assert!(worth_searching("çã", 2));
    assert!(worth_searching("x", 1));
  }
}
