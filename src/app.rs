use crate::cache::{CacheEntry, Notice, Origin, Record, SourceShape};
use crate::config::{CacheBackend, Config};
use crate::datasets::{Dataset, DatasetRegistry};
use crate::debounce::{worth_searching, Debouncer};
use crate::query::{self, Filter, Page};
use crate::session::{open_storage, Session};
use crate::sync::{PrefetchError, PrefetchReport};
use crate::upstream::{FetchError, HttpUpstream, Mutation, MutationKind};
use clap::{Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Warm every configured dataset and report what was cached
  Prefetch,
  /// Read datasets through the cache
  Load {
    /// Dataset keys or aliases
    #[arg(required = true)]
    datasets: Vec<String>,
    /// Fetch even when a cached copy exists
    #[arg(long)]
    refresh: bool,
  },
  /// Filter a dataset and show one page
  Query {
    dataset: String,
    /// Case-insensitive substring match, as field=text
    #[arg(long, value_parser = parse_field_text)]
    contains: Vec<(String, String)>,
    /// Case-insensitive prefix match, as field=text
    #[arg(long, value_parser = parse_field_text)]
    prefix: Vec<(String, String)>,
    /// Case-insensitive whole-value match, as field=text
    #[arg(long, value_parser = parse_field_text)]
    exact: Vec<(String, String)>,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, default_value_t = 20)]
    page_size: usize,
  },
  /// Show the first record whose fields equal the given values
  Lookup {
    dataset: String,
    /// Values to match, as field=text
    #[arg(required = true, value_parser = parse_field_text)]
    fields: Vec<(String, String)>,
  },
  /// Search a dataset. Without a term, reads terms from stdin as they are typed.
  Search {
    dataset: String,
    term: Option<String>,
    /// Fields to search (default: every field)
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
    #[arg(long)]
    limit: Option<usize>,
  },
  /// Send a write and invalidate the dataset it touches
  Mutate {
    dataset: String,
    #[arg(value_enum)]
    kind: MutationArg,
    /// Endpoint path, e.g. /api/usuarios/7
    path: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Drop the cached copy of a dataset
  Invalidate { dataset: String },
  /// List known datasets
  Datasets,
  /// Clear the session cache
  SignOut,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum MutationArg {
  Create,
  Update,
  Delete,
  Status,
}

impl From<MutationArg> for MutationKind {
  fn from(arg: MutationArg) -> Self {
    match arg {
      MutationArg::Create => MutationKind::Create,
      MutationArg::Update => MutationKind::Update,
      MutationArg::Delete => MutationKind::Delete,
      MutationArg::Status => MutationKind::StatusChange,
    }
  }
}

fn parse_field_text(arg: &str) -> Result<(String, String), String> {
  match arg.split_once('=') {
    Some((field, text)) if !field.trim().is_empty() => Ok((field.trim().to_string(), text.to_string())),
    _ => Err(format!("expected field=text, got `{}`", arg)),
  }
}

/// Runs one command against a signed-in session.
pub struct App {
  session: Session<HttpUpstream>,
}

impl App {
  pub fn new(mut config: Config, memory: bool) -> Result<Self> {
    if memory {
      config.cache.backend = CacheBackend::Memory;
    }

    let registry = Arc::new(DatasetRegistry::with_overrides(&config.datasets));
    let storage = open_storage(&config.cache)?;
    let upstream = Arc::new(HttpUpstream::new(&config, Arc::clone(&registry))?);
    let session = Session::sign_in(config, registry, storage, upstream)?;

    Ok(Self { session })
  }

  pub async fn run(self, command: Command) -> Result<()> {
    match command {
      Command::Prefetch => {
        let report = self.session.prefetch().await;
        print!("{}", format_report(&report));
      }
      Command::Load { datasets, refresh } => self.load(&datasets, refresh).await?,
      Command::Query {
        dataset,
        contains,
        prefix,
        exact,
        page,
        page_size,
      } => {
        let key = self.resolve(&dataset)?.key.clone();
        let mut filter = Filter::new();
        for (field, text) in &contains {
          filter = filter.contains(field, Some(text.as_str()));
        }
        for (field, text) in &prefix {
          filter = filter.prefix(field, Some(text.as_str()));
        }
        for (field, text) in &exact {
          filter = filter.equals(field, Some(text.as_str()));
        }

        let loaded = self
          .session
          .reader()
          .load_page(&key, &filter, page, page_size)
          .await
          .ok_or_else(|| eyre!("{} is already loading", key))?;
        if let Some(notice) = loaded.notice() {
          eprintln!("{}", notice.message());
        }
        print!("{}", format_page(&loaded.page));
      }
      Command::Lookup { dataset, fields } => {
        let key = self.resolve(&dataset)?.key.clone();
        let result = self
          .session
          .reader()
          .load(&key)
          .await
          .ok_or_else(|| eyre!("{} is already loading", key))?;
        if let Some(notice) = result.notice() {
          eprintln!("{}", notice.message());
        }
        let filter = fields
          .iter()
          .fold(Filter::new(), |filter, (field, text)| filter.equals(field, Some(text.as_str())));
        match query::find_first(&result.items, &filter) {
          Some(record) => println!("{}", serde_json::to_string_pretty(record)?),
          None => println!("no match in {}", key),
        }
      }
      Command::Search {
        dataset,
        term,
        fields,
        limit,
      } => {
        let limit = limit.unwrap_or(self.session.config().search.limit);
        self.search(&dataset, term, fields, limit).await?;
      }
      Command::Mutate {
        dataset,
        kind,
        path,
        body,
      } => {
        let key = self.resolve(&dataset)?.key.clone();
        let mut mutation = Mutation::new(key, kind.into(), path);
        if let Some(body) = body {
          let body = serde_json::from_str(&body).map_err(|e| eyre!("Invalid JSON body: {}", e))?;
          mutation = mutation.with_body(body);
        }
        let response = self.session.mutations().apply(&mutation).await?;
        if !response.is_null() {
          println!("{}", serde_json::to_string_pretty(&response)?);
        }
      }
      Command::Invalidate { dataset } => {
        let key = self.resolve(&dataset)?.key.clone();
        self.session.store().invalidate(&key)?;
        println!("invalidated {}", key);
      }
      Command::Datasets => {
        let store = self.session.store();
        let entries: BTreeMap<String, CacheEntry> = store
          .keys()?
          .into_iter()
          .filter_map(|key| store.entry(&key).map(|entry| (key, entry)))
          .collect();
        print!("{}", format_datasets(self.session.registry().all(), &entries));
      }
      Command::SignOut => {
        self.session.sign_out()?;
        println!("session cache cleared");
      }
    }
    Ok(())
  }

  fn resolve(&self, input: &str) -> Result<&Dataset> {
    self.session.registry().resolve(input).ok_or_else(|| {
      eyre!(
        "Unknown dataset `{}`. Known datasets: {}",
        input,
        self.session.registry().keys().join(", ")
      )
    })
  }

  async fn load(&self, inputs: &[String], refresh: bool) -> Result<()> {
    let keys = inputs
      .iter()
      .map(|input| self.resolve(input).map(|d| d.key.clone()))
      .collect::<Result<BTreeSet<_>>>()?;

    let reader = self.session.reader();
    let results = join_all(keys.iter().map(|key| async {
      if refresh {
        reader.refresh(key).await
      } else {
        reader.load(key).await
      }
    }))
    .await;

    for (key, result) in keys.iter().zip(results) {
      match result {
        Some(result) => println!(
          "{}",
          format_load_line(key, result.origin, result.items.len(), result.notice())
        ),
        None => println!("{}: already loading", key),
      }
    }
    Ok(())
  }

  async fn search(&self, dataset: &str, term: Option<String>, fields: Vec<String>, limit: usize) -> Result<()> {
    let key = self.resolve(dataset)?.key.clone();
    let result = self
      .session
      .reader()
      .load(&key)
      .await
      .ok_or_else(|| eyre!("{} is already loading", key))?;
    if let Some(notice) = result.notice() {
      eprintln!("{}", notice.message());
    }

    let fields = if fields.is_empty() {
      all_fields(&result.items)
    } else {
      fields
    };
    let snapshot = Arc::new(result.items);
    let min_len = self.session.config().search.min_term_len;

    if let Some(term) = term {
      print!("{}", run_search(&snapshot, &fields, &term, limit, min_len));
      return Ok(());
    }

    let fields = Arc::new(fields);
    let mut debouncer = Debouncer::new(self.session.config().search.debounce());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(term) = lines.next_line().await? {
      let snapshot = Arc::clone(&snapshot);
      let fields = Arc::clone(&fields);
      debouncer.schedule(async move {
        print!("{}", run_search(&snapshot, &fields, &term, limit, min_len));
      });
    }
    debouncer.settle().await;
    Ok(())
  }
}

/// Search a snapshot. Terms shorter than `min_len` give an empty result.
fn run_search(snapshot: &[Record], fields: &[String], term: &str, limit: usize, min_len: usize) -> String {
  if !worth_searching(term, min_len) {
    return String::new();
  }
  let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
  let filter = Filter::new().any_contains(&fields, Some(term));
  let hits = query::search(snapshot, &filter, limit);

  let mut out = format!("{} match(es) for `{}`\n", hits.len(), term.trim());
  for hit in &hits {
    out.push_str(&format!("  {}\n", hit));
  }
  out
}

/// Top-level field names across a snapshot, sorted.
fn all_fields(snapshot: &[Record]) -> Vec<String> {
  let names: BTreeSet<String> = snapshot
    .iter()
    .filter_map(|r| r.as_object())
    .flat_map(|o| o.keys().cloned())
    .collect();
  names.into_iter().collect()
}

fn origin_label(origin: Origin) -> &'static str {
  match origin {
    Origin::Fresh => "fresh",
    Origin::Cache => "cache",
    Origin::Stale => "stale",
    Origin::Unavailable => "unavailable",
  }
}

fn format_load_line(key: &str, origin: Origin, count: usize, notice: Option<Notice>) -> String {
  let mut line = format!("{}: {} record(s) ({})", key, count, origin_label(origin));
  if let Some(notice) = notice {
    line.push_str(&format!(" - {}", notice.message()));
  }
  line
}

fn format_page(page: &Page) -> String {
  let mut out = format!(
    "page {}/{} ({} match(es))\n",
    page.page, page.total_pages, page.total_count
  );
  for item in &page.items {
    out.push_str(&format!("  {}\n", item));
  }
  out
}

fn failure_kind(error: &PrefetchError) -> &'static str {
  match error {
    PrefetchError::Fetch(FetchError::Transport(_)) => "offline",
    PrefetchError::Fetch(_) => "rejected",
    PrefetchError::Decode(_) => "undecodable",
    PrefetchError::Store(_) => "not cached",
  }
}

fn format_report(report: &PrefetchReport) -> String {
  let mut out = String::new();
  for (key, count) in &report.populated {
    out.push_str(&format!("cached   {} ({} record(s))\n", key, count));
  }
  for (key, error) in &report.failed {
    out.push_str(&format!("failed   {} [{}]: {}\n", key, failure_kind(error), error));
  }
  for key in &report.pending {
    out.push_str(&format!("pending  {}\n", key));
  }
  if !report.is_complete() {
    out.push_str("still fetching in the background\n");
  }
  out
}

fn shape_label(shape: SourceShape) -> &'static str {
  match shape {
    SourceShape::BareArray => "array",
    SourceShape::DataEnvelope => "data envelope",
    SourceShape::NamedEnvelope => "named envelope",
  }
}

/// One line per dataset. Cached ones are starred and show their entry.
fn format_datasets(datasets: &[Dataset], entries: &BTreeMap<String, CacheEntry>) -> String {
  let width = datasets.iter().map(|d| d.key.len()).max().unwrap_or(0);
  let mut out = String::new();
  for dataset in datasets {
    let line = match entries.get(&dataset.key) {
      Some(entry) => format!(
        "* {:width$}  {}  {} record(s), {}, stored {}\n",
        dataset.key,
        dataset.description,
        entry.payload.len(),
        shape_label(entry.source_shape),
        entry.stored_at.format("%Y-%m-%d %H:%M:%S"),
        width = width
      ),
      None => format!(
        "  {:width$}  {}  {}\n",
        dataset.key,
        dataset.description,
        dataset.path,
        width = width
      ),
    };
    out.push_str(&line);
  }
  out
}
