//! Filtering and pagination over an in-memory dataset snapshot.
//!
//! Everything here is a pure function of its inputs: no network, no cache
//! writes. The same snapshot, filter, and page always give the same page,
//! whether the snapshot came from a fresh fetch or from the cache.
//!
//! # Example
//!
//! ```ignore
//! let filter = Filter::new()
//!   .contains("DESCRPROD", Some("parafuso"))
//!   .contains("CODPROD", search_code.as_deref());
//!
//! let page = filter_and_paginate(&items, &filter, 1, 20);
//! println!("{} of {} ({} pages)", page.items.len(), page.total_count, page.total_pages);
//! ```

use serde_json::Value;

use crate::cache::Record;

/// How a predicate compares a field against its needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
  /// Case-insensitive substring
  Contains,
  /// Case-insensitive prefix
  Prefix,
  /// Case-insensitive equality
  Exact,
}

/// One condition over a record: true if any of `fields` matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
  fields: Vec<String>,
  /// Stored lowercased
  needle: String,
  mode: MatchMode,
}

impl Predicate {
  pub fn new<I, S>(fields: I, needle: &str, mode: MatchMode) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      fields: fields.into_iter().map(Into::into).collect(),
      needle: needle.trim().to_lowercase(),
      mode,
    }
  }

  pub fn matches(&self, record: &Record) -> bool {
    self.fields.iter().any(|field| {
      let value = field_text(record, field).to_lowercase();
      match self.mode {
        MatchMode::Contains => value.contains(&self.needle),
        MatchMode::Prefix => value.starts_with(&self.needle),
        MatchMode::Exact => value == self.needle,
      }
    })
  }
}

/// A conjunction of predicates. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
  predicates: Vec<Predicate>,
}

impl Filter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a predicate unless its needle is absent or blank.
  pub fn with(mut self, fields: &[&str], needle: Option<&str>, mode: MatchMode) -> Self {
    if let Some(needle) = needle.filter(|n| !n.trim().is_empty()) {
      self.predicates.push(Predicate::new(fields.iter().copied(), needle, mode));
    }
    self
  }

  pub fn contains(self, field: &str, needle: Option<&str>) -> Self {
    self.with(&[field], needle, MatchMode::Contains)
  }

  pub fn prefix(self, field: &str, needle: Option<&str>) -> Self {
    self.with(&[field], needle, MatchMode::Prefix)
  }

  pub fn equals(self, field: &str, needle: Option<&str>) -> Self {
    self.with(&[field], needle, MatchMode::Exact)
  }

  /// Match if any of the fields contains the needle.
  pub fn any_contains(self, fields: &[&str], needle: Option<&str>) -> Self {
    self.with(fields, needle, MatchMode::Contains)
  }

  pub fn matches(&self, record: &Record) -> bool {
    self.predicates.iter().all(|p| p.matches(record))
  }
}

/// One page of filtered results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
  pub items: Vec<Record>,
  /// Matches across all pages
  pub total_count: usize,
  pub total_pages: usize,
  /// The 1-indexed page actually served
  pub page: usize,
  pub page_size: usize,
}

/// Filter a snapshot and cut out one 1-indexed page.
///
/// Page 0 is read as page 1 and a page size of 0 as 1. Pages past the end are
/// empty but still report the totals.
pub fn filter_and_paginate(collection: &[Record], filter: &Filter, page: usize, page_size: usize) -> Page {
  let page = page.max(1);
  let page_size = page_size.max(1);

  let matching: Vec<&Record> = collection.iter().filter(|r| filter.matches(r)).collect();
  let total_count = matching.len();
  let total_pages = total_count.div_ceil(page_size).max(1);

  let items = matching
    .into_iter()
    .skip((page - 1).saturating_mul(page_size))
    .take(page_size)
    .cloned()
    .collect();

  Page {
    items,
    total_count,
    total_pages,
    page,
    page_size,
  }
}

/// The first `limit` matches, for quick pickers.
pub fn search(collection: &[Record], filter: &Filter, limit: usize) -> Vec<Record> {
  collection
    .iter()
    .filter(|r| filter.matches(r))
    .take(limit)
    .cloned()
    .collect()
}

/// The first match, for keyed lookups.
pub fn find_first<'a>(collection: &'a [Record], filter: &Filter) -> Option<&'a Record> {
  collection.iter().find(|r| filter.matches(r))
}

/// Render a top-level field for comparison. Missing and null render empty.
pub fn field_text(record: &Record, field: &str) -> String {
  match record.get(field) {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(s)) => s.clone(),
    Some(other) => other.to_string(),
  }
}
