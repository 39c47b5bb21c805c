/// Known datasets and name resolution
use serde::Deserialize;

use crate::cache::Envelope;

/// Built-in dataset definition
#[derive(Debug, Clone)]
pub struct DatasetDef {
  pub key: &'static str,
  pub aliases: &'static [&'static str],
  pub description: &'static str,
  pub path: &'static str,
  pub envelope: &'static [&'static str],
}

/// All built-in datasets, in prefetch order
pub const DATASETS: &[DatasetDef] = &[
  DatasetDef {
    key: "produtos",
    aliases: &["products", "catalog"],
    description: "Catalog items",
    path: "/api/sankhya/produtos",
    envelope: &["produtos"],
  },
  DatasetDef {
    key: "estoques",
    aliases: &["stock"],
    description: "Stock levels",
    path: "/api/oracle/estoque",
    envelope: &["estoques"],
  },
  DatasetDef {
    key: "tabelasPrecosConfig",
    aliases: &["price-tables", "precos"],
    description: "Price-table configurations",
    path: "/api/tabelas-precos-config",
    envelope: &["configs"],
  },
  DatasetDef {
    key: "tabelasPrecos",
    aliases: &["tabelas"],
    description: "Price tables",
    path: "/api/oracle/tabelas-precos",
    envelope: &["tabelas"],
  },
  DatasetDef {
    key: "excecoesPrecos",
    aliases: &["price-exceptions", "excecoes"],
    description: "Price exceptions",
    path: "/api/oracle/excecoes-precos",
    envelope: &["excecoes"],
  },
  DatasetDef {
    key: "tiposPedido",
    aliases: &["order-types", "pedidos"],
    description: "Order types",
    path: "/api/tipos-pedido",
    envelope: &["tiposPedido"],
  },
  DatasetDef {
    key: "tiposOperacao",
    aliases: &["operation-types", "operacoes"],
    description: "Operation types",
    path: "/api/sankhya/tipos-negociacao?tipo=operacao",
    envelope: &["tiposOperacao"],
  },
  DatasetDef {
    key: "tiposNegociacao",
    aliases: &["negotiation-types", "negociacoes"],
    description: "Negotiation types",
    path: "/api/sankhya/tipos-negociacao",
    envelope: &["tiposNegociacao"],
  },
  DatasetDef {
    key: "usuarios",
    aliases: &["users"],
    description: "User accounts",
    path: "/api/usuarios",
    envelope: &["usuarios"],
  },
  DatasetDef {
    key: "financeiro",
    aliases: &["receivables", "titulos"],
    description: "Receivable titles",
    path: "/api/oracle/financeiro",
    envelope: &["titulos"],
  },
];

/// A dataset as configured for this session
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Dataset {
  pub key: String,
  #[serde(default)]
  pub aliases: Vec<String>,
  #[serde(default)]
  pub description: String,
  pub path: String,
  /// Envelope field names this dataset's endpoint may wrap its collection in
  #[serde(default)]
  pub envelope: Vec<String>,
}

impl Dataset {
  /// The envelope this dataset's responses are decoded with.
  pub fn accepted_envelope(&self) -> Envelope {
    Envelope::new(self.envelope.iter().cloned())
  }
}

impl From<&DatasetDef> for Dataset {
  fn from(def: &DatasetDef) -> Self {
    Self {
      key: def.key.to_string(),
      aliases: def.aliases.iter().map(|a| a.to_string()).collect(),
      description: def.description.to_string(),
      path: def.path.to_string(),
      envelope: def.envelope.iter().map(|f| f.to_string()).collect(),
    }
  }
}

/// The set of datasets a session knows about
#[derive(Debug, Clone)]
pub struct DatasetRegistry {
  datasets: Vec<Dataset>,
}

impl Default for DatasetRegistry {
  fn default() -> Self {
    Self {
      datasets: DATASETS.iter().map(Dataset::from).collect(),
    }
  }
}

impl DatasetRegistry {
  /// Built-in datasets with `overrides` applied: an override with a known key
  /// replaces that dataset, any other is appended.
  pub fn with_overrides(overrides: &[Dataset]) -> Self {
    let mut registry = Self::default();
    for dataset in overrides {
      match registry.datasets.iter_mut().find(|d| d.key == dataset.key) {
        Some(existing) => *existing = dataset.clone(),
        None => registry.datasets.push(dataset.clone()),
      }
    }
    registry
  }

  pub fn all(&self) -> &[Dataset] {
    &self.datasets
  }

  pub fn keys(&self) -> Vec<String> {
    self.datasets.iter().map(|d| d.key.clone()).collect()
  }

  /// Look up by exact key.
  pub fn get(&self, key: &str) -> Option<&Dataset> {
    self.datasets.iter().find(|d| d.key == key)
  }

  /// Resolve user input to the best matching dataset.
  pub fn resolve(&self, input: &str) -> Option<&Dataset> {
    self.suggestions(input).into_iter().next()
  }

  /// Datasets matching the input, best first.
  pub fn suggestions(&self, input: &str) -> Vec<&Dataset> {
    let input_lower = input.to_lowercase();

    if input_lower.is_empty() {
      return self.datasets.iter().collect();
    }

    let mut matches: Vec<(&Dataset, u32)> = Vec::new();

    for dataset in &self.datasets {
      let key = dataset.key.to_lowercase();
      let aliases: Vec<String> = dataset.aliases.iter().map(|a| a.to_lowercase()).collect();

      // Exact match on key
      if key == input_lower {
        matches.push((dataset, 0));
        continue;
      }

      // Exact match on alias
      if aliases.contains(&input_lower) {
        matches.push((dataset, 1));
        continue;
      }

      // Prefix match on key
      if key.starts_with(&input_lower) {
        matches.push((dataset, 2));
        continue;
      }

      // Prefix match on alias
      if aliases.iter().any(|a| a.starts_with(&input_lower)) {
        matches.push((dataset, 3));
        continue;
      }

      // Fuzzy match (contains)
      if key.contains(&input_lower) {
        matches.push((dataset, 4));
        continue;
      }

      // Fuzzy match on alias
      if aliases.iter().any(|a| a.contains(&input_lower)) {
        matches.push((dataset, 5));
      }
    }

    // Sort by priority
    matches.sort_by_key(|(_, priority)| *priority);

    matches.into_iter().map(|(dataset, _)| dataset).collect()
  }
}
