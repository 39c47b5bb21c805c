use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use color_eyre::{eyre::eyre, Result};

use super::types::{ApiErrorBody, FetchError, Mutation, WriteError};
use super::Upstream;
use crate::config::Config;
use crate::datasets::DatasetRegistry;

/// HTTP implementation of the portal's read and write endpoints
#[derive(Clone)]
pub struct HttpUpstream {
  client: reqwest::Client,
  base_url: Url,
  registry: Arc<DatasetRegistry>,
}

impl HttpUpstream {
  pub fn new(config: &Config, registry: Arc<DatasetRegistry>) -> Result<Self> {
    let token = Config::get_api_token();
    Self::with_base_url(
      &config.api.base_url,
      registry,
      token.as_deref(),
      config.api.connect_timeout(),
    )
  }

  pub fn with_base_url(
    base_url: &str,
    registry: Arc<DatasetRegistry>,
    token: Option<&str>,
    connect_timeout: Duration,
  ) -> Result<Self> {
    // Keep any path prefix of the base when joining endpoint paths onto it
    let normalized = format!("{}/", base_url.trim_end_matches('/'));
    let base_url = Url::parse(&normalized)
      .map_err(|e| eyre!("Invalid API base url {}: {}", base_url, e))?;

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if let Some(token) = token {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| eyre!("Invalid API token: {}", e))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .connect_timeout(connect_timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      registry,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
    self.base_url.join(path.trim_start_matches('/'))
  }
}

impl Upstream for HttpUpstream {
  async fn fetch(&self, key: &str) -> Result<Value, FetchError> {
    let dataset = self
      .registry
      .get(key)
      .ok_or_else(|| FetchError::UnknownDataset(key.to_string()))?;
    let url = self.endpoint(&dataset.path)?;

    debug!(key, %url, "fetching dataset");
    let response = self.client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(FetchError::Status {
        status: status.as_u16(),
        message: ApiErrorBody::message_from(&body, status.as_u16()),
      });
    }

    Ok(response.json::<Value>().await?)
  }

  async fn write(&self, mutation: &Mutation) -> Result<Value, WriteError> {
    let url = self.endpoint(&mutation.path)?;

    debug!(dataset = %mutation.dataset, kind = ?mutation.kind, %url, "sending write");
    let mut request = self.client.request(mutation.kind.method(), url);
    if let Some(body) = &mutation.body {
      request = request.json(body);
    }
    let response = request.send().await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
      return Err(WriteError::Validation {
        status: status.as_u16(),
        message: ApiErrorBody::message_from(&body, status.as_u16()),
      });
    }

    Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
  }
}
