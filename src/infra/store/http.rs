//! HTTP cache store
//!
//! Talks to a remote cache server:
//!
//! | Request                       | Meaning                                   |
//! |-------------------------------|-------------------------------------------|
//! | `GET /v1/entries/{recipe}`    | 200 + entry JSON, 404 when absent         |
//! | `PUT /v1/entries/{recipe}`    | 201 stored, 200/204/409 already present   |
//! | `DELETE /v1/entries`          | drop every entry                          |
//! | `GET`/`PUT /v1/toolchain`     | toolchain stamp as plain text             |
//!
//! Connection failures, timeouts and 5xx responses are reported as
//! [`StoreError::Unavailable`].

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::{CacheStore, PutOutcome};
use crate::config::defaults;
use crate::core::cache::CacheEntry;
use crate::core::fingerprint::{Recipe, ToolchainVersion};
use crate::error::StoreError;

const BACKEND: &str = "http";

/// Cache store backed by a remote HTTP server
#[derive(Debug, Clone)]
pub struct HttpStore {
    /// HTTP client
    client: reqwest::Client,
    /// Base URL without trailing slash
    base_url: String,
}

impl HttpStore {
    /// Create a store with the default request timeout
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Self::with_timeout(
            base_url,
            Duration::from_millis(defaults::CACHE_TIMEOUT_MS),
        )
    }

    /// Create a store whose requests give up after `timeout`
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = base_url.trim_end_matches('/');
        let url = reqwest::Url::parse(base_url)
            .map_err(|e| misconfigured(format!("'{base_url}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(misconfigured(format!("'{base_url}' is not an http(s) URL")));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| misconfigured(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn entry_url(&self, recipe: &Recipe) -> String {
        format!("{}/v1/entries/{recipe}", self.base_url)
    }

    fn stamp_url(&self) -> String {
        format!("{}/v1/toolchain", self.base_url)
    }
}

#[async_trait]
impl CacheStore for HttpStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, recipe: &Recipe) -> Result<Option<CacheEntry>, StoreError> {
        let url = self.entry_url(recipe);
        let response = self.client.get(&url).send().await.map_err(network)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let entry: CacheEntry =
                    response.json().await.map_err(|e| StoreError::Corrupt {
                        key: recipe.to_string(),
                        reason: e.to_string(),
                    })?;
                if entry.recipe != *recipe {
                    return Err(StoreError::Corrupt {
                        key: recipe.to_string(),
                        reason: format!("server returned recipe {}", entry.recipe),
                    });
                }
                Ok(Some(entry))
            }
            status => Err(bad_status(&url, status)),
        }
    }

    async fn put(&self, entry: &CacheEntry) -> Result<PutOutcome, StoreError> {
        let url = self.entry_url(&entry.recipe);
        let response = self
            .client
            .put(&url)
            .json(entry)
            .send()
            .await
            .map_err(network)?;

        match response.status() {
            StatusCode::CREATED => Ok(PutOutcome::Stored),
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::CONFLICT => {
                Ok(PutOutcome::AlreadyPresent)
            }
            status => Err(bad_status(&url, status)),
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let url = format!("{}/v1/entries", self.base_url);
        let response = self.client.delete(&url).send().await.map_err(network)?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(bad_status(&url, response.status()))
        }
    }

    async fn read_stamp(&self) -> Result<Option<ToolchainVersion>, StoreError> {
        let url = self.stamp_url();
        let response = self.client.get(&url).send().await.map_err(network)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let text = response.text().await.map_err(network)?;
                let stamp = text.trim();
                Ok((!stamp.is_empty()).then(|| ToolchainVersion::new(stamp)))
            }
            status => Err(bad_status(&url, status)),
        }
    }

    async fn write_stamp(&self, toolchain: &ToolchainVersion) -> Result<(), StoreError> {
        let url = self.stamp_url();
        let response = self
            .client
            .put(&url)
            .body(toolchain.to_string())
            .send()
            .await
            .map_err(network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(bad_status(&url, response.status()))
        }
    }
}

fn network(error: reqwest::Error) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND.to_string(),
        reason: error.to_string(),
    }
}

fn misconfigured(reason: String) -> StoreError {
    StoreError::Config {
        backend: BACKEND.to_string(),
        reason,
    }
}

fn bad_status(url: &str, status: StatusCode) -> StoreError {
    StoreError::Unavailable {
        backend: BACKEND.to_string(),
        reason: format!("{url} answered HTTP {status}"),
    }
}
