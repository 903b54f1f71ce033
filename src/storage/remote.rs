// src/storage/remote.rs
// Remote replicated key/value store reached over HTTP (`{base}/{path}.json`).

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{ChainStore, StorageError, CHAIN_KEY, NODES_KEY};
use crate::ledger::ChainSnapshot;
use crate::registry::RegistryExport;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRY_ELAPSED: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct HttpKvStore {
    client: reqwest::Client,
    base_url: String,
    max_retry_elapsed: Duration,
}

/// Client errors other than 408/429 are not worth retrying.
fn classify(err: reqwest::Error) -> backoff::Error<reqwest::Error> {
    match err.status() {
        Some(s)
            if s.is_client_error()
                && s != StatusCode::REQUEST_TIMEOUT
                && s != StatusCode::TOO_MANY_REQUESTS =>
        {
            backoff::Error::permanent(err)
        }
        _ => backoff::Error::transient(err),
    }
}

impl HttpKvStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retry_elapsed: DEFAULT_MAX_RETRY_ELAPSED,
        })
    }

    pub fn with_max_retry_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_retry_elapsed = elapsed;
        self
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn policy(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.max_retry_elapsed),
            ..ExponentialBackoff::default()
        }
    }

    async fn put_json<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<(), StorageError> {
        let body = serde_json::to_value(value)?;
        let url = self.url_for(path);
        let (client, url, body) = (&self.client, &url, &body);
        retry(self.policy(), || async move {
            client
                .put(url)
                .json(body)
                .send()
                .await
                .map_err(backoff::Error::transient)?
                .error_for_status()
                .map_err(classify)?;
            Ok::<(), backoff::Error<reqwest::Error>>(())
        })
        .await?;
        tracing::debug!(%url, "remote store write ok");
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StorageError> {
        let url = self.url_for(path);
        let (client, url) = (&self.client, &url);
        let value: Option<Value> = retry(self.policy(), || async move {
            let resp = client
                .get(url)
                .send()
                .await
                .map_err(backoff::Error::transient)?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok::<Option<Value>, backoff::Error<reqwest::Error>>(None);
            }
            let resp = resp.error_for_status().map_err(classify)?;
            let value: Value = resp.json().await.map_err(backoff::Error::permanent)?;
            Ok::<Option<Value>, backoff::Error<reqwest::Error>>(Some(value))
        })
        .await?;

        match value {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
        }
    }
}

#[async_trait]
impl ChainStore for HttpKvStore {
    fn name(&self) -> &str {
        "remote"
    }

    async fn save_blockchain(&self, snapshot: &ChainSnapshot) -> Result<(), StorageError> {
        self.put_json(CHAIN_KEY, snapshot).await
    }

    async fn load_blockchain(&self) -> Result<Option<ChainSnapshot>, StorageError> {
        self.get_json(CHAIN_KEY).await
    }

    async fn save_nodes(&self, nodes: &RegistryExport) -> Result<(), StorageError> {
        self.put_json(NODES_KEY, nodes).await
    }

    async fn load_nodes(&self) -> Result<Option<RegistryExport>, StorageError> {
        self.get_json(NODES_KEY).await
    }
}
