//! Client for the authoritative remote dataset.
//!
//! The remote store is the system's source of truth once a batch is
//! committed. The client surface is deliberately thin and fallible:
//! list the names that exist, and commit an ordered batch as a unit.
//!
//! Failures are split into [`Error::StoreUnavailable`] (transient: network,
//! timeout, 5xx; safe to retry with the same batch, at-least-once) and
//! [`Error::CommitRejected`] (structural: the store refused the batch;
//! retrying without operator attention will not help).

use crate::buffer::CommitBatch;
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use larder_core::Recipe;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Fallible interface to the authoritative dataset.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All record names currently known to the remote store.
    async fn list_names(&self) -> Result<HashSet<String>>;

    /// Commit an ordered batch of records as a single operation.
    ///
    /// The store either durably accepts the whole batch or rejects it
    /// wholesale; partial acceptance is not a supported outcome. Must be
    /// safe to call again with the same batch after a
    /// [`Error::StoreUnavailable`] failure.
    async fn commit_batch(&self, batch: &CommitBatch) -> Result<()>;
}

/// One page of the remote name listing.
#[derive(Debug, Deserialize)]
struct NamesPage {
    names: Vec<String>,
    #[serde(default)]
    next: Option<String>,
}

/// Body of a batch commit request.
#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    records: Vec<&'a Recipe>,
}

/// HTTP client for a remote dataset API.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemoteStore {
    /// Create a client for the configured dataset endpoint.
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        tracing::info!(
            "Remote store client initialized: url={}, dataset={}, timeout={:?}",
            config.base_url,
            config.dataset,
            config.request_timeout
        );

        Ok(Self { client, config })
    }

    fn names_url(&self) -> String {
        format!(
            "{}/api/datasets/{}/names",
            self.config.base_url.trim_end_matches('/'),
            self.config.dataset
        )
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/api/datasets/{}/commit",
            self.config.base_url.trim_end_matches('/'),
            self.config.dataset
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Map a transport-level failure to the transient error kind.
fn transport_error(e: reqwest::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_names(&self) -> Result<HashSet<String>> {
        let mut names = HashSet::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut req = self.authorize(self.client.get(self.names_url()));
            if let Some(c) = &cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }

            let resp = req.send().await.map_err(transport_error)?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::StoreUnavailable(format!(
                    "name listing returned {status}"
                )));
            }

            let page: NamesPage = resp.json().await.map_err(transport_error)?;
            names.extend(page.names);

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        debug!("Remote store lists {} names", names.len());
        Ok(names)
    }

    async fn commit_batch(&self, batch: &CommitBatch) -> Result<()> {
        let body = CommitRequest {
            records: batch.entries.iter().map(|e| &e.recipe).collect(),
        };

        let resp = self
            .authorize(self.client.post(self.commit_url()))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(Error::CommitRejected(format!("{status}: {detail}")))
        } else {
            Err(Error::StoreUnavailable(format!("{status}: {detail}")))
        }
    }
}
