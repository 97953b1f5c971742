//! HTTP client for the alignment server.
//!
//! All server traffic goes through the [`RemoteApi`] trait so the sync
//! engine can be driven against an in-memory fake in tests. [`HttpRemote`]
//! is the production implementation over `reqwest`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use concord_engine::{AlignmentLink, JournalEntryView, ProjectId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

/// A project as described by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDescriptor {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub corpora: Vec<CorpusDescriptor>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One text within a project (a source or target document).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// A single word token with its raw (possibly side-prefixed) reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    /// Raw reference string, side marker included if the server uses one
    pub id: String,
    pub corpus_id: String,
    pub text: String,
}

/// Paged token listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokensResponse {
    pub tokens: Vec<TokenRecord>,
}

/// Full link dump for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksResponse {
    pub links: Vec<AlignmentLink>,
}

/// Server acknowledgement for a pushed journal page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    /// Ids of the journal entries the server accepted
    pub accepted: Vec<String>,
    pub server_time: Option<DateTime<Utc>>,
}

/// The server operations the sync engine needs.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Fetch a project descriptor, or `None` if the server doesn't know it.
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectDescriptor>>;

    /// List every project visible to this client.
    async fn list_projects(&self) -> Result<Vec<ProjectDescriptor>>;

    /// Fetch all tokens for one side of a project.
    async fn get_tokens(&self, project_id: &str, side: &str) -> Result<Vec<TokenRecord>>;

    /// Fetch the project's full set of alignment links.
    async fn get_links(&self, project_id: &str) -> Result<Vec<AlignmentLink>>;

    /// Push one page of journal entries; returns the server's receipt.
    async fn push_journal(
        &self,
        project_id: &str,
        entries: &[JournalEntryView],
    ) -> Result<PushReceipt>;
}

/// Production [`RemoteApi`] over HTTP.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn get_project(&self, project_id: &str) -> Result<Option<ProjectDescriptor>> {
        let url = self.url(&format!("/api/projects/{project_id}"));
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json().await?))
    }

    async fn list_projects(&self) -> Result<Vec<ProjectDescriptor>> {
        #[derive(Deserialize)]
        struct ProjectsResponse {
            projects: Vec<ProjectDescriptor>,
        }
        let body: ProjectsResponse = self.get_json("/api/projects").await?;
        Ok(body.projects)
    }

    async fn get_tokens(&self, project_id: &str, side: &str) -> Result<Vec<TokenRecord>> {
        let body: TokensResponse = self
            .get_json(&format!("/api/projects/{project_id}/tokens?side={side}"))
            .await?;
        Ok(body.tokens)
    }

    async fn get_links(&self, project_id: &str) -> Result<Vec<AlignmentLink>> {
        let body: LinksResponse = self
            .get_json(&format!("/api/projects/{project_id}/alignment_links"))
            .await?;
        Ok(body.links)
    }

    async fn push_journal(
        &self,
        project_id: &str,
        entries: &[JournalEntryView],
    ) -> Result<PushReceipt> {
        let url = self.url(&format!("/api/projects/{project_id}/journal"));
        debug!(%url, count = entries.len(), "POST journal page");
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "entries": entries }))
            .send()
            .await?
            .error_for_status()?;
        let receipt: PushReceipt = response.json().await?;
        if receipt.accepted.len() > entries.len() {
            return Err(SyncError::InvalidResponse(format!(
                "server acknowledged {} entries but only {} were sent",
                receipt.accepted.len(),
                entries.len()
            )));
        }
        Ok(receipt)
    }
}
