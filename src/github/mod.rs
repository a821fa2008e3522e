//! Port to the remote commit/PR API used by the built-in components.
//!
//! Components never talk HTTP directly. They ask an [`ApiConnector`] for a
//! client bound to the token stored in their namespace and call the
//! [`GitHubApi`] methods they need. Tests substitute their own connector.

mod rest;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use rest::RestConnector;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait GitHubApi: Send + Sync {
    async fn list_commits(&self, pr: &PullRef) -> Result<Vec<RepositoryCommit>, ApiError>;
    async fn create_status(&self, pr: &PullRef, sha: &str, status: &NewStatus)
        -> Result<(), ApiError>;
    /// Returns the id of the new comment.
    async fn create_comment(&self, pr: &PullRef, body: &str) -> Result<u64, ApiError>;
    async fn edit_comment(&self, pr: &PullRef, comment_id: u64, body: &str)
        -> Result<(), ApiError>;
    async fn delete_comment(&self, pr: &PullRef, comment_id: u64) -> Result<(), ApiError>;
    async fn request_reviewers(&self, pr: &PullRef, reviewers: &[String])
        -> Result<(), ApiError>;
}

/// Builds API clients. A client carries one token and lives for one
/// `process` call.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, token: &str) -> Arc<dyn GitHubApi>;
}

// ─── Wire types ───────────────────────────────────────────────────────────────

/// Repository and number of one pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRef {
    /// Storage key for per-pull-request state.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.owner, self.repo, self.number)
    }
}

/// The subset of a `pull_request` webhook event the components read.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub base: PullRequestBase,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestBase {
    pub repo: Repository,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
}

impl PullRequestEvent {
    /// Target of the event, or `None` when the payload carries no pull
    /// request.
    pub fn pull_ref(&self) -> Option<PullRef> {
        let pr = self.pull_request.as_ref()?;
        Some(PullRef {
            owner: pr.base.repo.owner.login.clone(),
            repo: pr.base.repo.name.clone(),
            number: self.number.unwrap_or(pr.number),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryCommit {
    pub sha: String,
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    #[serde(default)]
    pub author: Option<GitIdentity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Error,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStatus {
    pub state: StatusState,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    pub description: String,
}
