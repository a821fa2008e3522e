use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;

use super::{ApiConnector, ApiError, GitHubApi, NewStatus, PullRef, RepositoryCommit};

const USER_AGENT: &str = concat!("nexus-hook-dispatcher/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: usize = 100;
/// The pull request commits endpoint stops returning results here.
const MAX_COMMITS: usize = 250;

/// Connects to the GitHub REST API (or a compatible server).
pub struct RestConnector {
    http: reqwest::Client,
    base_url: String,
}

impl RestConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ApiConnector for RestConnector {
    fn connect(&self, token: &str) -> Arc<dyn GitHubApi> {
        Arc::new(RestClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token: token.to_string(),
        })
    }
}

struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct CreatedComment {
    id: u64,
}

impl RestClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }
        Ok(resp)
    }
}

#[async_trait]
impl GitHubApi for RestClient {
    async fn list_commits(&self, pr: &PullRef) -> Result<Vec<RepositoryCommit>, ApiError> {
        let mut commits = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "/repos/{}/{}/pulls/{}/commits?per_page={PER_PAGE}&page={page}",
                pr.owner, pr.repo, pr.number
            );
            let resp = self.send(self.request(Method::GET, &path)).await?;
            let batch: Vec<RepositoryCommit> = resp
                .json()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            let len = batch.len();
            commits.extend(batch);
            if len < PER_PAGE || commits.len() >= MAX_COMMITS {
                break;
            }
            page += 1;
        }
        commits.truncate(MAX_COMMITS);
        Ok(commits)
    }

    async fn create_status(
        &self,
        pr: &PullRef,
        sha: &str,
        status: &NewStatus,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{}/{}/statuses/{sha}", pr.owner, pr.repo);
        self.send(self.request(Method::POST, &path).json(status))
            .await?;
        Ok(())
    }

    async fn create_comment(&self, pr: &PullRef, body: &str) -> Result<u64, ApiError> {
        let path = format!("/repos/{}/{}/issues/{}/comments", pr.owner, pr.repo, pr.number);
        let resp = self
            .send(
                self.request(Method::POST, &path)
                    .json(&serde_json::json!({ "body": body })),
            )
            .await?;
        let created: CreatedComment = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(created.id)
    }

    async fn edit_comment(&self, pr: &PullRef, comment_id: u64, body: &str) -> Result<(), ApiError> {
        let path = format!("/repos/{}/{}/issues/comments/{comment_id}", pr.owner, pr.repo);
        self.send(
            self.request(Method::PATCH, &path)
                .json(&serde_json::json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn delete_comment(&self, pr: &PullRef, comment_id: u64) -> Result<(), ApiError> {
        let path = format!("/repos/{}/{}/issues/comments/{comment_id}", pr.owner, pr.repo);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn request_reviewers(&self, pr: &PullRef, reviewers: &[String]) -> Result<(), ApiError> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/requested_reviewers",
            pr.owner, pr.repo, pr.number
        );
        self.send(
            self.request(Method::POST, &path)
                .json(&serde_json::json!({ "reviewers": reviewers })),
        )
        .await?;
        Ok(())
    }
}
