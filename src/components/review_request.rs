use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::{init_with_token, pull_request, OPTION_TOKEN};
use crate::component::{load_option, read_options, Component};
use crate::dedup;
use crate::error::ComponentError;
use crate::github::{ApiConnector, RepositoryCommit};
use crate::storage::{BucketMut, BucketRef};
use crate::types::{Delivery, Hook, Outcome, Params};

static REVIEWER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bR=([[:alnum:]](?:[[:alnum:]-]*[[:alnum:]])?)").expect("valid reviewer pattern")
});

/// Reviewer logins named by `R=<login>` tokens, in order of first
/// appearance and without repeats.
pub fn extract_reviewers(commits: &[RepositoryCommit]) -> Vec<String> {
    let mut seen = HashSet::new();
    commits
        .iter()
        .flat_map(|c| REVIEWER.captures_iter(&c.commit.message))
        .map(|cap| cap[1].to_string())
        .filter(|login| seen.insert(login.clone()))
        .collect()
}

/// Requests reviews from everyone named with `R=<login>` in the pull
/// request's commit messages. A repeated delivery is a no-op.
pub struct ReviewRequest {
    connector: Arc<dyn ApiConnector>,
}

impl ReviewRequest {
    pub fn new(connector: Arc<dyn ApiConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Component for ReviewRequest {
    fn name(&self) -> &'static str {
        "GitHub Review Request"
    }

    fn template(&self) -> &'static str {
        super::REVIEW_REQUEST
    }

    fn params(&self, hook: &Hook, ns: BucketRef<'_>) -> Params {
        read_options(hook, ns, &[OPTION_TOKEN])
    }

    fn init(
        &self,
        hook: &Hook,
        params: &Params,
        ns: &mut BucketMut<'_>,
    ) -> Result<(), ComponentError> {
        init_with_token(hook, params, ns, &[])
    }

    async fn process(
        &self,
        hook: &Hook,
        delivery: &Delivery,
        ns: &mut BucketMut<'_>,
    ) -> Result<Outcome, ComponentError> {
        let id = dedup::delivery_id(delivery)?;
        if dedup::is_duplicate(ns, id)? {
            tracing::debug!(delivery = %id, "reviewers already requested");
            return Ok(Outcome::Duplicate);
        }
        let token = load_option(hook, ns, OPTION_TOKEN)?;
        let pr = pull_request(delivery)?;

        let api = self.connector.connect(&token);
        let commits = api.list_commits(&pr).await?;
        let reviewers = extract_reviewers(&commits);
        if reviewers.is_empty() {
            tracing::debug!(pr = %pr.key(), "no reviewers named in commits");
        } else {
            tracing::info!(pr = %pr.key(), reviewers = ?reviewers, "requesting reviewers");
            api.request_reviewers(&pr, &reviewers).await?;
        }

        dedup::record(ns, id)?;
        Ok(Outcome::Processed)
    }
}
