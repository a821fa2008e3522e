//! Checks that every commit of a pull request carries a `Signed-off-by`
//! trailer matching the commit author, and reports the result as a commit
//! status plus, on failure, one consolidated pull request comment.

use std::fmt;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;

use super::{init_with_token, pull_request, OPTION_TOKEN};
use crate::component::{load_option, read_options, Component};
use crate::dedup;
use crate::error::ComponentError;
use crate::github::{
    ApiConnector, ApiError, GitHubApi, NewStatus, PullRef, RepositoryCommit, StatusState,
};
use crate::storage::{BucketMut, BucketRef};
use crate::types::{Delivery, Hook, Outcome, Params};

/// Pull request key -> id of the failure comment we posted.
const ISSUED_COMMENTS: &str = "signed-off-comments";
const STATUS_CONTEXT: &str = "signed-off-by.me";
const STATUS_TARGET: &str = "http://signed-off-by.me/";

static SIGN_OFF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Signed-off-by: (.* <.*>)").expect("valid sign-off pattern"));
static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*"?([^"<]*?)"?\s*<([^<>@\s]+@[^<>@\s]+)>\s*$"#).expect("valid address pattern")
});

/// Why one commit failed the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOffProblem {
    Missing { author: String, sha: String },
    Malformed { author: String, sha: String },
    NameMismatch { sha: String },
    EmailMismatch { sha: String },
}

impl fmt::Display for SignOffProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { author, sha } => write!(f, "{author} has not signed off {sha}."),
            Self::Malformed { author, sha } => {
                write!(f, "{author} has a malformed sign-off in {sha}.")
            }
            Self::NameMismatch { sha } => {
                write!(f, "Commit {sha}: author name and sign-off name differ.")
            }
            Self::EmailMismatch { sha } => {
                write!(f, "Commit {sha}: author email and sign-off address differ.")
            }
        }
    }
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(7).collect()
}

/// Checks the first `Signed-off-by` trailer of one commit against its
/// recorded author.
pub fn check_commit(c: &RepositoryCommit) -> Result<(), SignOffProblem> {
    let author = c.commit.author.as_ref();
    let author_name = author.map(|a| a.name.as_str()).unwrap_or("unknown author");
    let sha = short_sha(&c.sha);

    let Some(captures) = SIGN_OFF.captures(&c.commit.message) else {
        return Err(SignOffProblem::Missing {
            author: author_name.to_string(),
            sha,
        });
    };
    let Some(address) = ADDRESS.captures(&captures[1]) else {
        return Err(SignOffProblem::Malformed {
            author: author_name.to_string(),
            sha,
        });
    };

    let (signed_name, signed_email) = (address[1].trim(), &address[2]);
    let Some(author) = author else {
        return Err(SignOffProblem::NameMismatch { sha });
    };
    if author.name != signed_name {
        return Err(SignOffProblem::NameMismatch { sha });
    }
    if author.email != signed_email {
        return Err(SignOffProblem::EmailMismatch { sha });
    }
    Ok(())
}

fn failure_comment(failures: &[(&RepositoryCommit, SignOffProblem)]) -> String {
    let shas: Vec<&str> = failures.iter().map(|(c, _)| c.sha.as_str()).collect();
    let mut body = match shas.split_last() {
        Some((last, [])) => format!("Commit {last} is not signed off."),
        Some((last, rest)) => format!("Commits {} and {last} are not signed off.", rest.join(", ")),
        None => String::new(),
    };
    body.push_str("\n\nPlease fix the following:\n\n");
    for (i, (_, problem)) in failures.iter().enumerate() {
        body.push_str(&format!(">\t{}. {problem}\n", i + 1));
    }
    body.push_str(
        "\n\nSee [signed-off-by.me](https://signed-off-by.me) for how to sign off commits.",
    );
    body
}

fn status(state: StatusState, description: &str) -> NewStatus {
    NewStatus {
        state,
        context: STATUS_CONTEXT.to_string(),
        target_url: Some(STATUS_TARGET.to_string()),
        description: description.to_string(),
    }
}

fn tracked_comment(ns: &BucketMut<'_>, key: &str) -> Result<Option<u64>, ComponentError> {
    let issued = ns
        .bucket(ISSUED_COMMENTS)
        .ok_or(ComponentError::NotInitialized)?;
    Ok(issued
        .get(key)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse().ok()))
}

pub struct SignedOffChecker {
    connector: Arc<dyn ApiConnector>,
}

impl SignedOffChecker {
    pub fn new(connector: Arc<dyn ApiConnector>) -> Self {
        Self { connector }
    }

    /// Edits the comment already posted on this pull request, or posts a new
    /// one when there is none or the edit fails.
    async fn leave_comment(
        &self,
        api: &dyn GitHubApi,
        pr: &PullRef,
        body: &str,
        ns: &mut BucketMut<'_>,
    ) -> Result<(), ComponentError> {
        let key = pr.key();
        if let Some(comment_id) = tracked_comment(ns, &key)? {
            match api.edit_comment(pr, comment_id, body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(pr = %key, comment_id, error = %e, "could not edit tracked comment, posting a new one");
                }
            }
        }
        let comment_id = api.create_comment(pr, body).await?;
        ns.bucket_mut(ISSUED_COMMENTS)?
            .put(&key, comment_id.to_string())?;
        Ok(())
    }

    /// Deletes the failure comment once every commit passes.
    async fn clear_comment(
        &self,
        api: &dyn GitHubApi,
        pr: &PullRef,
        ns: &mut BucketMut<'_>,
    ) -> Result<(), ComponentError> {
        let key = pr.key();
        let Some(comment_id) = tracked_comment(ns, &key)? else {
            return Ok(());
        };
        match api.delete_comment(pr, comment_id).await {
            Ok(()) | Err(ApiError::Status { status: 404, .. }) => {}
            Err(e) => return Err(e.into()),
        }
        ns.bucket_mut(ISSUED_COMMENTS)?.delete(&key)?;
        Ok(())
    }
}

#[async_trait]
impl Component for SignedOffChecker {
    fn name(&self) -> &'static str {
        "GitHub Signed-off Checker"
    }

    fn template(&self) -> &'static str {
        super::SIGNED_OFF_CHECKER
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
        init_with_token(hook, params, ns, &[ISSUED_COMMENTS])
    }

    async fn process(
        &self,
        hook: &Hook,
        delivery: &Delivery,
        ns: &mut BucketMut<'_>,
    ) -> Result<Outcome, ComponentError> {
        let id = dedup::delivery_id(delivery)?;
        if dedup::is_duplicate(ns, id)? {
            tracing::debug!(delivery = %id, "delivery already checked");
            return Ok(Outcome::Duplicate);
        }
        let token = load_option(hook, ns, OPTION_TOKEN)?;
        let pr = pull_request(delivery)?;

        let api = self.connector.connect(&token);
        let commits = api.list_commits(&pr).await?;
        let Some(last) = commits.last() else {
            return Err(ComponentError::Payload(format!(
                "pull request {} has no commits",
                pr.key()
            )));
        };

        let failures: Vec<(&RepositoryCommit, SignOffProblem)> = commits
            .iter()
            .filter_map(|c| check_commit(c).err().map(|p| (c, p)))
            .collect();

        if failures.is_empty() {
            api.create_status(
                &pr,
                &last.sha,
                &status(StatusState::Success, "All commits are signed off."),
            )
            .await?;
            self.clear_comment(api.as_ref(), &pr, ns).await?;
        } else {
            tracing::info!(pr = %pr.key(), failing = failures.len(), "commits missing sign-off");
            api.create_status(
                &pr,
                &last.sha,
                &status(
                    StatusState::Error,
                    "All commits must be signed off by their authors.",
                ),
            )
            .await?;
            let body = failure_comment(&failures);
            self.leave_comment(api.as_ref(), &pr, &body, ns).await?;
        }

        dedup::record(ns, id)?;
        Ok(Outcome::Processed)
    }
}
