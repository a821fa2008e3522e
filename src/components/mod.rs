//! Built-in components.

mod review_request;
mod signature;
mod signed_off;

use std::sync::Arc;

use crate::component::store_required;
use crate::dedup;
use crate::error::{ComponentError, Result};
use crate::github::{ApiConnector, PullRef, PullRequestEvent};
use crate::registry::ComponentRegistry;
use crate::storage::BucketMut;
use crate::types::{Delivery, Hook, Params};

pub use review_request::{extract_reviewers, ReviewRequest};
pub use signature::SignatureValidator;
pub use signed_off::{check_commit, SignOffProblem, SignedOffChecker};

pub const SIGNED_OFF_CHECKER: &str = "github-signed-off-checker";
pub const REVIEW_REQUEST: &str = "github-review-request";
pub const SIGNATURE_VALIDATOR: &str = "signature-validator";

/// Registers every built-in component type.
pub fn register_builtin(
    registry: &mut ComponentRegistry,
    connector: Arc<dyn ApiConnector>,
) -> Result<()> {
    registry.register(
        SIGNED_OFF_CHECKER,
        Arc::new(SignedOffChecker::new(connector.clone())),
    )?;
    registry.register(REVIEW_REQUEST, Arc::new(ReviewRequest::new(connector)))?;
    registry.register(SIGNATURE_VALIDATOR, Arc::new(SignatureValidator))?;
    Ok(())
}

// ─── Shared by the GitHub components ──────────────────────────────────────────

const OPTION_TOKEN: &str = "token";

/// Stores the API token and provisions the dedup log plus `extra` buckets.
fn init_with_token(
    hook: &Hook,
    params: &Params,
    ns: &mut BucketMut<'_>,
    extra: &[&str],
) -> Result<(), ComponentError> {
    store_required(hook, params, ns, OPTION_TOKEN)?;
    dedup::provision(ns)?;
    for name in extra {
        ns.create_bucket_if_not_exists(name)?;
    }
    Ok(())
}

/// Parses the delivery as a pull request event.
fn pull_request(delivery: &Delivery) -> Result<PullRef, ComponentError> {
    let event: PullRequestEvent = serde_json::from_slice(&delivery.body)?;
    event.pull_ref().ok_or(ComponentError::NotAPullRequest)
}
