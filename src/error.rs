//! Error types shared across the dispatcher.
//!
//! Storage failures, component failures and hook-level failures are kept
//! apart so the HTTP layer can map each one to a status code without
//! inspecting message text.

use crate::github::ApiError;

/// Failures of the embedded key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),
    /// A value was addressed as a bucket, or a bucket as a value.
    #[error("incompatible value at key: {0}")]
    IncompatibleValue(String),
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures reported by a component's `init` or `process`.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    #[error("{0} is required")]
    MissingOption(&'static str),
    #[error("invalid option {option}: {reason}")]
    InvalidOption { option: &'static str, reason: String },
    #[error("component not initialized")]
    NotInitialized,
    #[error("delivery has no identifier")]
    MissingDeliveryId,
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("not a pull request")]
    NotAPullRequest,
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<serde_json::Error> for ComponentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

/// Hook-level failures surfaced by the hook store and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hook not found: {0}")]
    HookNotFound(String),
    #[error("hook already exists: {0}")]
    HookExists(String),
    #[error("unknown component type: {0}")]
    UnknownComponent(String),
    #[error("component type registered twice: {0}")]
    DuplicateComponent(String),
    #[error("component {component} already attached to hook {hook_id}")]
    ComponentAlreadyAttached { hook_id: String, component: String },
    #[error("component {component} is not attached to hook {hook_id}")]
    ComponentNotAttached { hook_id: String, component: String },
    #[error("component {component}: {source}")]
    Component {
        component: String,
        #[source]
        source: ComponentError,
    },
    #[error("corrupt hook record {id}: {source}")]
    CorruptRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl Error {
    pub(crate) fn component(component: impl Into<String>, source: ComponentError) -> Self {
        Self::Component {
            component: component.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
