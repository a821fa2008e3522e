use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the sender's delivery identifier unless configured
/// otherwise.
pub const DEFAULT_DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// Component configuration: option name to value.
pub type Params = BTreeMap<String, String>;

/// One inbound webhook endpoint and its ordered component chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub id: String,
    pub name: String,
    /// Attached component types, in execution order.
    #[serde(default)]
    pub components: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Hook {
    /// A new hook with a generated identifier and no components.
    pub fn new(name: impl Into<String>) -> Self {
        let id = format!("wh_{}", &Uuid::new_v4().simple().to_string()[..8]);
        Self::with_id(id, name)
    }

    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            components: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// One inbound request. Only its identifier is ever persisted.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub received_at: DateTime<Utc>,
}

impl Delivery {
    /// Builds a delivery, reading its identifier from `id_header`.
    pub fn from_request(id_header: &str, headers: HeaderMap, body: Bytes) -> Self {
        let id = headers
            .get(id_header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            id,
            headers,
            body,
            received_at: Utc::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Result of one component processing one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Processed,
    /// The delivery identifier was already recorded; nothing was done.
    Duplicate,
}
