//! Runs one delivery through a hook's component chain.
//!
//! ```text
//! Received -> Resolved -> Dispatching -> Committed
//!        \          \            \
//!         +----------+------------+--> Aborted
//! ```
//!
//! All components of one delivery share a single write transaction and run
//! sequentially in attachment order. The first failure drops the
//! transaction, so no component's writes (dedup records included) survive a
//! failed delivery and the sender can retry it as a whole. A committed
//! delivery also updates the hook's stats in that same transaction.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::Instrument;

use crate::component::Component;
use crate::dedup;
use crate::error::{Error, Result};
use crate::storage::WriteTx;
use crate::store::{binding_mut, load_hook_in, record_delivery, HookStore};
use crate::types::{Delivery, Hook, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Resolved,
    Dispatching,
    Committed,
    Aborted,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Resolved => "resolved",
            Self::Dispatching => "dispatching",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentResult {
    pub component: String,
    pub outcome: Outcome,
}

/// What a committed delivery did, component by component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub hook_id: String,
    pub delivery_id: Option<String>,
    pub results: Vec<ComponentResult>,
}

impl DispatchReport {
    /// True when every component had already processed this delivery.
    pub fn is_duplicate(&self) -> bool {
        !self.results.is_empty()
            && self
                .results
                .iter()
                .all(|r| r.outcome == Outcome::Duplicate)
    }
}

/// Dedup records older than this are pruned unless configured otherwise.
pub const DEFAULT_DEDUP_RETENTION_DAYS: u32 = 30;

pub struct Dispatcher {
    hooks: HookStore,
    dedup_retention: Duration,
}

impl Dispatcher {
    pub fn new(hooks: HookStore) -> Self {
        Self {
            hooks,
            dedup_retention: Duration::days(i64::from(DEFAULT_DEDUP_RETENTION_DAYS)),
        }
    }

    /// How long dedup records are kept. Must exceed the sender's retry
    /// horizon.
    pub fn with_dedup_retention(mut self, retention: Duration) -> Self {
        self.dedup_retention = retention;
        self
    }

    pub fn hooks(&self) -> &HookStore {
        &self.hooks
    }

    /// Processes `delivery` for hook `hook_id`. `Ok` means the transaction
    /// committed; any `Err` means nothing was persisted.
    pub async fn dispatch(&self, hook_id: &str, delivery: &Delivery) -> Result<DispatchReport> {
        let span = tracing::info_span!(
            "dispatch",
            hook = %hook_id,
            delivery = delivery.id.as_deref().unwrap_or("-")
        );
        self.run(hook_id, delivery).instrument(span).await
    }

    async fn run(&self, hook_id: &str, delivery: &Delivery) -> Result<DispatchReport> {
        tracing::debug!(state = %DispatchState::Received);
        // Unknown hooks are turned away without queueing for the writer.
        if let Err(e) = self.hooks.get(hook_id) {
            tracing::warn!(state = %DispatchState::Aborted, error = %e, "could not resolve hook");
            return Err(e);
        }

        let mut tx = self.hooks.db().begin_write().await;
        let processed = self.process_chain(&mut tx, hook_id, delivery).await;
        let result = match processed {
            Ok(report) => {
                if let Err(e) = record_delivery(&mut tx, hook_id, true) {
                    tracing::warn!(error = %e, "could not update delivery stats");
                }
                tx.commit().await.map(|()| report).map_err(Error::from)
            }
            Err(e) => {
                drop(tx);
                Err(e)
            }
        };

        match &result {
            Ok(report) => {
                tracing::info!(state = %DispatchState::Committed, duplicate = report.is_duplicate(), "delivery processed");
            }
            Err(e) => {
                tracing::warn!(state = %DispatchState::Aborted, error = %e, "delivery aborted");
                if !matches!(e, Error::HookNotFound(_)) {
                    self.record_aborted(hook_id).await;
                }
            }
        }
        result
    }

    fn prototypes<'h>(&self, hook: &'h Hook) -> Result<Vec<(&'h str, Arc<dyn Component>)>> {
        hook.components
            .iter()
            .map(|t| Ok((t.as_str(), self.hooks.registry().lookup(t)?)))
            .collect()
    }

    /// Runs the chain inside `tx`. The hook is read through `tx` so the chain
    /// matches the state the components write against.
    async fn process_chain(
        &self,
        tx: &mut WriteTx,
        hook_id: &str,
        delivery: &Delivery,
    ) -> Result<DispatchReport> {
        let hook = load_hook_in(tx, hook_id)?;
        let chain = self.prototypes(&hook).inspect_err(|e| {
            tracing::error!(error = %e, "hook references an unregistered component");
        })?;
        tracing::debug!(state = %DispatchState::Resolved, components = chain.len());

        let mut report = DispatchReport {
            hook_id: hook.id.clone(),
            delivery_id: delivery.id.clone(),
            results: Vec::with_capacity(chain.len()),
        };
        let cutoff = delivery.received_at - self.dedup_retention;

        tracing::debug!(state = %DispatchState::Dispatching);
        for (type_name, component) in &chain {
            let mut ns = binding_mut(tx, &hook.id, type_name, false)?;
            let outcome = component
                .process(&hook, delivery, &mut ns)
                .await
                .map_err(|e| Error::component(*type_name, e))?;
            let pruned = dedup::prune(&mut ns, cutoff)?;
            tracing::debug!(component = %type_name, ?outcome, pruned, "component finished");
            report.results.push(ComponentResult {
                component: type_name.to_string(),
                outcome,
            });
        }
        Ok(report)
    }

    async fn record_aborted(&self, hook_id: &str) {
        if let Err(e) = self.hooks.record_outcome(hook_id, false).await {
            tracing::warn!(error = %e, "could not update delivery stats");
        }
    }
}
