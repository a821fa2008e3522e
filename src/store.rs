use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{Error, Result, StoreError};
use crate::registry::ComponentRegistry;
use crate::storage::{BucketMut, BucketRef, Db, WriteTx};
use crate::types::{Hook, Params};

pub const BUCKET_HOOKS: &str = "hooks";
pub const BUCKET_COMPONENTS: &str = "components";
pub const BUCKET_STATS: &str = "stats";

const STAT_RECEIVED: &str = "received";
const STAT_COMMITTED: &str = "committed";
const STAT_ABORTED: &str = "aborted";
const STAT_LAST_DELIVERY: &str = "last-delivery";

/// Delivery counters for one hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HookStats {
    pub received: u64,
    pub committed: u64,
    pub aborted: u64,
    pub last_delivery: Option<String>,
}

/// Persists hooks and their component bindings.
///
/// ```text
/// hooks/<hook id>                 -> Hook JSON
/// components/<hook id>/<type>/    -> binding namespace owned by the component
/// stats/<hook id>/                -> delivery counters
/// ```
#[derive(Clone)]
pub struct HookStore {
    db: Db,
    registry: Arc<ComponentRegistry>,
}

impl HookStore {
    /// Wraps `db`, creating the top-level buckets if they are missing.
    pub async fn open(db: Db, registry: Arc<ComponentRegistry>) -> Result<Self> {
        let mut tx = db.begin_write().await;
        for name in [BUCKET_HOOKS, BUCKET_COMPONENTS, BUCKET_STATS] {
            tx.create_bucket_if_not_exists(name)?;
        }
        tx.commit().await?;
        Ok(Self { db, registry })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn get(&self, id: &str) -> Result<Hook> {
        let tx = self.db.read();
        load_hook(top_level(tx.root(), BUCKET_HOOKS)?, id)
    }

    /// All hooks, oldest first.
    pub fn list(&self) -> Result<Vec<Hook>> {
        let tx = self.db.read();
        let hooks = top_level(tx.root(), BUCKET_HOOKS)?;
        let mut items = hooks
            .values()
            .map(|(id, raw)| decode_hook(id, raw))
            .collect::<Result<Vec<_>>>()?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    pub async fn create(&self, hook: &Hook) -> Result<()> {
        let mut tx = self.db.begin_write().await;
        let mut hooks = tx.bucket_mut(BUCKET_HOOKS)?;
        if hooks.contains(&hook.id) {
            return Err(Error::HookExists(hook.id.clone()));
        }
        put_hook(&mut hooks, hook)?;
        tx.commit().await?;
        tracing::info!(hook = %hook.id, name = %hook.name, "created hook");
        Ok(())
    }

    /// Replaces the hook's display attributes. The component chain only
    /// changes through [`attach_component`](Self::attach_component).
    pub async fn update(&self, hook: &Hook) -> Result<Hook> {
        let mut tx = self.db.begin_write().await;
        let mut hooks = tx.bucket_mut(BUCKET_HOOKS)?;
        let mut stored = load_hook(hooks.reader(), &hook.id)?;
        stored.name = hook.name.clone();
        put_hook(&mut hooks, &stored)?;
        tx.commit().await?;
        Ok(stored)
    }

    /// Attached component types in execution order.
    pub fn list_components(&self, hook_id: &str) -> Result<Vec<String>> {
        Ok(self.get(hook_id)?.components)
    }

    /// Attaches a component to a hook, running its `init` in the same
    /// transaction that records the attachment. Nothing persists if `init`
    /// fails.
    pub async fn attach_component(
        &self,
        hook_id: &str,
        type_name: &str,
        params: &Params,
    ) -> Result<Hook> {
        let component = self.registry.lookup(type_name)?;
        let mut tx = self.db.begin_write().await;
        let mut hook = load_hook(top_level(tx.root(), BUCKET_HOOKS)?, hook_id)?;
        if hook.components.iter().any(|c| c == type_name) {
            return Err(Error::ComponentAlreadyAttached {
                hook_id: hook.id,
                component: type_name.to_string(),
            });
        }

        {
            let mut ns = binding_mut(&mut tx, &hook.id, type_name, true)?;
            component
                .init(&hook, params, &mut ns)
                .map_err(|e| Error::component(type_name, e))?;
        }

        hook.components.push(type_name.to_string());
        put_hook(&mut tx.bucket_mut(BUCKET_HOOKS)?, &hook)?;
        tx.commit().await?;
        tracing::info!(hook = %hook.id, component = %type_name, "attached component");
        Ok(hook)
    }

    /// Re-runs `init` for an attached component with new parameters.
    pub async fn update_component(
        &self,
        hook_id: &str,
        type_name: &str,
        params: &Params,
    ) -> Result<()> {
        let component = self.registry.lookup(type_name)?;
        let mut tx = self.db.begin_write().await;
        let hook = load_hook(top_level(tx.root(), BUCKET_HOOKS)?, hook_id)?;
        ensure_attached(&hook, type_name)?;

        {
            let mut ns = binding_mut(&mut tx, &hook.id, type_name, true)?;
            component
                .init(&hook, params, &mut ns)
                .map_err(|e| Error::component(type_name, e))?;
        }

        tx.commit().await?;
        tracing::info!(hook = %hook.id, component = %type_name, "updated component");
        Ok(())
    }

    /// Current configuration of an attached component.
    pub fn component_params(&self, hook_id: &str, type_name: &str) -> Result<Params> {
        let component = self.registry.lookup(type_name)?;
        let tx = self.db.read();
        let hook = load_hook(top_level(tx.root(), BUCKET_HOOKS)?, hook_id)?;
        ensure_attached(&hook, type_name)?;
        let ns = top_level(tx.root(), BUCKET_COMPONENTS)?
            .bucket(&hook.id)
            .and_then(|b| b.bucket(type_name))
            .ok_or_else(|| StoreError::BucketNotFound(format!("{}/{}", hook.id, type_name)))?;
        Ok(component.params(&hook, ns))
    }

    /// Bumps the delivery counters of a resolved hook in a transaction of
    /// its own. Committed deliveries update theirs inside the delivery
    /// transaction instead.
    pub async fn record_outcome(&self, hook_id: &str, committed: bool) -> Result<()> {
        let mut tx = self.db.begin_write().await;
        record_delivery(&mut tx, hook_id, committed)?;
        tx.commit().await?;
        Ok(())
    }

    pub fn stats(&self, hook_id: &str) -> Result<HookStats> {
        let tx = self.db.read();
        load_hook(top_level(tx.root(), BUCKET_HOOKS)?, hook_id)?;
        let Some(stats) = top_level(tx.root(), BUCKET_STATS)?.bucket(hook_id) else {
            return Ok(HookStats::default());
        };
        Ok(HookStats {
            received: counter(stats, STAT_RECEIVED),
            committed: counter(stats, STAT_COMMITTED),
            aborted: counter(stats, STAT_ABORTED),
            last_delivery: stats
                .get(STAT_LAST_DELIVERY)
                .map(|v| String::from_utf8_lossy(v).into_owned()),
        })
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn top_level<'a>(root: BucketRef<'a>, name: &str) -> Result<BucketRef<'a>, StoreError> {
    root.bucket(name)
        .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))
}

/// Loads a hook as seen by an open write transaction.
pub(crate) fn load_hook_in(tx: &WriteTx, id: &str) -> Result<Hook> {
    load_hook(top_level(tx.root(), BUCKET_HOOKS)?, id)
}

/// Updates the delivery counters of `hook_id` inside `tx`.
pub(crate) fn record_delivery(
    tx: &mut WriteTx,
    hook_id: &str,
    committed: bool,
) -> Result<(), StoreError> {
    let mut stats = tx
        .bucket_mut(BUCKET_STATS)?
        .into_created_bucket(hook_id)?;
    increment(&mut stats, STAT_RECEIVED)?;
    increment(
        &mut stats,
        if committed { STAT_COMMITTED } else { STAT_ABORTED },
    )?;
    stats.put(STAT_LAST_DELIVERY, Utc::now().to_rfc3339())
}

/// Handle to the namespace of one hook/component binding.
pub(crate) fn binding_mut<'a>(
    tx: &'a mut WriteTx,
    hook_id: &str,
    type_name: &str,
    create: bool,
) -> Result<BucketMut<'a>, StoreError> {
    let components = tx.bucket_mut(BUCKET_COMPONENTS)?;
    if create {
        components
            .into_created_bucket(hook_id)?
            .into_created_bucket(type_name)
    } else {
        components
            .into_bucket_mut(hook_id)?
            .into_bucket_mut(type_name)
    }
}

fn ensure_attached(hook: &Hook, type_name: &str) -> Result<()> {
    if hook.components.iter().any(|c| c == type_name) {
        Ok(())
    } else {
        Err(Error::ComponentNotAttached {
            hook_id: hook.id.clone(),
            component: type_name.to_string(),
        })
    }
}

pub(crate) fn load_hook(hooks: BucketRef<'_>, id: &str) -> Result<Hook> {
    let raw = hooks
        .get(id)
        .ok_or_else(|| Error::HookNotFound(id.to_string()))?;
    decode_hook(id, raw)
}

fn decode_hook(id: &str, raw: &[u8]) -> Result<Hook> {
    serde_json::from_slice(raw).map_err(|source| Error::CorruptRecord {
        id: id.to_string(),
        source,
    })
}

fn put_hook(hooks: &mut BucketMut<'_>, hook: &Hook) -> Result<()> {
    let raw = serde_json::to_vec(hook).map_err(StoreError::from)?;
    hooks.put(&hook.id, raw)?;
    Ok(())
}

fn counter(stats: BucketRef<'_>, key: &str) -> u64 {
    stats
        .get(key)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn increment(stats: &mut BucketMut<'_>, key: &str) -> Result<(), StoreError> {
    let next = counter(stats.reader(), key) + 1;
    stats.put(key, next.to_string())
}
