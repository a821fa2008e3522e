//! The contract every pluggable component implements.
//!
//! A registered component is a shared prototype: one value serves every hook
//! and every concurrent delivery. It must not keep mutable state of its own.
//! Everything it needs per call arrives as arguments, and everything it
//! persists goes through the [`BucketMut`] handle, which is scoped to the
//! namespace of one hook/component binding.

use async_trait::async_trait;

use crate::error::ComponentError;
use crate::storage::{BucketMut, BucketRef};
use crate::types::{Delivery, Hook, Outcome, Params};

#[async_trait]
pub trait Component: Send + Sync {
    /// Human-readable label.
    fn name(&self) -> &'static str;

    /// Identifier of the admin form used to configure this component.
    fn template(&self) -> &'static str;

    /// Current configuration, read from the binding namespace.
    fn params(&self, hook: &Hook, ns: BucketRef<'_>) -> Params;

    /// Validates and stores `params`, provisioning any sub-namespaces that
    /// `process` relies on. Runs inside a write transaction owned by the
    /// caller; returning an error discards everything written here.
    fn init(&self, hook: &Hook, params: &Params, ns: &mut BucketMut<'_>)
        -> Result<(), ComponentError>;

    /// Handles one delivery. Writes made through `ns` commit only if every
    /// component attached to the hook succeeds. Calls to remote services are
    /// not rolled back when the transaction aborts.
    async fn process(
        &self,
        hook: &Hook,
        delivery: &Delivery,
        ns: &mut BucketMut<'_>,
    ) -> Result<Outcome, ComponentError>;
}

/// Storage key of a configuration option inside a binding namespace.
pub fn option_key(hook: &Hook, option: &str) -> String {
    format!("{}-{}", hook.id, option)
}

/// Reads `options` for the edit form. Unset options map to an empty string.
pub fn read_options(hook: &Hook, ns: BucketRef<'_>, options: &[&str]) -> Params {
    options
        .iter()
        .map(|opt| {
            let value = ns
                .get(&option_key(hook, opt))
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            (opt.to_string(), value)
        })
        .collect()
}

/// Persists a mandatory option, failing when it is absent or blank.
pub fn store_required(
    hook: &Hook,
    params: &Params,
    ns: &mut BucketMut<'_>,
    option: &'static str,
) -> Result<String, ComponentError> {
    let value = params
        .get(option)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(ComponentError::MissingOption(option))?;
    ns.put(&option_key(hook, option), value)?;
    Ok(value.to_string())
}

/// Reads a stored option at processing time.
pub fn load_option(hook: &Hook, ns: &BucketMut<'_>, option: &str) -> Result<String, ComponentError> {
    ns.get(&option_key(hook, option))
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .ok_or(ComponentError::NotInitialized)
}
