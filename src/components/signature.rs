use async_trait::async_trait;

use crate::component::{load_option, read_options, store_required, Component};
use crate::dedup;
use crate::error::ComponentError;
use crate::storage::{BucketMut, BucketRef};
use crate::types::{Delivery, Hook, Outcome, Params};
use crate::verification::Scheme;

const OPTION_METHOD: &str = "method";
const OPTION_SECRET: &str = "secret";

/// Rejects deliveries whose signature does not match the configured secret
/// and replays of an identifier that was already accepted. Attach it first
/// so later components only see authentic deliveries.
pub struct SignatureValidator;

#[async_trait]
impl Component for SignatureValidator {
    fn name(&self) -> &'static str {
        "Signature Validator"
    }

    fn template(&self) -> &'static str {
        super::SIGNATURE_VALIDATOR
    }

    fn params(&self, hook: &Hook, ns: BucketRef<'_>) -> Params {
        read_options(hook, ns, &[OPTION_METHOD, OPTION_SECRET])
    }

    fn init(
        &self,
        hook: &Hook,
        params: &Params,
        ns: &mut BucketMut<'_>,
    ) -> Result<(), ComponentError> {
        let method = params
            .get(OPTION_METHOD)
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .ok_or(ComponentError::MissingOption(OPTION_METHOD))?;
        method
            .parse::<Scheme>()
            .map_err(|reason| ComponentError::InvalidOption {
                option: OPTION_METHOD,
                reason,
            })?;
        store_required(hook, params, ns, OPTION_METHOD)?;
        store_required(hook, params, ns, OPTION_SECRET)?;
        dedup::provision(ns)?;
        Ok(())
    }

    async fn process(
        &self,
        hook: &Hook,
        delivery: &Delivery,
        ns: &mut BucketMut<'_>,
    ) -> Result<Outcome, ComponentError> {
        let scheme: Scheme = load_option(hook, ns, OPTION_METHOD)?
            .parse()
            .map_err(|_| ComponentError::NotInitialized)?;
        let secret = load_option(hook, ns, OPTION_SECRET)?;
        scheme
            .verify(&secret, delivery)
            .map_err(ComponentError::Rejected)?;

        let id = dedup::delivery_id(delivery)?;
        if dedup::is_duplicate(ns, id)? {
            tracing::debug!(delivery = %id, "replayed delivery");
            return Ok(Outcome::Duplicate);
        }
        dedup::record(ns, id)?;
        Ok(Outcome::Processed)
    }
}
