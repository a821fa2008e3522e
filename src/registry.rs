use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::component::Component;
use crate::error::{Error, Result};

/// Maps component type names to shared prototypes.
///
/// Built once at startup and then shared behind an `Arc`; nothing registers
/// or unregisters after the server starts accepting traffic.
#[derive(Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, Arc<dyn Component>>,
}

/// Registry entry as shown to administrators.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: &'static str,
    pub template: &'static str,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        prototype: Arc<dyn Component>,
    ) -> Result<()> {
        let type_name = type_name.into();
        if self.components.contains_key(&type_name) {
            return Err(Error::DuplicateComponent(type_name));
        }
        tracing::debug!(component = %type_name, "registered component");
        self.components.insert(type_name, prototype);
        Ok(())
    }

    pub fn lookup(&self, type_name: &str) -> Result<Arc<dyn Component>> {
        self.components
            .get(type_name)
            .cloned()
            .ok_or_else(|| Error::UnknownComponent(type_name.to_string()))
    }

    pub fn list(&self) -> Vec<ComponentInfo> {
        self.components
            .iter()
            .map(|(type_name, c)| ComponentInfo {
                type_name: type_name.clone(),
                name: c.name(),
                template: c.template(),
            })
            .collect()
    }
}
