use std::fmt;

use thiserror::Error;

use super::registry::{Capability, ModelRegistry, ModelSpec};

/// Why the configured model was not used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// Settings and flags named no model.
    Unnamed,
    /// The named model is unknown or cannot serve the capability.
    Unsupported { requested: String },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::Unnamed => f.write_str("no model configured; using default"),
            Fallback::Unsupported { requested } => {
                write!(f, "model '{requested}' unavailable; using default")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no registered model supports {0} requests")]
    NoCapableModel(Capability),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub fallback: Option<Fallback>,
}

/// Resolves a configured model name against the registry.
#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: ModelRegistry) -> Self {
        Self { registry }
    }

    /// Uses `requested` when the registry lets it serve `capability`,
    /// otherwise the registry's preferred model for it.
    pub fn select(
        &self,
        requested: &str,
        capability: Capability,
    ) -> Result<ModelSelection, SelectionError> {
        let requested = requested.trim();
        let fallback = if requested.is_empty() {
            Fallback::Unnamed
        } else if let Some(model) = self.registry.capable(requested, capability) {
            return Ok(ModelSelection {
                model: model.clone(),
                fallback: None,
            });
        } else {
            Fallback::Unsupported {
                requested: requested.to_string(),
            }
        };

        let model = self
            .registry
            .preferred(capability)
            .ok_or(SelectionError::NoCapableModel(capability))?;
        Ok(ModelSelection {
            model: model.clone(),
            fallback: Some(fallback),
        })
    }
}
