use std::fmt;

use indexmap::IndexMap;

use crate::request::{ImageSize, RequestMode};

/// What a model can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Create,
    Variation,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Create => "create",
            Capability::Variation => "variation",
        }
    }
}

impl From<RequestMode> for Capability {
    fn from(mode: RequestMode) -> Self {
        match mode {
            RequestMode::PromptCreate => Capability::Create,
            RequestMode::Variation => Capability::Variation,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub capabilities: Vec<Capability>,
    pub sizes: Vec<ImageSize>,
    pub max_images: u8,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn supports_size(&self, size: ImageSize) -> bool {
        self.sizes.contains(&size)
    }
}

/// Known remote image models, in preference order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    /// The named model, if it is known and can serve `capability`.
    pub fn capable(&self, name: &str, capability: Capability) -> Option<&ModelSpec> {
        self.models
            .get(name)
            .filter(|model| model.supports(capability))
    }

    /// First registered model that can serve `capability`.
    pub fn preferred(&self, capability: Capability) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.supports(capability))
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    [
        ModelSpec {
            name: "dall-e-2".to_string(),
            capabilities: vec![Capability::Create, Capability::Variation],
            sizes: vec![ImageSize::S256, ImageSize::S512, ImageSize::S1024],
            max_images: 10,
        },
        ModelSpec {
            name: "dall-e-3".to_string(),
            capabilities: vec![Capability::Create],
            sizes: vec![ImageSize::S1024],
            max_images: 1,
        },
    ]
    .into_iter()
    .map(|model| (model.name.clone(), model))
    .collect()
}
