use indexmap::IndexMap;

pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_EDIT: &str = "edit";
pub const CAPABILITY_SCENE_IDEAS: &str = "scene_ideas";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn is_dryrun(&self) -> bool {
        self.provider == "dryrun"
    }
}

/// Known models in preference order; the first model supporting a
/// capability is that capability's default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let rows: [(&str, &str, &[&str]); 7] = [
        (
            "gemini-2.5-flash-image-preview",
            "gemini",
            &[CAPABILITY_IMAGE, CAPABILITY_EDIT],
        ),
        (
            "gemini-2.5-flash-image",
            "gemini",
            &[CAPABILITY_IMAGE, CAPABILITY_EDIT],
        ),
        (
            "gemini-3-pro-image-preview",
            "gemini",
            &[CAPABILITY_IMAGE, CAPABILITY_EDIT],
        ),
        ("gemini-3-pro-preview", "gemini", &[CAPABILITY_SCENE_IDEAS]),
        ("gemini-2.5-flash", "gemini", &[CAPABILITY_SCENE_IDEAS]),
        (
            "dryrun-image-1",
            "dryrun",
            &[CAPABILITY_IMAGE, CAPABILITY_EDIT],
        ),
        ("dryrun-text-1", "dryrun", &[CAPABILITY_SCENE_IDEAS]),
    ];

    rows.into_iter()
        .map(|(name, provider, capabilities)| {
            (
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    capabilities: capabilities.iter().map(|item| (*item).to_string()).collect(),
                },
            )
        })
        .collect()
}
