use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Picks the requested model when it supports `capability`, else the
    /// capability's default with the reason recorded.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(name) = requested {
            if let Some(model) = self.registry.ensure(name, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
        }

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!("No models available for capability '{capability}'."));
        };
        let fallback_reason = match requested {
            Some(name) => format!("Requested model '{name}' unavailable for capability '{capability}'."),
            None => "No model specified; using default.".to_string(),
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::models::{
        ModelRegistry, ModelSelector, ModelSpec, CAPABILITY_IMAGE, CAPABILITY_SCENE_IDEAS,
    };

    fn image_model(name: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: "dryrun".to_string(),
            capabilities: vec![CAPABILITY_IMAGE.to_string()],
        }
    }

    #[test]
    fn default_registry_prefers_gemini_image_model() {
        let selection = ModelSelector::new(None)
            .select(None, CAPABILITY_IMAGE)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image-preview");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn explicit_dryrun_model_is_honored() {
        let selection = ModelSelector::new(None)
            .select(Some("dryrun-text-1"), CAPABILITY_SCENE_IDEAS)
            .unwrap();
        assert!(selection.model.is_dryrun());
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn falls_back_when_requested_model_lacks_capability() {
        let mut models = IndexMap::new();
        models.insert("img-a".to_string(), image_model("img-a"));
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), CAPABILITY_IMAGE)
            .unwrap();
        assert_eq!(selection.model.name, "img-a");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'image'.")
        );
    }

    #[test]
    fn errors_when_no_model_has_capability() {
        let mut models = IndexMap::new();
        models.insert("img-a".to_string(), image_model("img-a"));
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(None, CAPABILITY_SCENE_IDEAS)
            .unwrap_err();
        assert_eq!(err, "No models available for capability 'scene_ideas'.");
    }
}
