use std::sync::Arc;

use anyhow::{bail, Context, Result};
use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::events::{payload, EventWriter};
use restyle_contracts::results::{ItemResult, PromptVariant, Scene, SlotKey};
use restyle_contracts::themes::{custom_prompt_pair, scene_prompt_pair, PromptPair, ThemeCatalog};
use serde_json::json;

use crate::client::{GenerationClient, GenerationUnit};
use crate::error::GenerationError;
use crate::store::StatusStore;

/// Session state a regeneration needs to rebuild a slot's prompt pair.
#[derive(Debug, Clone, Default)]
pub struct RegenerationContext {
    pub theme: String,
    pub camera_angle: String,
    pub scenes: Vec<Scene>,
    pub source_images: Vec<EncodedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub slot: Option<SlotKey>,
    pub result: ItemResult,
    /// `false` when a newer attempt or a reset took the slot first.
    pub applied: bool,
}

/// Single-slot retries and free-text edits.
#[derive(Clone)]
pub struct Dispatcher {
    client: GenerationClient,
    store: StatusStore,
    catalog: Arc<ThemeCatalog>,
    events: Option<EventWriter>,
}

impl Dispatcher {
    pub fn new(client: GenerationClient, store: StatusStore, catalog: Arc<ThemeCatalog>) -> Self {
        Self {
            client,
            store,
            catalog,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    /// Re-runs one slot with exactly one of its two prompts and no
    /// fallback. Errors only when the slot cannot be rebuilt; generation
    /// failures land in the slot.
    pub fn regenerate(
        &self,
        key: &SlotKey,
        variant: PromptVariant,
        context: &RegenerationContext,
    ) -> Result<DispatchOutcome> {
        let (prompts, sources) = self.rebuild(key, context)?;
        let ticket = self
            .store
            .begin_attempt(key)
            .with_context(|| format!("no result to regenerate for {key}"))?;
        let prompt = variant.select(&prompts.primary, &prompts.fallback);
        self.emit(
            "regenerate_started",
            json!({"slot": key, "variant": variant}),
        );

        let result = to_item_result(self.client.generate(&GenerationUnit::new(&sources, prompt)));
        let applied = self.store.complete(&ticket, result.clone());
        Ok(DispatchOutcome {
            slot: Some(key.clone()),
            result,
            applied,
        })
    }

    fn rebuild(
        &self,
        key: &SlotKey,
        context: &RegenerationContext,
    ) -> Result<(PromptPair, Vec<EncodedImage>)> {
        let Some(first) = context.source_images.first() else {
            bail!("no uploaded images to regenerate from");
        };
        match key {
            SlotKey::Batch(category) => {
                let prompts =
                    self.catalog
                        .batch_prompts(&context.theme, category, &context.camera_angle)?;
                Ok((prompts, vec![first.clone()]))
            }
            SlotKey::Scene(title) => {
                let scene = context
                    .scenes
                    .iter()
                    .find(|scene| &scene.title == title)
                    .with_context(|| format!("no scene titled '{title}'"))?;
                Ok((scene_prompt_pair(&scene.prompt), context.source_images.clone()))
            }
            SlotKey::Custom(_) => {
                let prompt = self
                    .store
                    .custom_prompt()
                    .context("no custom prompt has been generated yet")?;
                Ok((custom_prompt_pair(&prompt), context.source_images.clone()))
            }
        }
    }

    /// Applies a free-text instruction to one already generated image.
    /// The outcome is written to the edit target and to the slot the image
    /// came from, when that slot can be found from `identity`.
    pub fn edit_image(&self, image_url: &str, identity: &str, prompt: &str) -> DispatchOutcome {
        let owner = self.store.resolve_identity(identity);
        let ticket = self.store.begin_edit(identity, owner);
        self.emit(
            "edit_started",
            json!({"identity": identity, "owner": ticket.owner()}),
        );

        let unit = GenerationUnit {
            source_images: vec![image_url.to_string()],
            primary_prompt: prompt.to_string(),
            fallback_prompt: None,
        };
        let result = to_item_result(self.client.generate(&unit));
        let applied = self.store.complete_edit(&ticket, result.clone());
        DispatchOutcome {
            slot: ticket.owner().cloned(),
            result,
            applied,
        }
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = &self.events {
            let _ = events.emit(event_type, payload(body));
        }
    }
}

fn to_item_result(outcome: Result<EncodedImage, GenerationError>) -> ItemResult {
    match outcome {
        Ok(image) => ItemResult::done(image),
        Err(err) => ItemResult::error(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use restyle_contracts::results::{ItemResult, PromptVariant, Scene, SlotKey};
    use restyle_contracts::themes::{scene_prompt_pair, ThemeCatalog, DEFAULT_CAMERA_ANGLE};

    use super::*;
    use crate::model::ModelReply;
    use crate::testing::{image_for, upload, RecordingSleeper, ScriptedModel};

    fn dispatcher(model: &ScriptedModel, store: &StatusStore) -> anyhow::Result<Dispatcher> {
        let client = GenerationClient::new(Arc::new(model.clone()))
            .with_sleeper(Arc::new(RecordingSleeper::default()));
        Ok(Dispatcher::new(
            client,
            store.clone(),
            Arc::new(ThemeCatalog::bundled()?),
        ))
    }

    fn context() -> RegenerationContext {
        RegenerationContext {
            theme: "identity".to_string(),
            camera_angle: DEFAULT_CAMERA_ANGLE.to_string(),
            scenes: vec![Scene {
                title: "Beach".to_string(),
                prompt: "a sunny beach".to_string(),
            }],
            source_images: vec![upload(), image_for("second")],
        }
    }

    #[test]
    fn regenerate_fallback_sends_only_the_fallback_prompt() -> anyhow::Result<()> {
        let store = StatusStore::new();
        store.set(&SlotKey::Scene("Beach".to_string()), ItemResult::error("old"));
        let model = ScriptedModel::new(|_| Ok(ModelReply::text("no image")));
        let dispatcher = dispatcher(&model, &store)?;

        let outcome = dispatcher.regenerate(
            &SlotKey::Scene("Beach".to_string()),
            PromptVariant::Fallback,
            &context(),
        )?;

        let expected = scene_prompt_pair("a sunny beach").fallback;
        assert_eq!(model.prompts(), vec![expected]);
        assert_eq!(model.calls()[0].images.len(), 2);
        assert_eq!(
            outcome.result.error_message(),
            Some("The AI model responded with text instead of an image: \"no image\"")
        );
        assert!(outcome.applied);
        assert_eq!(
            store.get(&SlotKey::Scene("Beach".to_string())),
            Some(outcome.result)
        );
        Ok(())
    }

    #[test]
    fn regenerate_marks_slot_pending_before_the_request() -> anyhow::Result<()> {
        let store = StatusStore::new();
        let key = SlotKey::Batch("Chef".to_string());
        store.set(&key, ItemResult::error("first try failed"));
        let observer = store.clone();
        let observed_key = key.clone();
        let model = ScriptedModel::new(move |request| {
            assert_eq!(observer.get(&observed_key), Some(ItemResult::Pending));
            Ok(ModelReply::image(image_for(&request.text)))
        });
        let dispatcher = dispatcher(&model, &store)?;

        let outcome = dispatcher.regenerate(&key, PromptVariant::Original, &context())?;

        assert_eq!(outcome.result.status(), restyle_contracts::results::ItemStatus::Done);
        let calls = model.calls();
        assert_eq!(calls[0].images, vec![upload()]);
        assert!(calls[0].text.contains("Chef"));
        Ok(())
    }

    #[test]
    fn regenerate_custom_uses_stored_prompt() -> anyhow::Result<()> {
        let store = StatusStore::new();
        store.replace_custom(
            Some("1920s jazz club".to_string()),
            vec![ItemResult::error("x"), ItemResult::error("y")],
        );
        let model = ScriptedModel::always_image();
        let dispatcher = dispatcher(&model, &store)?;

        dispatcher.regenerate(&SlotKey::Custom(1), PromptVariant::Original, &context())?;

        assert_eq!(
            model.prompts(),
            vec![scene_prompt_pair("1920s jazz club").primary]
        );
        assert_eq!(store.get(&SlotKey::Custom(0)), Some(ItemResult::error("x")));
        assert!(dispatcher
            .regenerate(&SlotKey::Custom(7), PromptVariant::Original, &context())
            .is_err());
        Ok(())
    }

    #[test]
    fn regenerate_requires_rebuildable_context() -> anyhow::Result<()> {
        let store = StatusStore::new();
        store.set(&SlotKey::Scene("Gone".to_string()), ItemResult::error("x"));
        let model = ScriptedModel::always_image();
        let dispatcher = dispatcher(&model, &store)?;

        assert!(dispatcher
            .regenerate(&SlotKey::Scene("Gone".to_string()), PromptVariant::Original, &context())
            .is_err());
        let no_images = RegenerationContext {
            source_images: Vec::new(),
            ..context()
        };
        assert!(dispatcher
            .regenerate(&SlotKey::Batch("Chef".to_string()), PromptVariant::Original, &no_images)
            .is_err());
        assert!(model.calls().is_empty());
        assert_eq!(
            store.get(&SlotKey::Scene("Gone".to_string())),
            Some(ItemResult::error("x"))
        );
        Ok(())
    }

    #[test]
    fn edit_resolves_custom_caption_and_updates_both_targets() -> anyhow::Result<()> {
        let store = StatusStore::new();
        store.replace_custom(
            Some("jazz".to_string()),
            vec![
                ItemResult::done(image_for("c0")),
                ItemResult::done(image_for("c1")),
                ItemResult::done(image_for("c2")),
            ],
        );
        let model = ScriptedModel::always_image();
        let dispatcher = dispatcher(&model, &store)?;

        let source = image_for("c2").to_string();
        let outcome = dispatcher.edit_image(&source, "custom-2", "make it sepia");

        assert_eq!(outcome.slot, Some(SlotKey::Custom(2)));
        assert_eq!(outcome.result, ItemResult::done(image_for("make it sepia")));
        assert_eq!(store.get(&SlotKey::Custom(2)), Some(outcome.result.clone()));
        let edit = store.edit_target().unwrap();
        assert_eq!(edit.identity, "custom-2");
        assert_eq!(edit.result, outcome.result);
        let calls = model.calls();
        assert_eq!(calls[0].images, vec![image_for("c2")]);
        assert_eq!(calls[0].text, "make it sepia");
        Ok(())
    }

    #[test]
    fn edit_failure_never_escapes() -> anyhow::Result<()> {
        let store = StatusStore::new();
        let model = ScriptedModel::always_image();
        let dispatcher = dispatcher(&model, &store)?;

        let outcome = dispatcher.edit_image("not a data url", "Unknown", "make it sepia");

        assert_eq!(outcome.slot, None);
        assert!(outcome.result.error_message().is_some());
        assert!(model.calls().is_empty());
        assert_eq!(
            store.edit_target().map(|edit| edit.result),
            Some(outcome.result)
        );
        Ok(())
    }
}
