use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexSet;
use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::events::{payload, EventWriter};
use restyle_contracts::results::{ItemResult, ItemStatus, Scene, Scheme, SlotKey};
use restyle_contracts::themes::{custom_prompt_pair, scene_prompt_pair, PromptPair};
use serde::Serialize;
use serde_json::json;

use crate::client::{GenerationClient, GenerationUnit};
use crate::config::DEFAULT_MAX_CUSTOM_IMAGES;
use crate::sleeper::Sleeper;
use crate::store::{AttemptTicket, StatusStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub scheme: Scheme,
    pub done: usize,
    pub error: usize,
    pub skipped: usize,
}

impl BatchReport {
    pub fn empty(scheme: Scheme) -> Self {
        Self {
            scheme,
            done: 0,
            error: 0,
            skipped: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.done + self.error + self.skipped
    }
}

/// Runs a list of units one after another against the status store,
/// pacing dispatches so a burst does not trip upstream rate limits.
#[derive(Clone)]
pub struct BatchOrchestrator {
    client: GenerationClient,
    store: StatusStore,
    sleeper: Arc<dyn Sleeper>,
    pacing: Duration,
    custom_limit: usize,
    events: Option<EventWriter>,
}

impl BatchOrchestrator {
    pub fn new(
        client: GenerationClient,
        store: StatusStore,
        sleeper: Arc<dyn Sleeper>,
        pacing: Duration,
    ) -> Self {
        Self {
            client,
            store,
            sleeper,
            pacing,
            custom_limit: DEFAULT_MAX_CUSTOM_IMAGES,
            events: None,
        }
    }

    pub fn with_custom_limit(mut self, limit: usize) -> Self {
        self.custom_limit = limit;
        self
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }

    /// One unit per selected category, each against the single source
    /// image. The batch map is replaced up front so every selected key
    /// reads `Pending` before the first request goes out.
    pub fn run_batch<F>(
        &self,
        selected_keys: &[String],
        resolver: F,
        source_image: &EncodedImage,
    ) -> BatchReport
    where
        F: Fn(&str) -> PromptPair,
    {
        let keys: IndexSet<&String> = selected_keys.iter().collect();
        if keys.is_empty() {
            return BatchReport::empty(Scheme::Batch);
        }
        let run = self.store.replace_batch(
            keys.iter()
                .map(|key| ((*key).clone(), ItemResult::Pending)),
        );
        self.emit(
            "batch_started",
            json!({"scheme": Scheme::Batch, "units": run.tickets.len()}),
        );

        let sources = std::slice::from_ref(source_image);
        let units = run
            .tickets
            .into_iter()
            .map(|ticket| {
                let category = ticket.key().caption();
                let prompts = resolver(&category);
                let unit =
                    GenerationUnit::new(sources, prompts.primary).with_fallback(prompts.fallback);
                (ticket, unit)
            })
            .collect();

        let report = self.run_units(Scheme::Batch, units);
        self.store.finish_batch(run.run_id);
        self.finish(report)
    }

    /// One unit per scene, merged into the scene map. Every unit sends all
    /// uploaded images.
    pub fn run_scenes(&self, scenes: &[Scene], source_images: &[EncodedImage]) -> BatchReport {
        if scenes.is_empty() || source_images.is_empty() {
            return BatchReport::empty(Scheme::Scene);
        }
        let keys: Vec<SlotKey> = scenes
            .iter()
            .map(|scene| SlotKey::Scene(scene.title.clone()))
            .collect();
        let run_id = self.store.begin_scenes_run();
        let tickets = self.store.initialize_many(&keys);
        self.emit(
            "batch_started",
            json!({"scheme": Scheme::Scene, "units": tickets.len()}),
        );

        let units = tickets
            .into_iter()
            .zip(scenes)
            .map(|(ticket, scene)| {
                let prompts = scene_prompt_pair(&scene.prompt);
                let unit = GenerationUnit::new(source_images, prompts.primary)
                    .with_fallback(prompts.fallback);
                (ticket, unit)
            })
            .collect();

        let report = self.run_units(Scheme::Scene, units);
        self.store.finish_scenes_run(run_id);
        self.finish(report)
    }

    /// `count` identical units from one free-text prompt, replacing the
    /// custom list. Counts outside `1..=custom_limit` are a no-op.
    pub fn run_custom(
        &self,
        prompt: &str,
        count: usize,
        source_images: &[EncodedImage],
    ) -> BatchReport {
        let prompt = prompt.trim();
        if prompt.is_empty()
            || count == 0
            || count > self.custom_limit
            || source_images.is_empty()
        {
            return BatchReport::empty(Scheme::Custom);
        }
        let run_id = self.store.begin_custom_run();
        let tickets = self.store.replace_custom(
            Some(prompt.to_string()),
            (0..count).map(|_| ItemResult::Pending).collect(),
        );
        self.emit(
            "batch_started",
            json!({"scheme": Scheme::Custom, "units": tickets.len()}),
        );

        let prompts = custom_prompt_pair(prompt);
        let units = tickets
            .into_iter()
            .map(|ticket| {
                let unit = GenerationUnit::new(source_images, prompts.primary.clone())
                    .with_fallback(prompts.fallback.clone());
                (ticket, unit)
            })
            .collect();

        let report = self.run_units(Scheme::Custom, units);
        self.store.finish_custom_run(run_id);
        self.finish(report)
    }

    fn run_units(&self, scheme: Scheme, units: Vec<(AttemptTicket, GenerationUnit)>) -> BatchReport {
        let mut report = BatchReport::empty(scheme);
        let mut dispatched = false;
        for (ticket, unit) in units {
            if !self.store.is_current(&ticket) {
                report.skipped += 1;
                self.emit("unit_skipped", json!({"slot": ticket.key()}));
                continue;
            }
            if dispatched {
                self.sleeper.sleep(self.pacing);
                // The slot may have been taken over while we waited.
                if !self.store.is_current(&ticket) {
                    report.skipped += 1;
                    self.emit("unit_skipped", json!({"slot": ticket.key()}));
                    continue;
                }
            }
            dispatched = true;

            self.emit("unit_started", json!({"slot": ticket.key()}));
            let result = match self.client.generate(&unit) {
                Ok(image) => ItemResult::done(image),
                Err(err) => ItemResult::error(err.to_string()),
            };
            let status = result.status();
            if !self.store.complete(&ticket, result) {
                report.skipped += 1;
                self.emit("unit_skipped", json!({"slot": ticket.key(), "late": true}));
                continue;
            }
            match status {
                ItemStatus::Done => report.done += 1,
                _ => report.error += 1,
            }
            self.emit(
                "unit_finished",
                json!({"slot": ticket.key(), "status": status}),
            );
        }
        report
    }

    fn finish(&self, report: BatchReport) -> BatchReport {
        self.emit(
            "batch_finished",
            json!({
                "scheme": report.scheme,
                "done": report.done,
                "error": report.error,
                "skipped": report.skipped,
            }),
        );
        report
    }

    fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = &self.events {
            let _ = events.emit(event_type, payload(body));
        }
    }
}
