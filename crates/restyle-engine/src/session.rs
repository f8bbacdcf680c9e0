use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use restyle_contracts::data_url::EncodedImage;
use restyle_contracts::events::{now_utc_iso, payload, EventWriter};
use restyle_contracts::models::{ModelSelector, CAPABILITY_IMAGE, CAPABILITY_SCENE_IDEAS};
use restyle_contracts::results::{PromptVariant, Scene, Scheme, SlotKey};
use restyle_contracts::summary::SessionSummary;
use restyle_contracts::themes::{PromptPair, ThemeCatalog, DEFAULT_CAMERA_ANGLE};
use serde_json::json;

use crate::album::{compose_album, Album, AlbumEntry};
use crate::client::{GenerationClient, RetryPolicy};
use crate::config::GenerationConfig;
use crate::dispatcher::{DispatchOutcome, Dispatcher, RegenerationContext};
use crate::ideas::{build_idea_source, SceneBoard, SceneIdeaSource};
use crate::model::{build_image_model, ImageModel};
use crate::orchestrator::{BatchOrchestrator, BatchReport};
use crate::sleeper::{Sleeper, ThreadSleeper};
use crate::store::{SessionPhase, StatusStore, StoreSnapshot};

pub struct SessionBuilder {
    config: GenerationConfig,
    image_model: Option<Arc<dyn ImageModel>>,
    idea_source: Option<Arc<dyn SceneIdeaSource>>,
    sleeper: Arc<dyn Sleeper>,
    events: Option<EventWriter>,
    catalog: Option<ThemeCatalog>,
    session_id: Option<String>,
}

impl SessionBuilder {
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            config,
            image_model: None,
            idea_source: None,
            sleeper: Arc::new(ThreadSleeper),
            events: None,
            catalog: None,
            session_id: None,
        }
    }

    pub fn image_model(mut self, model: Arc<dyn ImageModel>) -> Self {
        self.image_model = Some(model);
        self
    }

    pub fn idea_source(mut self, source: Arc<dyn SceneIdeaSource>) -> Self {
        self.idea_source = Some(source);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn catalog(mut self, catalog: ThemeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Resolves any model not injected through the registry, wires the
    /// client, orchestrator and dispatcher onto one store, and logs
    /// `session_started`.
    pub fn build(self) -> Result<Session> {
        let selector = ModelSelector::new(None);
        let image_model = match self.image_model {
            Some(model) => model,
            None => {
                let selection = selector
                    .select(Some(self.config.image_model.as_str()), CAPABILITY_IMAGE)
                    .map_err(anyhow::Error::msg)?;
                build_image_model(&selection.model, &self.config)?
            }
        };
        let idea_source = match self.idea_source {
            Some(source) => source,
            None => {
                let selection = selector
                    .select(Some(self.config.text_model.as_str()), CAPABILITY_SCENE_IDEAS)
                    .map_err(anyhow::Error::msg)?;
                build_idea_source(&selection.model, &self.config)?
            }
        };
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => ThemeCatalog::bundled()?,
        };
        let default_theme = catalog
            .themes()
            .next()
            .map(|theme| theme.key.clone())
            .context("theme catalog is empty")?;
        let catalog = Arc::new(catalog);

        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let store = StatusStore::new();
        let client = GenerationClient::new(image_model)
            .with_sleeper(self.sleeper.clone())
            .with_retry_policy(RetryPolicy::from_config(&self.config))
            .with_events(self.events.clone());
        let orchestrator = BatchOrchestrator::new(
            client.clone(),
            store.clone(),
            self.sleeper.clone(),
            self.config.pacing(),
        )
        .with_custom_limit(self.config.max_custom_images)
        .with_events(self.events.clone());
        let dispatcher = Dispatcher::new(client.clone(), store.clone(), catalog.clone())
            .with_events(self.events.clone());

        let session = Session {
            inner: Arc::new(SessionInner {
                id: session_id,
                started_at: now_utc_iso(),
                config: self.config,
                catalog,
                store,
                client,
                orchestrator,
                dispatcher,
                idea_source,
                events: self.events,
                default_theme: default_theme.clone(),
                images: Mutex::new(Vec::new()),
                board: Mutex::new(SceneBoard::default()),
                selection: Mutex::new(Selection {
                    theme: default_theme,
                    camera_angle: DEFAULT_CAMERA_ANGLE.to_string(),
                }),
            }),
        };
        session.emit(
            "session_started",
            json!({
                "image_model": session.inner.client.model_name(),
                "text_model": session.inner.idea_source.name(),
                "settings": session.inner.config,
            }),
        );
        Ok(session)
    }
}

#[derive(Debug, Clone)]
struct Selection {
    theme: String,
    camera_angle: String,
}

struct SessionInner {
    id: String,
    started_at: String,
    config: GenerationConfig,
    catalog: Arc<ThemeCatalog>,
    store: StatusStore,
    client: GenerationClient,
    orchestrator: BatchOrchestrator,
    dispatcher: Dispatcher,
    idea_source: Arc<dyn SceneIdeaSource>,
    events: Option<EventWriter>,
    default_theme: String,
    images: Mutex<Vec<EncodedImage>>,
    board: Mutex<SceneBoard>,
    selection: Mutex<Selection>,
}

/// One user's restyling session: uploaded images, current theme and
/// camera angle, the scene board and every generated result.
///
/// Cheap to clone; clones drive the same session, so a batch can run on a
/// worker thread while another thread regenerates or edits.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn builder(config: GenerationConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &ThemeCatalog {
        &self.inner.catalog
    }

    pub fn store(&self) -> &StatusStore {
        &self.inner.store
    }

    pub fn image_model_name(&self) -> &str {
        self.inner.client.model_name()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.store.snapshot()
    }

    pub fn add_image(&self, image: EncodedImage) -> Result<usize> {
        let max_images = self.inner.config.max_images;
        let count = {
            let mut images = lock(&self.inner.images);
            if images.len() >= max_images {
                bail!("at most {max_images} images can be uploaded");
            }
            images.push(image.clone());
            images.len()
        };
        if self.inner.store.phase() == SessionPhase::Idle {
            self.inner.store.set_phase(SessionPhase::ImageUploaded);
        }
        self.emit(
            "image_added",
            json!({"index": count - 1, "mime_type": image.mime_type(), "count": count}),
        );
        Ok(count)
    }

    pub fn remove_image(&self, index: usize) -> Result<EncodedImage> {
        let (removed, remaining) = {
            let mut images = lock(&self.inner.images);
            if index >= images.len() {
                bail!("no uploaded image at position {}", index + 1);
            }
            let removed = images.remove(index);
            (removed, images.len())
        };
        if remaining == 0 && self.inner.store.phase() == SessionPhase::ImageUploaded {
            self.inner.store.set_phase(SessionPhase::Idle);
        }
        self.emit("image_removed", json!({"index": index, "count": remaining}));
        Ok(removed)
    }

    pub fn images(&self) -> Vec<EncodedImage> {
        lock(&self.inner.images).clone()
    }

    pub fn theme(&self) -> String {
        lock(&self.inner.selection).theme.clone()
    }

    pub fn camera_angle(&self) -> String {
        lock(&self.inner.selection).camera_angle.clone()
    }

    pub fn set_theme(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if self.inner.catalog.theme(key).is_none() {
            bail!("unknown theme '{key}'");
        }
        lock(&self.inner.selection).theme = key.to_string();
        Ok(())
    }

    pub fn set_camera_angle(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if self.inner.catalog.camera_angle(key).is_none() {
            bail!("unknown camera angle '{key}'");
        }
        lock(&self.inner.selection).camera_angle = key.to_string();
        Ok(())
    }

    pub fn theme_categories(&self) -> Result<Vec<String>> {
        let theme_key = self.theme();
        let theme = self
            .inner
            .catalog
            .theme(&theme_key)
            .with_context(|| format!("unknown theme '{theme_key}'"))?;
        Ok(theme.categories.clone())
    }

    /// Switches to a random theme other than the current one and returns
    /// its key. Callers then run the whole theme as one batch.
    pub fn shuffle_theme(&self) -> Result<String> {
        let current = self.theme();
        let candidates: Vec<String> = self
            .inner
            .catalog
            .themes()
            .map(|theme| theme.key.clone())
            .filter(|key| *key != current)
            .collect();
        let Some(next) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            bail!("no other theme to shuffle to");
        };
        lock(&self.inner.selection).theme = next.clone();
        Ok(next)
    }

    /// Runs the current theme over `categories` using the first uploaded
    /// image. With nothing uploaded or nothing selected this is a no-op.
    pub fn generate_batch(&self, categories: &[String]) -> Result<BatchReport> {
        let selection = lock(&self.inner.selection).clone();
        let theme = self
            .inner
            .catalog
            .theme(&selection.theme)
            .with_context(|| format!("unknown theme '{}'", selection.theme))?
            .clone();
        let angle = self
            .inner
            .catalog
            .camera_angle(&selection.camera_angle)
            .with_context(|| format!("unknown camera angle '{}'", selection.camera_angle))?
            .clone();
        let Some(source) = self.images().into_iter().next() else {
            return Ok(BatchReport::empty(Scheme::Batch));
        };

        let resolver = |category: &str| {
            PromptPair::new(theme.prompt(category), theme.fallback_prompt(category))
                .with_modifier(&angle.modifier)
        };
        Ok(self.inner.orchestrator.run_batch(categories, resolver, &source))
    }

    /// Asks the idea source for scene proposals. The board is cleared
    /// first and stays empty if the request fails.
    pub fn request_scene_ideas(&self, idea: &str) -> Result<Vec<Scene>> {
        let idea = idea.trim();
        if idea.is_empty() {
            bail!("describe a scene idea first");
        }
        let images = self.images();
        if images.is_empty() {
            bail!("upload at least one image before asking for scene ideas");
        }
        lock(&self.inner.board).begin(idea);

        match self.inner.idea_source.scene_ideas(&images, idea) {
            Ok(scenes) => {
                lock(&self.inner.board).finish(scenes.clone());
                self.emit(
                    "scene_ideas_ready",
                    json!({"idea": idea, "count": scenes.len()}),
                );
                Ok(scenes)
            }
            Err(err) => {
                lock(&self.inner.board).fail();
                self.emit(
                    "scene_ideas_failed",
                    json!({"idea": idea, "error": format!("{err:#}")}),
                );
                Err(err.context("scene ideas are unavailable right now"))
            }
        }
    }

    pub fn scene_board(&self) -> SceneBoard {
        lock(&self.inner.board).clone()
    }

    pub fn toggle_scene(&self, prompt: &str) -> bool {
        lock(&self.inner.board).toggle(prompt)
    }

    /// Toggles the proposal at `index` (0-based); returns its title and
    /// whether it is now selected.
    pub fn toggle_scene_at(&self, index: usize) -> Result<(String, bool)> {
        let mut board = lock(&self.inner.board);
        let Some(scene) = board.scenes.get(index).cloned() else {
            bail!("no scene proposal number {}", index + 1);
        };
        let selected = board.toggle(&scene.prompt);
        Ok((scene.title, selected))
    }

    pub fn generate_scene_images(&self) -> BatchReport {
        let scenes = lock(&self.inner.board).selected_scenes();
        self.inner.orchestrator.run_scenes(&scenes, &self.images())
    }

    pub fn check_custom_count(&self, count: usize) -> Result<()> {
        let max = self.inner.config.max_custom_images;
        if count == 0 || count > max {
            bail!("custom image count must be between 1 and {max}");
        }
        Ok(())
    }

    pub fn generate_custom_images(&self, prompt: &str, count: usize) -> Result<BatchReport> {
        self.check_custom_count(count)?;
        Ok(self
            .inner
            .orchestrator
            .run_custom(prompt, count, &self.images()))
    }

    pub fn regenerate(&self, key: &SlotKey, variant: PromptVariant) -> Result<DispatchOutcome> {
        let selection = lock(&self.inner.selection).clone();
        let context = RegenerationContext {
            theme: selection.theme,
            camera_angle: selection.camera_angle,
            scenes: lock(&self.inner.board).scenes.clone(),
            source_images: self.images(),
        };
        self.inner.dispatcher.regenerate(key, variant, &context)
    }

    pub fn edit_image(&self, image_url: &str, identity: &str, prompt: &str) -> DispatchOutcome {
        self.inner.dispatcher.edit_image(image_url, identity, prompt)
    }

    /// Album page of the finished batch images, titled with the theme.
    pub fn compose_album(&self) -> Result<Album> {
        let entries: Vec<AlbumEntry> = self
            .inner
            .store
            .snapshot()
            .batch
            .into_iter()
            .filter_map(|(caption, result)| {
                result.image_url().cloned().map(|image| AlbumEntry { caption, image })
            })
            .collect();
        let theme_key = self.theme();
        let title = self
            .inner
            .catalog
            .theme(&theme_key)
            .map(|theme| theme.title.clone())
            .unwrap_or(theme_key);
        let album = compose_album(&entries, &title)?;
        self.emit(
            "album_created",
            json!({
                "title": album.manifest.title,
                "images": album.manifest.cells.len(),
                "omitted": album.manifest.omitted.len(),
            }),
        );
        Ok(album)
    }

    /// Back to an empty session. Requests still in flight finish but
    /// their results are discarded.
    pub fn reset(&self) {
        lock(&self.inner.images).clear();
        lock(&self.inner.board).clear();
        *lock(&self.inner.selection) = Selection {
            theme: self.inner.default_theme.clone(),
            camera_angle: DEFAULT_CAMERA_ANGLE.to_string(),
        };
        self.inner.store.reset();
        self.emit("session_reset", json!({}));
    }

    pub fn summary(&self, saved_files: Vec<String>) -> SessionSummary {
        let (batch, scenes, custom) = self.inner.store.totals();
        SessionSummary {
            session_id: self.inner.id.clone(),
            started_at: self.inner.started_at.clone(),
            finished_at: now_utc_iso(),
            batch,
            scenes,
            custom,
            saved_files,
            events_logged: self
                .inner
                .events
                .as_ref()
                .map(EventWriter::emitted)
                .unwrap_or_default(),
        }
    }

    pub fn emit(&self, event_type: &str, body: serde_json::Value) {
        if let Some(events) = &self.inner.events {
            let _ = events.emit(event_type, payload(body));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
