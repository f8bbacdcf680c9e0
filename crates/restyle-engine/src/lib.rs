pub mod album;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gemini;
pub mod ideas;
pub mod model;
pub mod orchestrator;
pub mod session;
pub mod sleeper;
pub mod store;

#[cfg(test)]
mod testing;

pub use album::{compose_album, Album, AlbumEntry, AlbumManifest};
pub use client::{GenerationClient, GenerationUnit, RetryPolicy};
pub use config::GenerationConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher, RegenerationContext};
pub use error::{GenerationError, ModelCallError};
pub use ideas::{DryrunSceneIdeas, GeminiSceneIdeas, SceneBoard, SceneIdeaSource};
pub use model::{DryrunImageModel, ImageModel, ModelReply, ModelRequest, ReplyPart};
pub use orchestrator::{BatchOrchestrator, BatchReport};
pub use session::{Session, SessionBuilder};
pub use sleeper::{Sleeper, ThreadSleeper};
pub use store::{AttemptTicket, EditTarget, SessionPhase, StatusStore, StoreSnapshot};
