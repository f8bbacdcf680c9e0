mod catalog;
mod prompts;

pub use catalog::{CameraAngle, Theme, ThemeCatalog, DEFAULT_CAMERA_ANGLE};
pub use prompts::{custom_prompt_pair, scene_prompt_pair, PromptPair};
