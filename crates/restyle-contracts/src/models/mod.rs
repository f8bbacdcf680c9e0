mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_SCENE_IDEAS};
pub use selectors::{ModelSelection, ModelSelector};
