use serde::{Deserialize, Serialize};

/// The two candidate instructions for one generation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPair {
    pub primary: String,
    pub fallback: String,
}

impl PromptPair {
    pub fn new(primary: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// Appends a camera-angle modifier to both prompts; empty modifiers are
    /// a no-op.
    pub fn with_modifier(self, modifier: &str) -> Self {
        let modifier = modifier.trim();
        if modifier.is_empty() {
            return self;
        }
        Self {
            primary: format!("{} {modifier}", self.primary),
            fallback: format!("{} {modifier}", self.fallback),
        }
    }
}

/// Prompt pair for a scene proposal; every uploaded person is placed into
/// the scene.
pub fn scene_prompt_pair(scene_prompt: &str) -> PromptPair {
    PromptPair::new(
        format!(
            "Create a high-quality, photorealistic image based on the following scene: \"{scene_prompt}\". It is crucial to incorporate the person/people from the provided image(s) into this scene, preserving their facial likeness and unique features. Ensure they appear naturally integrated into the environment."
        ),
        format!(
            "A high-quality, photorealistic image depicting: {scene_prompt} with the person/people from the provided image(s)."
        ),
    )
}

/// Custom prompts share the scene template.
pub fn custom_prompt_pair(custom_prompt: &str) -> PromptPair {
    scene_prompt_pair(custom_prompt.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_pair_embeds_scene_text_in_both_prompts() {
        let pair = scene_prompt_pair("a rainy street in Tokyo");
        assert!(pair
            .primary
            .contains("following scene: \"a rainy street in Tokyo\""));
        assert!(pair.fallback.starts_with("A high-quality, photorealistic image depicting: a rainy street in Tokyo"));
    }

    #[test]
    fn modifier_is_appended_with_single_space() {
        let pair = PromptPair::new("P.", "F.").with_modifier("Low angle.");
        assert_eq!(pair, PromptPair::new("P. Low angle.", "F. Low angle."));
        assert_eq!(
            PromptPair::new("P.", "F.").with_modifier("  "),
            PromptPair::new("P.", "F.")
        );
    }

    #[test]
    fn custom_pair_trims_user_text() {
        assert_eq!(custom_prompt_pair("  at the beach "), scene_prompt_pair("at the beach"));
    }
}
