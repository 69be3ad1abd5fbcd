//! Cross-provider model mapping for fallback.

// Model identifiers used across the gateway.
pub const CLAUDE_HAIKU: &str = "claude-haiku-4-5";
pub const CLAUDE_SONNET: &str = "claude-sonnet-4-5";
pub const CLAUDE_OPUS: &str = "claude-opus-4-5";
pub const GEMINI_FLASH: &str = "gemini-3-flash-preview";
pub const GEMINI_PRO: &str = "gemini-3-pro-preview";

/// Claude models and their closest Gemini equivalents.
const CLAUDE_TO_GEMINI: &[(&str, &str)] = &[
    (CLAUDE_HAIKU, GEMINI_FLASH),
    (CLAUDE_SONNET, GEMINI_FLASH),
    (CLAUDE_OPUS, GEMINI_PRO),
];

/// Gemini models and their closest Claude equivalents.
const GEMINI_TO_CLAUDE: &[(&str, &str)] = &[
    (GEMINI_FLASH, CLAUDE_SONNET),
    (GEMINI_PRO, CLAUDE_OPUS),
];

/// Map a model from one provider to an equivalent in another.
///
/// Used when the chain falls back to a secondary provider: the caller's
/// model name is translated to the target's closest equivalent. Unmapped
/// names fall back to the target provider's default model; unknown target
/// providers pass the model through untouched.
pub fn map_model_to_provider(original_model: &str, target_provider: &str) -> String {
    match target_provider {
        "gemini" => CLAUDE_TO_GEMINI
            .iter()
            .find(|(from, _)| *from == original_model)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| GEMINI_FLASH.to_string()),
        "claude" => GEMINI_TO_CLAUDE
            .iter()
            .find(|(from, _)| *from == original_model)
            .map(|(_, to)| to.to_string())
            .unwrap_or_else(|| CLAUDE_SONNET.to_string()),
        _ => original_model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sonnet_maps_to_flash() {
        assert_eq!(map_model_to_provider(CLAUDE_SONNET, "gemini"), GEMINI_FLASH);
    }

    #[test]
    fn test_opus_maps_to_pro() {
        assert_eq!(map_model_to_provider(CLAUDE_OPUS, "gemini"), GEMINI_PRO);
    }

    #[test]
    fn test_unmapped_falls_back_to_provider_default() {
        assert_eq!(
            map_model_to_provider("claude-2.1", "gemini"),
            GEMINI_FLASH
        );
        assert_eq!(
            map_model_to_provider("gemini-1.5-flash", "claude"),
            CLAUDE_SONNET
        );
    }

    #[test]
    fn test_unknown_target_passes_through() {
        assert_eq!(
            map_model_to_provider(CLAUDE_SONNET, "openai"),
            CLAUDE_SONNET
        );
    }
}
