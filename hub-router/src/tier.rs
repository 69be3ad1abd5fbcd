//! Tier-based model selection for cost optimization.
//!
//! Maps a free-text prompt to one of four complexity tiers and returns a
//! concrete model for the chosen provider. Lower tiers use faster/cheaper
//! models, higher tiers more capable ones.

use crate::model_map::{CLAUDE_HAIKU, CLAUDE_OPUS, CLAUDE_SONNET, GEMINI_FLASH, GEMINI_PRO};
use hub_core::{Message, Role};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// TIERS
// ============================================================================

/// Task complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Simple queries, lookups, formatting
    T1 = 1,
    /// Standard coding, explanations
    T2 = 2,
    /// Complex reasoning, multi-step tasks
    T3 = 3,
    /// Most complex tasks, architecture, deep analysis
    T4 = 4,
}

impl Tier {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.as_u8())
    }
}

// ============================================================================
// COMPLEXITY PATTERNS
// ============================================================================

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("static tier pattern must compile"))
        .collect()
}

static TIER4_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\barchitect\w*\b",
        r"\bdesign\s+pattern\b",
        r"\bsystem\s+design\b",
        r"\bscalability\b",
        r"\broot\s+cause\b",
        r"\bdeep\s+analysis\b",
        r"\bmulti-step\b",
        r"\bcomplex\s+(algorithm|reasoning)\b",
    ])
});

static TIER3_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\brefactor\w*\b",
        r"\boptimiz\w*\b",
        r"\bintegrat\w*\b",
        r"\bdebug\w*\b",
        r"\bfix\s+bug\b",
        r"\bexplain\s+(why|how)\b",
        r"\bimplement\w*\b",
    ])
});

static TIER2_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bwrite\s+(code|function|test)\b",
        r"\bcreate\s+\w+\b",
        r"\bgenerate\b",
        r"\bconvert\b",
        r"\bupdate\b",
        r"\badd\s+\w+\b",
    ])
});

// Length fallbacks when no pattern matches.
const TIER3_LENGTH_CUTOFF: usize = 2000;
const TIER2_LENGTH_CUTOFF: usize = 500;

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classify a prompt into a complexity tier.
///
/// Rule cascade: tier 4 patterns, then 3, then 2; falls back to prompt
/// length. A pure function of the prompt text.
pub fn classify_request(prompt: &str) -> Tier {
    let text = prompt.to_lowercase();

    if TIER4_PATTERNS.iter().any(|p| p.is_match(&text)) {
        return Tier::T4;
    }
    if TIER3_PATTERNS.iter().any(|p| p.is_match(&text)) {
        return Tier::T3;
    }
    if TIER2_PATTERNS.iter().any(|p| p.is_match(&text)) {
        return Tier::T2;
    }

    // Longer prompts often need more reasoning.
    if text.len() > TIER3_LENGTH_CUTOFF {
        Tier::T3
    } else if text.len() > TIER2_LENGTH_CUTOFF {
        Tier::T2
    } else {
        Tier::T1
    }
}

// ============================================================================
// MODEL TABLES
// ============================================================================

/// Model for a tier and provider. Unknown providers get the Claude column.
pub fn model_for_tier(tier: Tier, provider: &str) -> &'static str {
    match (tier, provider) {
        (Tier::T1, "gemini") => GEMINI_FLASH,
        (Tier::T2, "gemini") => GEMINI_FLASH,
        (Tier::T3, "gemini") => GEMINI_PRO,
        (Tier::T4, "gemini") => GEMINI_PRO,
        (Tier::T1, _) => CLAUDE_HAIKU,
        (Tier::T2, _) => CLAUDE_SONNET,
        (Tier::T3, _) => CLAUDE_SONNET,
        (Tier::T4, _) => CLAUDE_OPUS,
    }
}

/// Classify the last user message and pick a model for the primary provider.
///
/// Only the last user message feeds classification on the request path.
pub fn select_model_by_tier(messages: &[Message], primary_provider: &str) -> (Tier, String) {
    let prompt = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_text())
        .unwrap_or_default();

    let tier = classify_request(&prompt);
    let model = model_for_tier(tier, primary_provider);
    tracing::info!(%tier, model, "Auto-tier selected");
    (tier, model.to_string())
}

/// Classify and select, honoring an explicit model override.
///
/// An explicit model bypasses selection but the tier is still reported.
pub fn classify_and_select(
    prompt: &str,
    provider: &str,
    explicit_model: Option<&str>,
) -> (Tier, String) {
    let tier = classify_request(prompt);
    match explicit_model {
        Some(model) => (tier, model.to_string()),
        None => (tier, model_for_tier(tier, provider).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier4_architecture() {
        assert_eq!(
            classify_request("Design the architecture for a payment system"),
            Tier::T4
        );
        assert_eq!(classify_request("find the root cause of this crash"), Tier::T4);
    }

    #[test]
    fn test_tier3_refactor_and_debug() {
        assert_eq!(classify_request("refactor this module"), Tier::T3);
        assert_eq!(classify_request("please debug the parser"), Tier::T3);
        assert_eq!(classify_request("implement a queue"), Tier::T3);
    }

    #[test]
    fn test_tier2_write_and_generate() {
        assert_eq!(classify_request("write code for a parser"), Tier::T2);
        assert_eq!(classify_request("generate a README"), Tier::T2);
    }

    #[test]
    fn test_higher_tier_wins_on_overlap() {
        // Matches both "implement" (T3) and "scalability" (T4).
        assert_eq!(
            classify_request("implement this with scalability in mind"),
            Tier::T4
        );
    }

    #[test]
    fn test_length_fallbacks() {
        assert_eq!(classify_request("what time is it"), Tier::T1);
        assert_eq!(classify_request(&"x".repeat(600)), Tier::T2);
        assert_eq!(classify_request(&"x".repeat(2100)), Tier::T3);
    }

    #[test]
    fn test_model_table() {
        assert_eq!(model_for_tier(Tier::T1, "claude"), CLAUDE_HAIKU);
        assert_eq!(model_for_tier(Tier::T4, "claude"), CLAUDE_OPUS);
        assert_eq!(model_for_tier(Tier::T3, "gemini"), GEMINI_PRO);
    }

    #[test]
    fn test_only_last_user_message_classified() {
        let messages = vec![
            Message::user("design the system architecture"),
            Message::assistant("Here is a sketch."),
            Message::user("thanks"),
        ];
        let (tier, model) = select_model_by_tier(&messages, "claude");
        assert_eq!(tier, Tier::T1);
        assert_eq!(model, CLAUDE_HAIKU);
    }

    #[test]
    fn test_explicit_model_bypasses_selection() {
        let (tier, model) =
            classify_and_select("refactor everything", "claude", Some("claude-opus-4-5"));
        assert_eq!(tier, Tier::T3);
        assert_eq!(model, "claude-opus-4-5");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Classification is a pure function of the prompt text.
        #[test]
        fn prop_classification_deterministic(prompt in ".{0,400}") {
            let first = classify_request(&prompt);
            let second = classify_request(&prompt);
            prop_assert_eq!(first, second);
        }

        /// Every prompt lands in exactly one of the four tiers.
        #[test]
        fn prop_classification_total(prompt in ".{0,3000}") {
            let tier = classify_request(&prompt);
            prop_assert!((1..=4).contains(&tier.as_u8()));
        }
    }
}
