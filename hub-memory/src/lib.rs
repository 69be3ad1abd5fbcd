//! Agent Hub Memory - Token-Budgeted Prompt Injection
//!
//! Fetches three content tiers from an external memory service and produces
//! additional system-role material bounded by a token budget. Mandates get
//! priority, guardrails prevent mistakes, reference provides context.
//!
//! Injection never fails a request: memory service errors are logged and the
//! tier is treated as empty.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_core::{HubResult, MemoryConfig, Message};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

// ============================================================================
// TOKEN COUNTING
// ============================================================================

/// Estimate token count for a piece of text.
///
/// Simple ~4 characters per token heuristic, rounded up so the estimate is a
/// conservative upper bound. Accurate enough for budget accounting without a
/// tokenizer dependency.
pub fn count_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as u32).div_ceil(4)
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Memory system settings singleton.
///
/// `enabled` is the kill switch (false = nothing injected); `budget_enabled`
/// toggles enforcement (false = inject everything without limits).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    pub enabled: bool,
    pub budget_enabled: bool,
    pub total_budget: u32,
    pub mandates_fraction: f32,
    pub guardrails_fraction: f32,
    pub reference_fraction: f32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_enabled: true,
            total_budget: 3500,
            mandates_fraction: 0.50,
            guardrails_fraction: 0.30,
            reference_fraction: 0.20,
        }
    }
}

impl From<&MemoryConfig> for MemorySettings {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            enabled: config.enabled,
            budget_enabled: config.budget_enabled,
            total_budget: config.total_budget,
            mandates_fraction: config.mandates_fraction,
            guardrails_fraction: config.guardrails_fraction,
            reference_fraction: config.reference_fraction,
        }
    }
}

impl MemorySettings {
    /// Token allocation for a tier when budget enforcement is on.
    pub fn tier_allocation(&self, tier: MemoryTier) -> u32 {
        let fraction = match tier {
            MemoryTier::Mandates => self.mandates_fraction,
            MemoryTier::Guardrails => self.guardrails_fraction,
            MemoryTier::Reference => self.reference_fraction,
        };
        (self.total_budget as f32 * fraction).floor() as u32
    }
}

/// Partial update for the admin surface; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySettingsUpdate {
    pub enabled: Option<bool>,
    pub budget_enabled: Option<bool>,
    pub total_budget: Option<u32>,
}

/// Process-scope settings holder, read per request and updated by the admin
/// surface.
#[derive(Debug)]
pub struct MemorySettingsStore {
    settings: RwLock<MemorySettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: MemorySettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn get(&self) -> MemorySettings {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn update(&self, update: MemorySettingsUpdate) -> MemorySettings {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        if let Some(enabled) = update.enabled {
            settings.enabled = enabled;
        }
        if let Some(budget_enabled) = update.budget_enabled {
            settings.budget_enabled = budget_enabled;
        }
        if let Some(total_budget) = update.total_budget {
            settings.total_budget = total_budget;
        }
        tracing::info!(
            enabled = settings.enabled,
            budget_enabled = settings.budget_enabled,
            total_budget = settings.total_budget,
            "Updated memory settings"
        );
        *settings
    }
}

// ============================================================================
// MEMORY SERVICE CONTRACT
// ============================================================================

/// Content tier, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Mandates,
    Guardrails,
    Reference,
}

impl MemoryTier {
    pub fn all() -> [MemoryTier; 3] {
        [Self::Mandates, Self::Guardrails, Self::Reference]
    }

    fn heading(&self) -> &'static str {
        match self {
            Self::Mandates => "Mandates",
            Self::Guardrails => "Guardrails",
            Self::Reference => "Reference",
        }
    }
}

/// A retrieved memory item. Items are atomic: injected whole or not at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub content: String,
}

impl MemoryItem {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Retrieval inputs: the request fingerprint from the injector's view.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryQuery {
    pub prompt: String,
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    /// Caller-supplied correlation id; keys experiment variant assignment.
    pub external_id: Option<String>,
}

/// Query contract of the external memory service. Store internals are out
/// of scope; the injector only needs tiered retrieval.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn fetch(&self, tier: MemoryTier, query: &MemoryQuery) -> HubResult<Vec<MemoryItem>>;
}

/// In-process memory store backed by per-tier item lists.
///
/// Stands in for the external vector-graph service in single-node
/// deployments and tests; items are registered through the admin surface or
/// fixtures.
#[derive(Debug, Default)]
pub struct StaticMemoryStore {
    items: RwLock<std::collections::HashMap<MemoryTier, Vec<MemoryItem>>>,
}

impl StaticMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tier: MemoryTier, item: MemoryItem) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tier)
            .or_default()
            .push(item);
    }

    pub fn clear(&self) {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[async_trait]
impl MemoryStore for StaticMemoryStore {
    async fn fetch(&self, tier: MemoryTier, _query: &MemoryQuery) -> HubResult<Vec<MemoryItem>> {
        Ok(self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&tier)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// BUDGET ACCOUNTING
// ============================================================================

/// Tracks token usage across memory tiers for one injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub mandates_tokens: u32,
    pub guardrails_tokens: u32,
    pub reference_tokens: u32,
    pub total_budget: u32,
}

impl BudgetUsage {
    pub fn total_tokens(&self) -> u32 {
        self.mandates_tokens + self.guardrails_tokens + self.reference_tokens
    }

    pub fn remaining(&self) -> u32 {
        self.total_budget.saturating_sub(self.total_tokens())
    }

    pub fn hit_limit(&self) -> bool {
        self.total_tokens() >= self.total_budget
    }
}

/// Result of budget-constrained selection for one tier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetResult {
    pub content: Vec<String>,
    pub tokens_used: u32,
    pub was_truncated: bool,
}

/// Select items that fit within the remaining budget.
///
/// Priority fill: items are taken in order until one no longer fits.
/// Individual items are never split, so the result may undershoot the cap.
pub fn select_within_budget(items: &[MemoryItem], remaining_budget: u32) -> BudgetResult {
    let mut selected = Vec::new();
    let mut tokens_used: u32 = 0;

    for item in items {
        let tokens = count_tokens(&item.content);
        if tokens_used + tokens <= remaining_budget {
            selected.push(item.content.clone());
            tokens_used += tokens;
        } else {
            break;
        }
    }

    BudgetResult {
        was_truncated: selected.len() < items.len(),
        content: selected,
        tokens_used,
    }
}

// ============================================================================
// VARIANT ASSIGNMENT
// ============================================================================

/// Experiment arm for injection A/B testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Control,
    Treatment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Treatment => "treatment",
        }
    }
}

/// Deterministic variant assignment: a pure function of
/// (external_id, project_id). Identical inputs always yield the same arm.
pub fn assign_variant(external_id: &str, project_id: &str) -> Variant {
    let digest = Sha256::digest(format!("{}:{}", external_id, project_id).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    if u64::from_be_bytes(bytes) % 2 == 0 {
        Variant::Control
    } else {
        Variant::Treatment
    }
}

// ============================================================================
// INJECTION RECORDS
// ============================================================================

/// Per-request injection metric record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionRecord {
    pub mandates_count: u32,
    pub guardrails_count: u32,
    pub reference_count: u32,
    pub mandates_tokens: u32,
    pub guardrails_tokens: u32,
    pub reference_tokens: u32,
    pub total_tokens: u32,
    pub latency_ms: u64,
    pub variant: Variant,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// MEMORY INJECTOR
// ============================================================================

/// Produces system-role material from the memory service, bounded by the
/// configured token budget.
pub struct MemoryInjector {
    store: Arc<dyn MemoryStore>,
    settings: Arc<MemorySettingsStore>,
    records: Mutex<Vec<InjectionRecord>>,
}

impl MemoryInjector {
    pub fn new(store: Arc<dyn MemoryStore>, settings: Arc<MemorySettingsStore>) -> Self {
        Self {
            store,
            settings,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &MemorySettingsStore {
        &self.settings
    }

    /// Run injection for one request. Returns the system message to prepend,
    /// or None when disabled or nothing was retrieved.
    pub async fn inject(&self, query: &MemoryQuery) -> Option<Message> {
        let settings = self.settings.get();
        if !settings.enabled {
            return None;
        }

        let start = Instant::now();
        let variant = assign_variant(
            query.external_id.as_deref().unwrap_or_default(),
            query.project_id.as_deref().unwrap_or_default(),
        );

        let mut sections: Vec<String> = Vec::new();
        let mut counts = [0u32; 3];
        let mut tokens = [0u32; 3];

        for (idx, tier) in MemoryTier::all().into_iter().enumerate() {
            let allocation = if settings.budget_enabled {
                let cap = settings.tier_allocation(tier);
                if cap == 0 {
                    continue;
                }
                Some(cap)
            } else {
                None
            };

            let items = match self.store.fetch(tier, query).await {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(?tier, error = %e, "Memory fetch failed, skipping tier");
                    continue;
                }
            };
            if items.is_empty() {
                continue;
            }

            let (selected, used) = match allocation {
                Some(cap) => {
                    let result = select_within_budget(&items, cap);
                    (result.content, result.tokens_used)
                }
                None => {
                    let used = items.iter().map(|i| count_tokens(&i.content)).sum();
                    (items.into_iter().map(|i| i.content).collect(), used)
                }
            };
            if selected.is_empty() {
                continue;
            }

            counts[idx] = selected.len() as u32;
            tokens[idx] = used;
            sections.push(format!(
                "## {}\n{}",
                tier.heading(),
                selected
                    .iter()
                    .map(|c| format!("- {}", c))
                    .collect::<Vec<_>>()
                    .join("\n")
            ));
        }

        let record = InjectionRecord {
            mandates_count: counts[0],
            guardrails_count: counts[1],
            reference_count: counts[2],
            mandates_tokens: tokens[0],
            guardrails_tokens: tokens[1],
            reference_tokens: tokens[2],
            total_tokens: tokens.iter().sum(),
            latency_ms: start.elapsed().as_millis() as u64,
            variant,
            created_at: Utc::now(),
        };
        tracing::debug!(
            total_tokens = record.total_tokens,
            latency_ms = record.latency_ms,
            variant = variant.as_str(),
            "Memory injection complete"
        );
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);

        if sections.is_empty() {
            None
        } else {
            Some(Message::system(sections.join("\n\n")))
        }
    }

    /// Injection metric records, in request order.
    pub fn records(&self) -> Vec<InjectionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for MemoryInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryInjector")
            .field("settings", &self.settings.get())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::HubError;
    use std::collections::HashMap;

    struct FakeStore {
        items: HashMap<MemoryTier, Vec<MemoryItem>>,
        fail_tier: Option<MemoryTier>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                items: HashMap::new(),
                fail_tier: None,
            }
        }

        fn with(mut self, tier: MemoryTier, contents: &[&str]) -> Self {
            self.items.insert(
                tier,
                contents.iter().map(|c| MemoryItem::new(*c)).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl MemoryStore for FakeStore {
        async fn fetch(
            &self,
            tier: MemoryTier,
            _query: &MemoryQuery,
        ) -> HubResult<Vec<MemoryItem>> {
            if self.fail_tier == Some(tier) {
                return Err(HubError::Internal("memory service down".to_string()));
            }
            Ok(self.items.get(&tier).cloned().unwrap_or_default())
        }
    }

    fn query() -> MemoryQuery {
        MemoryQuery {
            prompt: "deploy the service".to_string(),
            session_id: Some("sess-1".to_string()),
            project_id: Some("proj-1".to_string()),
            external_id: Some("ext-1".to_string()),
        }
    }

    fn injector(store: FakeStore, settings: MemorySettings) -> MemoryInjector {
        MemoryInjector::new(
            Arc::new(store),
            Arc::new(MemorySettingsStore::new(settings)),
        )
    }

    #[test]
    fn test_count_tokens() {
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("abcd"), 1);
        assert_eq!(count_tokens("abcde"), 2);
        assert_eq!(count_tokens(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_select_within_budget_atomic_items() {
        let items = vec![
            MemoryItem::new("a".repeat(40)), // 10 tokens
            MemoryItem::new("b".repeat(40)), // 10 tokens
            MemoryItem::new("c".repeat(40)), // 10 tokens
        ];
        let result = select_within_budget(&items, 25);
        assert_eq!(result.content.len(), 2);
        assert_eq!(result.tokens_used, 20);
        assert!(result.was_truncated);
    }

    #[test]
    fn test_select_within_budget_all_fit() {
        let items = vec![MemoryItem::new("short"), MemoryItem::new("also short")];
        let result = select_within_budget(&items, 1000);
        assert_eq!(result.content.len(), 2);
        assert!(!result.was_truncated);
    }

    #[test]
    fn test_tier_allocation_fractions() {
        let settings = MemorySettings {
            total_budget: 1000,
            ..MemorySettings::default()
        };
        assert_eq!(settings.tier_allocation(MemoryTier::Mandates), 500);
        assert_eq!(settings.tier_allocation(MemoryTier::Guardrails), 300);
        assert_eq!(settings.tier_allocation(MemoryTier::Reference), 200);
    }

    #[test]
    fn test_settings_store_partial_update() {
        let store = MemorySettingsStore::new(MemorySettings::default());
        let updated = store.update(MemorySettingsUpdate {
            enabled: Some(false),
            ..MemorySettingsUpdate::default()
        });
        assert!(!updated.enabled);
        assert!(updated.budget_enabled);
        assert_eq!(updated.total_budget, 3500);
    }

    #[test]
    fn test_variant_deterministic() {
        let first = assign_variant("ext-1", "proj-1");
        for _ in 0..1000 {
            assert_eq!(assign_variant("ext-1", "proj-1"), first);
        }
    }

    #[tokio::test]
    async fn test_injection_variant_keyed_by_external_id() {
        // The recorded variant must be the pure function of the caller's
        // (external_id, project_id), regardless of which session carries the
        // request. Sweeping several ids makes a session-id-based assignment
        // unable to coincide on all of them.
        for i in 0..16 {
            let external = format!("ext-{}", i);
            let injector = injector(FakeStore::new(), MemorySettings::default());
            let q = MemoryQuery {
                prompt: "deploy the service".to_string(),
                session_id: Some(format!("sess-{}", 97 - i)),
                project_id: Some("proj-1".to_string()),
                external_id: Some(external.clone()),
            };
            injector.inject(&q).await;
            let record = &injector.records()[0];
            assert_eq!(record.variant, assign_variant(&external, "proj-1"));
        }
    }

    #[tokio::test]
    async fn test_injection_variant_stable_across_sessions() {
        let injector = injector(FakeStore::new(), MemorySettings::default());
        for session in ["sess-a", "sess-b", "sess-c"] {
            let q = MemoryQuery {
                prompt: "deploy the service".to_string(),
                session_id: Some(session.to_string()),
                project_id: Some("proj-1".to_string()),
                external_id: Some("ext-fixed".to_string()),
            };
            injector.inject(&q).await;
        }
        let records = injector.records();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.variant == records[0].variant));
        assert_eq!(records[0].variant, assign_variant("ext-fixed", "proj-1"));
    }

    #[tokio::test]
    async fn test_disabled_injects_nothing() {
        let store = FakeStore::new().with(MemoryTier::Mandates, &["always cite sources"]);
        let injector = injector(
            store,
            MemorySettings {
                enabled: false,
                ..MemorySettings::default()
            },
        );
        assert!(injector.inject(&query()).await.is_none());
        assert!(injector.records().is_empty());
    }

    #[tokio::test]
    async fn test_injects_all_tiers_in_priority_order() {
        let store = FakeStore::new()
            .with(MemoryTier::Mandates, &["mandate one"])
            .with(MemoryTier::Guardrails, &["never delete prod"])
            .with(MemoryTier::Reference, &["the API lives at /api"]);
        let injector = injector(store, MemorySettings::default());

        let message = injector.inject(&query()).await.expect("injection");
        let text = message.content.as_text();
        let mandates_pos = text.find("Mandates").expect("mandates section");
        let guardrails_pos = text.find("Guardrails").expect("guardrails section");
        let reference_pos = text.find("Reference").expect("reference section");
        assert!(mandates_pos < guardrails_pos);
        assert!(guardrails_pos < reference_pos);

        let records = injector.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mandates_count, 1);
        assert_eq!(records[0].guardrails_count, 1);
        assert_eq!(records[0].reference_count, 1);
    }

    #[tokio::test]
    async fn test_budget_enforced_per_tier() {
        // Budget 40 tokens: mandates cap 20, guardrails 12, reference 8.
        let store = FakeStore::new()
            .with(MemoryTier::Mandates, &["m".repeat(60).as_str()]) // 15 tokens, fits
            .with(MemoryTier::Guardrails, &["g".repeat(100).as_str()]) // 25 tokens, over cap
            .with(MemoryTier::Reference, &["r".repeat(20).as_str()]); // 5 tokens, fits
        let injector = injector(
            store,
            MemorySettings {
                total_budget: 40,
                ..MemorySettings::default()
            },
        );

        let message = injector.inject(&query()).await.expect("injection");
        let text = message.content.as_text();
        assert!(text.contains("Mandates"));
        assert!(!text.contains("Guardrails"));
        assert!(text.contains("Reference"));

        let record = &injector.records()[0];
        assert_eq!(record.guardrails_count, 0);
        assert!(record.total_tokens <= 40);
    }

    #[tokio::test]
    async fn test_budget_disabled_injects_everything() {
        let big = "g".repeat(100_000);
        let store = FakeStore::new().with(MemoryTier::Guardrails, &[big.as_str()]);
        let injector = injector(
            store,
            MemorySettings {
                budget_enabled: false,
                total_budget: 10,
                ..MemorySettings::default()
            },
        );
        let message = injector.inject(&query()).await.expect("injection");
        assert!(message.content.as_text().contains("Guardrails"));
    }

    #[tokio::test]
    async fn test_store_failure_never_fails_injection() {
        let mut store = FakeStore::new()
            .with(MemoryTier::Mandates, &["mandate one"])
            .with(MemoryTier::Reference, &["ref one"]);
        store.fail_tier = Some(MemoryTier::Mandates);
        let injector = injector(store, MemorySettings::default());

        let message = injector.inject(&query()).await.expect("injection");
        let text = message.content.as_text();
        assert!(!text.contains("Mandates"));
        assert!(text.contains("Reference"));
    }

    #[tokio::test]
    async fn test_empty_store_yields_no_message_but_records() {
        let injector = injector(FakeStore::new(), MemorySettings::default());
        assert!(injector.inject(&query()).await.is_none());
        assert_eq!(injector.records().len(), 1);
        assert_eq!(injector.records()[0].total_tokens, 0);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Selected tokens never exceed the remaining budget.
        #[test]
        fn prop_selection_respects_budget(
            contents in prop::collection::vec(".{0,200}", 0..10),
            budget in 0u32..500,
        ) {
            let items: Vec<MemoryItem> =
                contents.iter().map(|c| MemoryItem::new(c.as_str())).collect();
            let result = select_within_budget(&items, budget);
            prop_assert!(result.tokens_used <= budget);
        }

        /// Selection preserves item order and counts tokens consistently.
        #[test]
        fn prop_selection_prefix_of_items(
            contents in prop::collection::vec("[a-z]{1,50}", 1..8),
            budget in 1u32..200,
        ) {
            let items: Vec<MemoryItem> =
                contents.iter().map(|c| MemoryItem::new(c.as_str())).collect();
            let result = select_within_budget(&items, budget);
            for (selected, original) in result.content.iter().zip(contents.iter()) {
                prop_assert_eq!(selected, original);
            }
            let recounted: u32 = result.content.iter().map(|c| count_tokens(c)).sum();
            prop_assert_eq!(recounted, result.tokens_used);
        }

        /// Variant assignment is pure in its inputs.
        #[test]
        fn prop_variant_pure(external in ".{0,40}", project in ".{0,40}") {
            let a = assign_variant(&external, &project);
            let b = assign_variant(&external, &project);
            prop_assert_eq!(a, b);
        }

        /// Token estimation is monotone in length for repeated characters.
        #[test]
        fn prop_count_tokens_monotone(len_a in 0usize..500, len_b in 0usize..500) {
            let (short, long) = if len_a <= len_b { (len_a, len_b) } else { (len_b, len_a) };
            prop_assert!(count_tokens(&"x".repeat(short)) <= count_tokens(&"x".repeat(long)));
        }
    }
}
