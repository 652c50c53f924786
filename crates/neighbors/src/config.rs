use crate::error::{NeighborError, Result};
use context_protocol::NeighborBudgets;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

const ENV_PREFIX: &str = "CONTEXT_NEIGHBORS_";
const MAX_FILES_CEILING: usize = 500;
const MAX_CHARS_CEILING: usize = 10_000_000;
const MAX_RETRY_CEILING: u32 = 100;
const TIMEOUT_CEILING_MS: u64 = 60_000;

/// Full configuration for neighbor aggregation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(default)]
pub struct NeighborConfig {
    pub budgets: NeighborBudgets,
    pub related_files: RelatedFilesSettings,
    /// Which source is inserted into the bundle first
    pub order: NeighborOrder,
}

/// Insertion order of the bundle. Open tabs win duplicate URIs either way.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NeighborOrder {
    #[default]
    OpenTabsFirst,
    RelatedFirst,
}

/// Switches gating related-files providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(default)]
pub struct RelatedFilesSettings {
    /// Global switch, overridable per language
    pub enabled: bool,
    /// Per-language-id overrides of `enabled`
    pub language_overrides: BTreeMap<String, bool>,
    /// Provider owner ids that never run
    pub disabled_providers: Vec<String>,
}

impl Default for RelatedFilesSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            language_overrides: BTreeMap::new(),
            disabled_providers: Vec::new(),
        }
    }
}

impl RelatedFilesSettings {
    pub fn language_enabled(&self, language_id: &str) -> bool {
        self.language_overrides
            .get(language_id)
            .copied()
            .unwrap_or(self.enabled)
    }
}

/// Activation check consulted before each provider call.
pub trait ProviderActivation: Send + Sync {
    fn is_active(&self, language_id: &str, owner_id: &str) -> bool;
}

impl ProviderActivation for RelatedFilesSettings {
    fn is_active(&self, language_id: &str, owner_id: &str) -> bool {
        self.language_enabled(language_id)
            && !self.disabled_providers.iter().any(|owner| owner == owner_id)
    }
}

impl NeighborConfig {
    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with `CONTEXT_NEIGHBORS_*` overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides looked up by full variable name. Unparsable values are
    /// ignored; numeric values are clamped to sane ranges.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let budgets = &mut self.budgets;
        budgets.max_files = parse_clamped(
            var("MAX_FILES").as_deref(),
            budgets.max_files,
            1,
            MAX_FILES_CEILING,
        );
        budgets.max_aggregate_chars = parse_clamped(
            var("MAX_CHARS").as_deref(),
            budgets.max_aggregate_chars,
            1,
            MAX_CHARS_CEILING,
        );
        budgets.cache_ttl_ms = parse_clamped(
            var("CACHE_TTL_MS").as_deref(),
            budgets.cache_ttl_ms,
            1,
            u64::MAX,
        );
        budgets.max_retry = parse_clamped(
            var("MAX_RETRY").as_deref(),
            budgets.max_retry,
            1,
            MAX_RETRY_CEILING,
        );
        budgets.race_timeout_ms = parse_clamped(
            var("RACE_TIMEOUT_MS").as_deref(),
            budgets.race_timeout_ms,
            1,
            TIMEOUT_CEILING_MS,
        );
        if let Some(enabled) = var("RELATED_FILES").as_deref().and_then(parse_bool) {
            self.related_files.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.budgets.validate().map_err(NeighborError::invalid_config)
    }
}

fn parse_clamped<T>(raw: Option<&str>, default_value: T, min: T, max: T) -> T
where
    T: std::str::FromStr + Ord,
{
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .map_or(default_value, |v| v.clamp(min, max))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
