use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub const NEIGHBOR_SCHEMA_VERSION: u32 = 1;

/// The document a completion is being requested for.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, JsonSchema)]
pub struct DocumentRef {
    pub uri: String,
    pub language_id: String,
}

impl DocumentRef {
    pub fn new(uri: impl Into<String>, language_id: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
        }
    }
}

/// Where a neighbor file came from. Only used for attribution.
///
/// Serialized as a plain string (`open_tabs`, `other`, `language:<tag>`) so it
/// can key JSON objects.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(into = "String", from = "String")]
pub enum SourceKind {
    OpenTabs,
    LanguageSpecific(String),
    Other,
}

impl SourceKind {
    const OPEN_TABS: &'static str = "open_tabs";
    const OTHER: &'static str = "other";
    const LANGUAGE_PREFIX: &'static str = "language:";

    pub fn language(tag: impl Into<String>) -> Self {
        Self::LanguageSpecific(tag.into())
    }

    pub const fn is_open_tabs(&self) -> bool {
        matches!(self, Self::OpenTabs)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenTabs => f.write_str(Self::OPEN_TABS),
            Self::Other => f.write_str(Self::OTHER),
            Self::LanguageSpecific(tag) => write!(f, "{}{tag}", Self::LANGUAGE_PREFIX),
        }
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.to_string()
    }
}

impl From<String> for SourceKind {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            Self::OPEN_TABS => Self::OpenTabs,
            Self::OTHER => Self::Other,
            other => match other.strip_prefix(Self::LANGUAGE_PREFIX) {
                Some(tag) => Self::LanguageSpecific(tag.to_string()),
                None => Self::LanguageSpecific(other.to_string()),
            },
        }
    }
}

/// Opaque name/value annotation passed through to prompt assembly.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ContextTrait {
    pub name: String,
    pub value: String,
}

impl ContextTrait {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A candidate context file with its resolved text.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NeighborFile {
    pub uri: String,
    pub relative_path: String,
    pub content: String,
}

impl NeighborFile {
    pub fn new(
        uri: impl Into<String>,
        relative_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }

    /// Size charged against the aggregate budget.
    #[must_use]
    pub fn budget_len(&self) -> usize {
        self.content.len()
    }
}

/// One `(type, uris[])` entry returned by a related-files provider.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RelatedFileEntry {
    pub kind: SourceKind,
    pub uris: Vec<String>,
}

impl RelatedFileEntry {
    pub fn new(kind: SourceKind, uris: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            uris: uris.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a single provider callback answers with.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProviderResponse {
    pub entries: Vec<RelatedFileEntry>,
    #[serde(default)]
    pub traits: Vec<ContextTrait>,
}

impl ProviderResponse {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Merged, content-resolved output of every provider for one document.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RelatedFilesResponse {
    pub entries_by_type: IndexMap<SourceKind, IndexMap<String, String>>,
    #[serde(default)]
    pub traits: Vec<ContextTrait>,
}

impl RelatedFilesResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn file_count(&self) -> usize {
        self.entries_by_type.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.file_count() == 0 && self.traits.is_empty()
    }
}

/// Final neighbor set handed to prompt assembly.
///
/// `files` is keyed by URI and ordered by priority. `attribution` lists, per
/// source, the URIs that source contributed.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct NeighborBundle {
    pub files: IndexMap<String, NeighborFile>,
    pub attribution: IndexMap<SourceKind, Vec<String>>,
    #[serde(default)]
    pub traits: Vec<ContextTrait>,
}

impl NeighborBundle {
    pub fn total_chars(&self) -> usize {
        self.files.values().map(NeighborFile::budget_len).sum()
    }

    pub fn uris_for(&self, kind: &SourceKind) -> &[String] {
        self.attribution
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.files.contains_key(uri)
    }
}

/// Opaque per-request telemetry data threaded through to providers.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct TelemetryContext {
    pub request_id: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TelemetryContext {
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            properties: BTreeMap::new(),
        }
    }
}

/// Size, latency and retry limits for neighbor aggregation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(default)]
pub struct NeighborBudgets {
    /// Maximum number of files in a bundle.
    pub max_files: usize,
    /// Maximum summed content size (UTF-8 bytes) of a bundle.
    pub max_aggregate_chars: usize,
    pub cache_ttl_ms: u64,
    /// LRU capacity of the related-files cache.
    pub cache_capacity: usize,
    /// Consecutive provider failures tolerated before pinning an empty result.
    pub max_retry: u32,
    pub race_timeout_ms: u64,
}

impl Default for NeighborBudgets {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_aggregate_chars: 200_000,
            cache_ttl_ms: 120_000,
            cache_capacity: 200,
            max_retry: 3,
            race_timeout_ms: 200,
        }
    }
}

impl NeighborBudgets {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn race_timeout(&self) -> Duration {
        Duration::from_millis(self.race_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_files == 0 {
            return Err("max_files must be > 0".to_string());
        }
        if self.max_aggregate_chars == 0 {
            return Err("max_aggregate_chars must be > 0".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be > 0".to_string());
        }
        if self.max_retry == 0 {
            return Err("max_retry must be > 0".to_string());
        }
        if self.race_timeout_ms == 0 {
            return Err("race_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}
