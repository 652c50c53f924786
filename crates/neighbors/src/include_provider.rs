//! Built-in related-files provider for C-family `#include "..."` directives.

use crate::error::{NeighborError, Result};
use crate::reader::FileReader;
use crate::related::{ProviderContext, ProviderRegistry, RelatedFilesProvider};
use crate::uri::{file_uri_to_path, path_to_file_uri};
use async_trait::async_trait;
use context_protocol::{ContextTrait, ProviderResponse, RelatedFileEntry, SourceKind};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const INCLUDE_OWNER_ID: &str = "builtin.c-includes";
pub const INCLUDE_SOURCE_TAG: &str = "c-includes";
pub const INCLUDE_COUNT_TRAIT: &str = "includeCount";

/// Languages the include resolver registers for.
pub const INCLUDE_LANGUAGES: &[&str] = &["c", "cpp", "objective-c", "objective-cpp", "cuda-cpp"];

const QUOTED_INCLUDE: &str = r#"(?m)^[ \t]*#[ \t]*include[ \t]*"([^"\r\n]+)""#;

/// Resolves quoted includes of the current document against its directory,
/// then against each configured include directory in order.
///
/// Angle-bracket includes are system headers and are ignored.
pub struct IncludeProvider {
    reader: Arc<dyn FileReader>,
    include_dirs: Vec<PathBuf>,
    pattern: Regex,
}

impl IncludeProvider {
    pub fn new(reader: Arc<dyn FileReader>, include_dirs: Vec<PathBuf>) -> Result<Self> {
        let pattern = Regex::new(QUOTED_INCLUDE)
            .map_err(|e| NeighborError::Other(format!("include pattern: {e}")))?;
        Ok(Self {
            reader,
            include_dirs,
            pattern,
        })
    }

    /// Registers `self` for every C-family language under [`INCLUDE_OWNER_ID`].
    pub fn register(self: Arc<Self>, registry: &ProviderRegistry) {
        for language_id in INCLUDE_LANGUAGES {
            registry.register_provider(INCLUDE_OWNER_ID, language_id, self.clone());
        }
    }

    /// Include targets in order of appearance, duplicates removed.
    pub fn parse_includes<'a>(&self, source: &'a str) -> Vec<&'a str> {
        let mut seen = Vec::new();
        for caps in self.pattern.captures_iter(source) {
            if let Some(target) = caps.get(1).map(|m| m.as_str().trim()) {
                if !target.is_empty() && !seen.contains(&target) {
                    seen.push(target);
                }
            }
        }
        seen
    }

    async fn resolve(&self, document_dir: &Path, target: &str) -> Option<PathBuf> {
        let search_dirs =
            std::iter::once(document_dir).chain(self.include_dirs.iter().map(PathBuf::as_path));
        for dir in search_dirs {
            let candidate = dir.join(target);
            match tokio::fs::metadata(&candidate).await {
                Ok(meta) if meta.is_file() => return Some(candidate),
                _ => continue,
            }
        }
        None
    }
}

#[async_trait]
impl RelatedFilesProvider for IncludeProvider {
    async fn provide(
        &self,
        uri: &str,
        _context: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse> {
        if cancel.is_cancelled() {
            return Ok(ProviderResponse::empty());
        }
        let path = file_uri_to_path(uri)?;
        let document_dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| NeighborError::invalid_uri(uri))?;
        let source = self.reader.read_file_string(uri).await?;

        let targets = self.parse_includes(&source);
        let mut resolved = Vec::new();
        for target in &targets {
            if cancel.is_cancelled() {
                log::debug!("Include resolution for {uri} cancelled");
                return Ok(ProviderResponse::empty());
            }
            match self.resolve(&document_dir, target).await {
                Some(found) => {
                    let found_uri = path_to_file_uri(&found)?;
                    if found_uri != uri && !resolved.contains(&found_uri) {
                        resolved.push(found_uri);
                    }
                }
                None => log::trace!("Unresolved include \"{target}\" in {uri}"),
            }
        }

        Ok(ProviderResponse {
            entries: vec![RelatedFileEntry::new(
                SourceKind::language(INCLUDE_SOURCE_TAG),
                resolved,
            )],
            traits: vec![ContextTrait::new(
                INCLUDE_COUNT_TRAIT,
                targets.len().to_string(),
            )],
        })
    }
}
