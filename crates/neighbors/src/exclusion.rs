use crate::error::{NeighborError, Result};
use crate::uri::{basename, is_file_uri, relative_path};
use crate::workspace::WorkspaceResolver;
use async_trait::async_trait;
use std::sync::Arc;

/// Content-exclusion policy. Callers treat an `Err` as "excluded".
#[async_trait]
pub trait ContentExclusion: Send + Sync {
    async fn is_excluded(&self, uri: &str) -> Result<bool>;
}

/// Excludes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExclusion;

#[async_trait]
impl ContentExclusion for NoExclusion {
    async fn is_excluded(&self, _uri: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Path-rule exclusion evaluated on workspace-relative paths.
///
/// A path is allowed when it matches one of the include prefixes (if any are
/// set), none of the exclude prefixes, and the file pattern (substring, or
/// glob when it contains `*`/`?`).
pub struct PathFilterExclusion {
    workspace: Arc<dyn WorkspaceResolver>,
    include_paths: Vec<String>,
    exclude_paths: Vec<String>,
    file_pattern: Option<FilePattern>,
}

enum FilePattern {
    Substring(String),
    Glob(glob::Pattern),
}

impl PathFilterExclusion {
    pub fn new(
        workspace: Arc<dyn WorkspaceResolver>,
        include_paths: &[String],
        exclude_paths: &[String],
        file_pattern: Option<&str>,
    ) -> Result<Self> {
        let file_pattern = match file_pattern.map(str::trim).filter(|p| !p.is_empty()) {
            None => None,
            Some(p) if !p.contains('*') && !p.contains('?') => {
                Some(FilePattern::Substring(p.to_string()))
            }
            Some(p) => Some(FilePattern::Glob(glob::Pattern::new(p).map_err(|e| {
                NeighborError::invalid_config(format!("file pattern '{p}': {e}"))
            })?)),
        };
        Ok(Self {
            workspace,
            include_paths: normalize_all(include_paths),
            exclude_paths: normalize_all(exclude_paths),
            file_pattern,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.include_paths.is_empty()
            || !self.exclude_paths.is_empty()
            || self.file_pattern.is_some()
    }

    fn path_allowed(&self, rel_path: &str) -> bool {
        let rel_path = rel_path.replace('\\', "/");

        if !self.include_paths.is_empty()
            && !self
                .include_paths
                .iter()
                .any(|include| path_prefix_matches(include, &rel_path))
        {
            return false;
        }

        if self
            .exclude_paths
            .iter()
            .any(|exclude| path_prefix_matches(exclude, &rel_path))
        {
            return false;
        }

        match &self.file_pattern {
            None => true,
            Some(FilePattern::Substring(needle)) => rel_path.contains(needle.as_str()),
            Some(FilePattern::Glob(pattern)) => pattern.matches(&rel_path),
        }
    }
}

#[async_trait]
impl ContentExclusion for PathFilterExclusion {
    async fn is_excluded(&self, uri: &str) -> Result<bool> {
        if !is_file_uri(uri) {
            return Err(NeighborError::invalid_uri(uri));
        }
        if !self.is_active() {
            return Ok(false);
        }
        let rel = match self.workspace.workspace_root_for(uri) {
            Some(root) => relative_path(uri, &root),
            None => basename(uri),
        };
        Ok(!self.path_allowed(&rel))
    }
}

fn normalize_all(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|p| normalize_filter_path(p))
        .filter(|p| !p.is_empty())
        .collect()
}

fn normalize_filter_path(raw: &str) -> String {
    let mut value = raw.trim().replace('\\', "/");
    while let Some(rest) = value.strip_prefix("./") {
        value = rest.to_string();
    }
    let value = value.trim_matches('/');
    if value == "." {
        return String::new();
    }
    value.to_string()
}

fn path_prefix_matches(prefix: &str, path: &str) -> bool {
    if path == prefix {
        return true;
    }
    path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/')
}
