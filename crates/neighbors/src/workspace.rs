use crate::uri::file_uri_to_path;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Resolves the workspace folder that owns a document.
pub trait WorkspaceResolver: Send + Sync {
    fn workspace_root_for(&self, uri: &str) -> Option<PathBuf>;
}

/// The set of open workspace folders.
///
/// The owning folder of a URI is the deepest folder that contains it, so
/// nested folders take precedence over their parents.
#[derive(Debug, Default)]
pub struct WorkspaceFolders {
    roots: RwLock<Vec<PathBuf>>,
}

impl WorkspaceFolders {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let folders = Self::default();
        for root in roots {
            folders.add(root);
        }
        folders
    }

    /// Returns false when the folder was already present.
    pub fn add(&self, root: PathBuf) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        if roots.contains(&root) {
            return false;
        }
        roots.push(root);
        true
    }

    pub fn remove(&self, root: &Path) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        let before = roots.len();
        roots.retain(|r| r != root);
        roots.len() != before
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl WorkspaceResolver for WorkspaceFolders {
    fn workspace_root_for(&self, uri: &str) -> Option<PathBuf> {
        let path = file_uri_to_path(uri).ok()?;
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.components().count())
            .cloned()
    }
}
