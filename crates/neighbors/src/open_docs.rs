//! Open-editor neighbors: a recency-ordered, language-matched, size-budgeted
//! subset of the currently open documents.

use crate::language::languages_match;
use crate::uri::{basename, is_file_uri, relative_path};
use crate::workspace::WorkspaceResolver;
use context_protocol::NeighborFile;
use indexmap::IndexMap;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A document currently open in the editor.
#[derive(Debug, Clone)]
pub struct OpenDocument {
    pub uri: String,
    pub language_id: String,
    pub content: Arc<str>,
    /// Focus tick; larger is more recent. `None` if never focused.
    pub last_focused: Option<i64>,
}

impl OpenDocument {
    pub fn new(
        uri: impl Into<String>,
        language_id: impl Into<String>,
        content: impl Into<Arc<str>>,
        last_focused: Option<i64>,
    ) -> Self {
        Self {
            uri: uri.into(),
            language_id: language_id.into(),
            content: content.into(),
            last_focused,
        }
    }
}

/// Source of the currently open documents.
pub trait OpenDocuments: Send + Sync {
    fn open_documents(&self) -> Vec<OpenDocument>;
}

/// In-process open-document store fed by editor events.
#[derive(Debug, Default)]
pub struct DocumentTracker {
    documents: RwLock<IndexMap<String, OpenDocument>>,
    clock: AtomicI64,
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, uri: &str, language_id: &str, content: impl Into<Arc<str>>) {
        let mut docs = self.write();
        let last_focused = docs.get(uri).and_then(|doc| doc.last_focused);
        docs.insert(
            uri.to_string(),
            OpenDocument::new(uri, language_id, content, last_focused),
        );
    }

    /// Returns false for unknown documents.
    pub fn update(&self, uri: &str, content: impl Into<Arc<str>>) -> bool {
        match self.write().get_mut(uri) {
            Some(doc) => {
                doc.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Marks `uri` as the most recently focused document.
    pub fn focus(&self, uri: &str) -> bool {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        match self.write().get_mut(uri) {
            Some(doc) => {
                doc.last_focused = Some(tick);
                true
            }
            None => false,
        }
    }

    pub fn close(&self, uri: &str) -> bool {
        self.write().shift_remove(uri).is_some()
    }

    /// Open documents in the order they were first opened.
    pub fn snapshot(&self) -> Vec<OpenDocument> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, OpenDocument>> {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl OpenDocuments for DocumentTracker {
    fn open_documents(&self) -> Vec<OpenDocument> {
        self.snapshot()
    }
}

/// Open-tab neighbors, in acceptance order.
#[derive(Debug, Clone, Default)]
pub struct OpenTabNeighbors {
    pub files: IndexMap<String, NeighborFile>,
    pub attribution: Vec<String>,
}

impl OpenTabNeighbors {
    pub fn total_chars(&self) -> usize {
        self.files.values().map(NeighborFile::budget_len).sum()
    }
}

pub struct RecencyFilter {
    documents: Arc<dyn OpenDocuments>,
    workspace: Arc<dyn WorkspaceResolver>,
    max_aggregate_chars: usize,
}

impl RecencyFilter {
    pub fn new(
        documents: Arc<dyn OpenDocuments>,
        workspace: Arc<dyn WorkspaceResolver>,
        max_aggregate_chars: usize,
    ) -> Self {
        Self {
            documents,
            workspace,
            max_aggregate_chars,
        }
    }

    /// Greedy fill by recency.
    ///
    /// Walks open documents most-recently-focused first and accepts those that
    /// are real files in a matching language, other than `current_uri`, until
    /// `max_files` are taken. A document that would overflow the size budget is
    /// skipped and the walk continues with smaller candidates.
    pub fn get_neighbor_files(
        &self,
        current_uri: &str,
        current_language_id: &str,
        max_files: usize,
    ) -> OpenTabNeighbors {
        let mut docs = self.documents.open_documents();
        // Stable: ties keep the source order. `None` sorts after every tick.
        docs.sort_by_key(|doc| Reverse(doc.last_focused.map_or(i128::MIN, i128::from)));

        let mut result = OpenTabNeighbors::default();
        let mut total = 0usize;
        for doc in docs {
            if result.files.len() >= max_files {
                break;
            }
            if doc.uri == current_uri
                || !is_file_uri(&doc.uri)
                || !languages_match(current_language_id, &doc.language_id)
                || result.files.contains_key(&doc.uri)
            {
                continue;
            }
            let size = doc.content.len();
            if total.saturating_add(size) > self.max_aggregate_chars {
                log::debug!(
                    "Skipping open document {} ({size} bytes) over neighbor budget",
                    doc.uri
                );
                continue;
            }
            total += size;
            let rel = match self.workspace.workspace_root_for(&doc.uri) {
                Some(root) => relative_path(&doc.uri, &root),
                None => basename(&doc.uri),
            };
            result.attribution.push(doc.uri.clone());
            result.files.insert(
                doc.uri.clone(),
                NeighborFile::new(doc.uri, rel, doc.content.as_ref()),
            );
        }
        result
    }
}
