//! # Context Neighbors
//!
//! Neighbor-file context for code completion: picks the files most likely to
//! help a model complete code in the current document.
//!
//! ## Architecture
//!
//! ```text
//! DocumentRef
//!     │
//!     ├──> RecencyFilter (open editor documents)
//!     │      └─> Recently focused, same-language files
//!     │
//!     ├──> Expiring cache ──> race(timeout, empty)
//!     │      └─> ProviderRegistry (per-language providers)
//!     │             └─> Related files with content
//!     │
//!     └──> NeighborAggregator
//!            └─> NeighborBundle { files, attribution, traits }
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use context_neighbors::{
//!     DocumentTracker, FsFileReader, IncludeProvider, NeighborAggregator, NeighborConfig,
//!     NoExclusion, ProviderRegistry, WorkspaceFolders,
//! };
//! use context_protocol::{DocumentRef, TelemetryContext};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = NeighborConfig::from_env();
//!     let documents = Arc::new(DocumentTracker::new());
//!     let workspace = Arc::new(WorkspaceFolders::new([PathBuf::from("/project")]));
//!     let reader = Arc::new(FsFileReader::new());
//!
//!     let registry = ProviderRegistry::new(
//!         Arc::new(config.related_files.clone()),
//!         reader.clone(),
//!         Arc::new(NoExclusion),
//!     );
//!     Arc::new(IncludeProvider::new(reader, Vec::new())?).register(&registry);
//!
//!     let aggregator =
//!         NeighborAggregator::new(config, documents, Arc::new(registry), workspace);
//!     let doc = DocumentRef::new("file:///project/src/main.c", "c");
//!     let bundle = aggregator
//!         .get_neighbor_files_and_traits(&doc, &TelemetryContext::default(), None, false)
//!         .await;
//!
//!     println!("{} neighbor files", bundle.files.len());
//!     Ok(())
//! }
//! ```

mod aggregator;
mod cache;
mod config;
mod error;
mod exclusion;
mod include_provider;
mod language;
mod open_docs;
mod race;
mod reader;
mod related;
mod uri;
mod workspace;

pub use aggregator::NeighborAggregator;
pub use cache::ExpiringCache;
pub use config::{NeighborConfig, NeighborOrder, ProviderActivation, RelatedFilesSettings};
pub use error::{NeighborError, Result};
pub use exclusion::{ContentExclusion, NoExclusion, PathFilterExclusion};
pub use include_provider::{
    IncludeProvider, INCLUDE_COUNT_TRAIT, INCLUDE_LANGUAGES, INCLUDE_OWNER_ID, INCLUDE_SOURCE_TAG,
};
pub use language::{
    language_group, language_id_for_extension, language_id_for_path, languages_match,
};
pub use open_docs::{DocumentTracker, OpenDocument, OpenDocuments, OpenTabNeighbors, RecencyFilter};
pub use race::{race, race_with_fallback, RaceOutcome};
pub use reader::{FileReader, FsFileReader, OverlayFileReader};
pub use related::{
    provider_fn, ProviderContext, ProviderFn, ProviderRegistry, RelatedFilesProvider,
    RelatedFilesSource,
};
pub use uri::{basename, file_uri_to_path, is_file_uri, path_to_file_uri, relative_path};
pub use workspace::{WorkspaceFolders, WorkspaceResolver};
