use crate::cache::ExpiringCache;
use crate::config::{NeighborConfig, NeighborOrder};
use crate::open_docs::{OpenDocuments, OpenTabNeighbors, RecencyFilter};
use crate::race::race;
use crate::related::{ProviderContext, RelatedFilesSource};
use crate::uri::{basename, relative_path};
use crate::workspace::WorkspaceResolver;
use context_protocol::{
    DocumentRef, NeighborBundle, NeighborFile, RelatedFilesResponse, SourceKind, TelemetryContext,
};
use futures::future::{self, BoxFuture, Shared};
use futures::FutureExt;
use indexmap::IndexMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Settled result of one related-files computation.
#[derive(Debug, Clone)]
enum RelatedOutcome {
    /// `None` when every provider failed.
    Resolved(Option<Arc<RelatedFilesResponse>>),
    /// The computation itself panicked or was aborted.
    Failed(Arc<str>),
}

impl RelatedOutcome {
    fn into_response(self) -> Option<Arc<RelatedFilesResponse>> {
        match self {
            Self::Resolved(response) => response,
            Self::Failed(_) => None,
        }
    }
}

/// A computation that is in flight or already settled; clones share one
/// upstream call.
type PendingRelated = Shared<BoxFuture<'static, RelatedOutcome>>;

/// Builds the neighbor-file bundle for a document.
///
/// Open-tab neighbors come from a [`RecencyFilter`]; related files come from
/// a [`RelatedFilesSource`] through a per-URI cache that
///
/// - shares one in-flight computation between concurrent callers,
/// - bounds caller latency with a race timeout while letting a slow
///   computation finish in the background and populate the cache,
/// - evicts computations that fail, and after `max_retry` consecutive
///   provider failures pins an empty result until the entry expires.
///
/// Shared computations run under a token owned by the aggregator, not the
/// first caller's, and are cancelled when the aggregator is dropped.
///
/// Must be called from within a tokio runtime.
pub struct NeighborAggregator {
    config: NeighborConfig,
    recency: RecencyFilter,
    source: Arc<dyn RelatedFilesSource>,
    workspace: Arc<dyn WorkspaceResolver>,
    cache: Arc<ExpiringCache<PendingRelated>>,
    empty: Arc<RelatedFilesResponse>,
    lifetime: CancellationToken,
}

impl NeighborAggregator {
    pub fn new(
        config: NeighborConfig,
        documents: Arc<dyn OpenDocuments>,
        source: Arc<dyn RelatedFilesSource>,
        workspace: Arc<dyn WorkspaceResolver>,
    ) -> Self {
        let budgets = &config.budgets;
        let recency = RecencyFilter::new(documents, workspace.clone(), budgets.max_aggregate_chars);
        let cache = Arc::new(ExpiringCache::new(
            budgets.cache_ttl(),
            budgets.cache_capacity,
        ));
        Self {
            config,
            recency,
            source,
            workspace,
            cache,
            empty: Arc::new(RelatedFilesResponse::empty()),
            lifetime: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &NeighborConfig {
        &self.config
    }

    /// Collects open-tab and related-file neighbors for `doc`.
    ///
    /// Never fails: provider errors, timeouts and unreadable files degrade to
    /// a smaller bundle. `force_computation` bypasses the cache and the race
    /// timeout and calls the source directly.
    ///
    /// `cancel` reaches providers only on the forced path. A cached
    /// computation is shared with other callers, so a cancelled caller still
    /// waits out the race and its cancellation never shapes the cached result.
    pub async fn get_neighbor_files_and_traits(
        &self,
        doc: &DocumentRef,
        telemetry: &TelemetryContext,
        cancel: Option<&CancellationToken>,
        force_computation: bool,
    ) -> NeighborBundle {
        let budgets = &self.config.budgets;
        let open_tabs = self
            .recency
            .get_neighbor_files(&doc.uri, &doc.language_id, budgets.max_files);

        if !self.config.related_files.language_enabled(&doc.language_id) {
            log::debug!("Related files disabled for {}", doc.language_id);
            return self.assemble(open_tabs, None, None);
        }
        let Some(root) = self.workspace.workspace_root_for(&doc.uri) else {
            log::debug!("{} is outside every workspace folder", doc.uri);
            return self.assemble(open_tabs, None, None);
        };

        let context = ProviderContext {
            language_id: doc.language_id.clone(),
            workspace_root: Some(root.clone()),
            telemetry: telemetry.clone(),
        };

        let related = if force_computation {
            let cancel = cancel.cloned().unwrap_or_default();
            let call = self.source.get_related_files(doc, &context, &cancel);
            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(response) => response.map(Arc::new),
                Err(_) => {
                    log::warn!("Related-files source panicked for {}", doc.uri);
                    None
                }
            }
        } else {
            self.cached_related_files(doc, context).await
        };

        self.assemble(open_tabs, related.as_deref(), Some(&root))
    }

    /// Drops every cached computation and retry counter. Call when the set of
    /// workspace folders changes.
    pub fn workspace_folders_changed(&self) {
        log::info!("Workspace folders changed, clearing related-files cache");
        self.cache.clear();
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn reset(&self) {
        self.cache.clear();
    }

    #[cfg(any(test, feature = "test-support"))]
    pub fn cached_retry_count(&self, uri: &str) -> Option<u32> {
        self.cache.retry_count(uri)
    }

    async fn cached_related_files(
        &self,
        doc: &DocumentRef,
        context: ProviderContext,
    ) -> Option<Arc<RelatedFilesResponse>> {
        let (pending, started) = self.cache.get_or_insert_with(&doc.uri, |generation| {
            self.spawn_computation(doc.clone(), context, generation)
        });
        if started {
            log::debug!("Related-files cache miss for {}", doc.uri);
        } else {
            log::debug!("Related-files cache hit for {}", doc.uri);
        }

        let fallback = RelatedOutcome::Resolved(Some(self.empty.clone()));
        let outcome = race(pending, self.config.budgets.race_timeout(), fallback).await;
        if outcome.timed_out() {
            log::debug!("Related files for {} not ready, using empty fallback", doc.uri);
        }
        outcome.into_inner().into_response()
    }

    /// Starts the upstream call as a detached task. The task settles the cache
    /// slot stored under `generation` before its result becomes visible to
    /// waiters; a slot replaced in the meantime is left alone.
    fn spawn_computation(
        &self,
        doc: DocumentRef,
        context: ProviderContext,
        generation: u64,
    ) -> PendingRelated {
        let source = self.source.clone();
        let cache = self.cache.clone();
        let empty = self.empty.clone();
        let max_retry = self.config.budgets.max_retry;
        let cancel = self.lifetime.child_token();
        let key = doc.uri.clone();

        let settle_cache = cache.clone();
        let task = tokio::spawn(async move {
            let call = source.get_related_files(&doc, &context, &cancel);
            let outcome = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(response) => RelatedOutcome::Resolved(response.map(Arc::new)),
                Err(_) => RelatedOutcome::Failed(Arc::from("related-files source panicked")),
            };
            settle(&settle_cache, &doc.uri, generation, &outcome, max_retry, empty);
            outcome
        });

        task.map(move |joined| joined_outcome(&cache, &key, generation, joined))
            .boxed()
            .shared()
    }

    fn assemble(
        &self,
        open_tabs: OpenTabNeighbors,
        related: Option<&RelatedFilesResponse>,
        root: Option<&Path>,
    ) -> NeighborBundle {
        let budgets = &self.config.budgets;
        let mut count = open_tabs.files.len();
        let mut total = open_tabs.total_chars();

        let mut related_files: IndexMap<String, NeighborFile> = IndexMap::new();
        let mut related_attribution: IndexMap<SourceKind, Vec<String>> = IndexMap::new();
        let mut traits = Vec::new();

        if let Some(related) = related {
            'types: for (kind, files) in &related.entries_by_type {
                for (uri, content) in files {
                    if open_tabs.files.contains_key(uri) || related_files.contains_key(uri) {
                        continue;
                    }
                    if count >= budgets.max_files {
                        break 'types;
                    }
                    if total.saturating_add(content.len()) > budgets.max_aggregate_chars {
                        continue;
                    }
                    count += 1;
                    total += content.len();
                    let rel = root.map_or_else(|| basename(uri), |root| relative_path(uri, root));
                    related_attribution
                        .entry(kind.clone())
                        .or_default()
                        .push(uri.clone());
                    related_files.insert(uri.clone(), NeighborFile::new(uri, rel, content));
                }
            }
            traits.extend(related.traits.iter().cloned());
        }

        let mut bundle = NeighborBundle {
            traits,
            ..NeighborBundle::default()
        };
        let open_attribution = (SourceKind::OpenTabs, open_tabs.attribution);
        match self.config.order {
            NeighborOrder::OpenTabsFirst => {
                bundle.files.extend(open_tabs.files);
                bundle.files.extend(related_files);
                bundle.attribution.extend([open_attribution]);
                bundle.attribution.extend(related_attribution);
            }
            NeighborOrder::RelatedFirst => {
                bundle.files.extend(related_files);
                bundle.files.extend(open_tabs.files);
                bundle.attribution.extend(related_attribution);
                bundle.attribution.extend([open_attribution]);
            }
        }
        bundle
    }
}

/// Post-resolution cache bookkeeping for the slot of `key` stored under
/// `generation`. No-op once that slot was cleared or replaced.
fn settle(
    cache: &ExpiringCache<PendingRelated>,
    key: &str,
    generation: u64,
    outcome: &RelatedOutcome,
    max_retry: u32,
    empty: Arc<RelatedFilesResponse>,
) {
    match outcome {
        RelatedOutcome::Resolved(Some(_)) => {}
        RelatedOutcome::Resolved(None) => {
            let Some(retries) = cache.bump_retry_count_if_current(key, generation) else {
                log::debug!("Dropping stale related-files failure for {key}");
                return;
            };
            if retries >= max_retry {
                log::info!(
                    "Related-files providers failed {retries} times for {key}, pinning empty result"
                );
                let pinned = RelatedOutcome::Resolved(Some(empty));
                cache.replace_if_current(key, generation, future::ready(pinned).boxed().shared());
            } else {
                cache.evict_value_if_current(key, generation);
            }
        }
        RelatedOutcome::Failed(reason) => {
            log::warn!("Related-files computation failed for {key}: {reason}");
            cache.delete_if_current(key, generation);
        }
    }
}

/// Outcome of the computation task. A task that never finished (aborted, or
/// the runtime shut down) did not settle its slot, so the slot is deleted here.
fn joined_outcome(
    cache: &ExpiringCache<PendingRelated>,
    key: &str,
    generation: u64,
    joined: Result<RelatedOutcome, JoinError>,
) -> RelatedOutcome {
    joined.unwrap_or_else(|err| {
        log::warn!("Related-files computation for {key} did not finish: {err}");
        cache.delete_if_current(key, generation);
        RelatedOutcome::Failed(Arc::from(err.to_string()))
    })
}

impl Drop for NeighborAggregator {
    fn drop(&mut self) {
        self.lifetime.cancel();
    }
}
