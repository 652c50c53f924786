//! Related-files providers and the per-language multiplexer that fans out to
//! them.

use crate::config::ProviderActivation;
use crate::error::Result;
use crate::exclusion::ContentExclusion;
use crate::reader::FileReader;
use async_trait::async_trait;
use context_protocol::{
    DocumentRef, ProviderResponse, RelatedFilesResponse, SourceKind, TelemetryContext,
};
use futures::future::join_all;
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

const BOM: char = '\u{feff}';

/// Opaque context handed to every provider call.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub language_id: String,
    pub workspace_root: Option<PathBuf>,
    pub telemetry: TelemetryContext,
}

/// A per-language related-files callback.
///
/// Returning `Err` means "no response" for this call; it never affects other
/// providers. Implementations should return early once `cancel` fires.
#[async_trait]
pub trait RelatedFilesProvider: Send + Sync {
    async fn provide(
        &self,
        uri: &str,
        context: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse>;
}

/// Adapts an async closure into a [`RelatedFilesProvider`].
pub struct ProviderFn<F>(F);

pub fn provider_fn<F, Fut>(f: F) -> ProviderFn<F>
where
    F: Fn(String, ProviderContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProviderResponse>> + Send + 'static,
{
    ProviderFn(f)
}

#[async_trait]
impl<F, Fut> RelatedFilesProvider for ProviderFn<F>
where
    F: Fn(String, ProviderContext, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ProviderResponse>> + Send + 'static,
{
    async fn provide(
        &self,
        uri: &str,
        context: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse> {
        (self.0)(uri.to_string(), context.clone(), cancel.clone()).await
    }
}

/// Abstract related-files source consulted by the aggregator.
///
/// `None` signals that every provider failed, which callers treat as a
/// retryable condition, as opposed to an empty response.
#[async_trait]
pub trait RelatedFilesSource: Send + Sync {
    async fn get_related_files(
        &self,
        doc: &DocumentRef,
        context: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Option<RelatedFilesResponse>;
}

type ProviderMap = HashMap<String, IndexMap<String, Arc<dyn RelatedFilesProvider>>>;

/// Registry of providers keyed by `(language_id, owner_id)` that multiplexes
/// a document to every active provider for its language.
pub struct ProviderRegistry {
    providers: RwLock<ProviderMap>,
    activation: Arc<dyn ProviderActivation>,
    reader: Arc<dyn FileReader>,
    exclusion: Arc<dyn ContentExclusion>,
}

impl ProviderRegistry {
    pub fn new(
        activation: Arc<dyn ProviderActivation>,
        reader: Arc<dyn FileReader>,
        exclusion: Arc<dyn ContentExclusion>,
    ) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            activation,
            reader,
            exclusion,
        }
    }

    /// Registers `provider`, replacing any previous one for the same owner
    /// and language.
    pub fn register_provider(
        &self,
        owner_id: &str,
        language_id: &str,
        provider: Arc<dyn RelatedFilesProvider>,
    ) {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let previous = providers
            .entry(language_id.to_string())
            .or_default()
            .insert(owner_id.to_string(), provider);
        if previous.is_some() {
            log::debug!("Replaced related-files provider {owner_id} for {language_id}");
        }
    }

    /// Removes the registration only if it still holds `provider`, so a stale
    /// unregister cannot drop a newer replacement.
    pub fn unregister_provider(
        &self,
        owner_id: &str,
        language_id: &str,
        provider: &Arc<dyn RelatedFilesProvider>,
    ) -> bool {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        let Some(by_owner) = providers.get_mut(language_id) else {
            return false;
        };
        let matches = by_owner
            .get(owner_id)
            .is_some_and(|current| std::ptr::addr_eq(Arc::as_ptr(current), Arc::as_ptr(provider)));
        if !matches {
            return false;
        }
        by_owner.shift_remove(owner_id);
        if by_owner.is_empty() {
            providers.remove(language_id);
        }
        true
    }

    pub fn provider_count(&self, language_id: &str) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(language_id)
            .map_or(0, IndexMap::len)
    }

    fn active_providers(&self, language_id: &str) -> Vec<(String, Arc<dyn RelatedFilesProvider>)> {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        providers
            .get(language_id)
            .into_iter()
            .flatten()
            .filter(|(owner, _)| self.activation.is_active(language_id, owner))
            .map(|(owner, provider)| (owner.clone(), provider.clone()))
            .collect()
    }

    async fn call_provider(
        owner: &str,
        provider: &dyn RelatedFilesProvider,
        uri: &str,
        context: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Option<ProviderResponse> {
        let call = AssertUnwindSafe(provider.provide(uri, context, cancel)).catch_unwind();
        match call.await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(err)) => {
                log::warn!("Related-files provider {owner} failed for {uri}: {err}");
                None
            }
            Err(_) => {
                log::warn!("Related-files provider {owner} panicked for {uri}");
                None
            }
        }
    }

    /// Reads `uri`, dropping it when unreadable, empty or excluded.
    async fn resolve_content(&self, uri: &str) -> Option<String> {
        let content = match self.reader.read_file_string(uri).await {
            Ok(content) => content,
            Err(err) => {
                log::debug!("Dropping related file {uri}: {err}");
                return None;
            }
        };
        let content = if content.starts_with(BOM) {
            content[BOM.len_utf8()..].to_string()
        } else {
            content
        };
        if content.is_empty() {
            return None;
        }
        match self.exclusion.is_excluded(uri).await {
            Ok(false) => Some(content),
            Ok(true) => None,
            Err(err) => {
                log::warn!("Exclusion check failed for {uri}, treating as excluded: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl RelatedFilesSource for ProviderRegistry {
    async fn get_related_files(
        &self,
        doc: &DocumentRef,
        context: &ProviderContext,
        cancel: &CancellationToken,
    ) -> Option<RelatedFilesResponse> {
        let providers = self.active_providers(&doc.language_id);
        if providers.is_empty() {
            return Some(RelatedFilesResponse::empty());
        }

        let calls = providers.iter().map(|(owner, provider)| {
            Self::call_provider(owner, provider.as_ref(), &doc.uri, context, cancel)
        });
        let responses: Vec<ProviderResponse> =
            join_all(calls).await.into_iter().flatten().collect();
        if responses.is_empty() {
            log::debug!(
                "All {} related-files providers failed for {}",
                providers.len(),
                doc.uri
            );
            return None;
        }

        let mut requested: Vec<(SourceKind, String)> = Vec::new();
        let mut traits = Vec::new();
        for response in responses {
            for entry in response.entries {
                requested.extend(entry.uris.into_iter().map(|uri| (entry.kind.clone(), uri)));
            }
            traits.extend(response.traits);
        }

        let mut unique: Vec<&str> = requested.iter().map(|(_, uri)| uri.as_str()).collect();
        unique.sort_unstable();
        unique.dedup();
        let contents: HashMap<&str, String> = join_all(unique.into_iter().map(|uri| async move {
            self.resolve_content(uri).await.map(|content| (uri, content))
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        let mut entries_by_type: IndexMap<SourceKind, IndexMap<String, String>> = IndexMap::new();
        for (kind, uri) in &requested {
            if let Some(content) = contents.get(uri.as_str()) {
                entries_by_type
                    .entry(kind.clone())
                    .or_default()
                    .insert(uri.clone(), content.clone());
            }
        }

        Some(RelatedFilesResponse {
            entries_by_type,
            traits,
        })
    }
}
