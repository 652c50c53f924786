use async_trait::async_trait;
use context_neighbors::{
    provider_fn, DocumentTracker, FileReader, NeighborAggregator, NeighborConfig, NeighborError,
    NoExclusion, ProviderContext, ProviderRegistry, RelatedFilesSettings, Result,
    WorkspaceFolders,
};
use context_protocol::{
    ContextTrait, DocumentRef, ProviderResponse, RelatedFileEntry, SourceKind, TelemetryContext,
};
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct MemoryReader(HashMap<String, String>);

#[async_trait]
impl FileReader for MemoryReader {
    async fn read_file_string(&self, uri: &str) -> Result<String> {
        self.0
            .get(uri)
            .cloned()
            .ok_or_else(|| NeighborError::Other(format!("{uri}: not found")))
    }
}

struct Harness {
    tracker: Arc<DocumentTracker>,
    registry: Arc<ProviderRegistry>,
    aggregator: NeighborAggregator,
}

fn harness(config: NeighborConfig, root: &str, files: &[(&str, &str)]) -> Harness {
    let files = files
        .iter()
        .map(|(uri, content)| ((*uri).to_string(), (*content).to_string()))
        .collect();
    let tracker = Arc::new(DocumentTracker::new());
    let registry = Arc::new(ProviderRegistry::new(
        Arc::new(RelatedFilesSettings::default()),
        Arc::new(MemoryReader(files)),
        Arc::new(NoExclusion),
    ));
    let aggregator = NeighborAggregator::new(
        config,
        tracker.clone(),
        registry.clone(),
        Arc::new(WorkspaceFolders::new([PathBuf::from(root)])),
    );
    Harness {
        tracker,
        registry,
        aggregator,
    }
}

fn fixed(kind: &str, uris: &[&str]) -> ProviderResponse {
    ProviderResponse {
        entries: vec![RelatedFileEntry::new(
            SourceKind::language(kind),
            uris.iter().copied(),
        )],
        traits: Vec::new(),
    }
}

async fn explode() -> Result<ProviderResponse> {
    panic!("provider bug")
}

async fn neighbors(h: &Harness, doc: &DocumentRef) -> context_protocol::NeighborBundle {
    h.aggregator
        .get_neighbor_files_and_traits(doc, &TelemetryContext::default(), None, false)
        .await
}

#[tokio::test]
async fn javascript_provider_contributes_file_content() {
    let h = harness(
        NeighborConfig::default(),
        "/",
        &[("file:///j2.js", "// js dummy")],
    );
    h.registry.register_provider(
        "ext.js",
        "javascript",
        Arc::new(provider_fn(|uri: String, _ctx, _cancel| async move {
            assert_eq!(uri, "file:///j.js");
            Ok(fixed("X", &["file:///j2.js"]))
        })),
    );

    let bundle = neighbors(&h, &DocumentRef::new("file:///j.js", "javascript")).await;

    assert_eq!(bundle.files.len(), 1);
    let file = &bundle.files["file:///j2.js"];
    assert_eq!(file.content, "// js dummy");
    assert_eq!(file.relative_path, "j2.js");
    assert_eq!(
        bundle.uris_for(&SourceKind::language("X")),
        ["file:///j2.js".to_string()]
    );
    assert!(bundle.uris_for(&SourceKind::OpenTabs).is_empty());
}

#[tokio::test]
async fn repeated_calls_return_the_same_files() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[("file:///ws/util.py", "def util(): ...")],
    );
    h.tracker.open("file:///ws/a.py", "python", "import util");
    h.tracker.focus("file:///ws/a.py");
    h.registry.register_provider(
        "ext.py",
        "python",
        Arc::new(provider_fn(|_uri, _ctx, _cancel| async {
            Ok(fixed("python-imports", &["file:///ws/util.py"]))
        })),
    );

    let doc = DocumentRef::new("file:///ws/main.py", "python");
    let first = neighbors(&h, &doc).await;
    let second = neighbors(&h, &doc).await;

    let keys = |b: &context_protocol::NeighborBundle| b.files.keys().cloned().collect::<Vec<_>>();
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(
        keys(&first),
        vec!["file:///ws/a.py".to_string(), "file:///ws/util.py".to_string()]
    );
}

#[tokio::test]
async fn budgets_hold_across_both_sources() {
    let config = NeighborConfig {
        budgets: context_protocol::NeighborBudgets {
            max_files: 3,
            max_aggregate_chars: 20,
            ..Default::default()
        },
        ..NeighborConfig::default()
    };
    let h = harness(
        config,
        "/ws",
        &[
            ("file:///ws/r1.rs", "012345678901234"),
            ("file:///ws/r2.rs", "01234"),
            ("file:///ws/r3.rs", "01"),
            ("file:///ws/r4.rs", "0"),
        ],
    );
    h.tracker.open("file:///ws/open.rs", "rust", "012345");
    h.tracker.focus("file:///ws/open.rs");
    h.registry.register_provider(
        "ext.rs",
        "rust",
        Arc::new(provider_fn(|_uri, _ctx, _cancel| async {
            Ok(fixed(
                "rust-mods",
                &[
                    "file:///ws/r1.rs",
                    "file:///ws/r2.rs",
                    "file:///ws/r3.rs",
                    "file:///ws/r4.rs",
                ],
            ))
        })),
    );

    let bundle = neighbors(&h, &DocumentRef::new("file:///ws/main.rs", "rust")).await;

    assert!(bundle.files.len() <= 3);
    assert!(bundle.total_chars() <= 20);
    let keys: Vec<&String> = bundle.files.keys().collect();
    assert_eq!(
        keys,
        vec!["file:///ws/open.rs", "file:///ws/r2.rs", "file:///ws/r3.rs"]
    );
}

#[tokio::test]
async fn open_tabs_win_duplicate_uris() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[
            ("file:///ws/shared.h", "on disk"),
            ("file:///ws/other.h", "other"),
        ],
    );
    h.tracker.open("file:///ws/shared.h", "c", "unsaved buffer");
    h.tracker.focus("file:///ws/shared.h");
    h.registry.register_provider(
        "ext.c",
        "cpp",
        Arc::new(provider_fn(|_uri, _ctx, _cancel| async {
            Ok(fixed("c-includes", &["file:///ws/shared.h", "file:///ws/other.h"]))
        })),
    );

    let bundle = neighbors(&h, &DocumentRef::new("file:///ws/main.cpp", "cpp")).await;

    assert_eq!(bundle.files["file:///ws/shared.h"].content, "unsaved buffer");
    let open: HashSet<&String> = bundle.uris_for(&SourceKind::OpenTabs).iter().collect();
    for (kind, uris) in &bundle.attribution {
        if kind.is_open_tabs() {
            continue;
        }
        assert!(uris.iter().all(|uri| !open.contains(uri)));
    }
    assert_eq!(
        bundle.uris_for(&SourceKind::language("c-includes")),
        ["file:///ws/other.h".to_string()]
    );
}

#[tokio::test]
async fn failing_provider_is_called_max_retry_times() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.broken",
        "go",
        Arc::new(provider_fn(move |_uri, _ctx, _cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(NeighborError::provider("ext.broken", "boom")) }
        })),
    );

    let doc = DocumentRef::new("file:///ws/main.go", "go");
    for _ in 0..6 {
        let bundle = neighbors(&h, &doc).await;
        assert!(bundle.files.is_empty());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    h.aggregator.reset();
    neighbors(&h, &doc).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn pinned_empty_result_expires_with_ttl() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    let ttl = h.aggregator.config().budgets.cache_ttl();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.broken",
        "go",
        Arc::new(provider_fn(move |_uri, _ctx, _cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(NeighborError::provider("ext.broken", "boom")) }
        })),
    );

    let doc = DocumentRef::new("file:///ws/main.go", "go");
    for _ in 0..4 {
        neighbors(&h, &doc).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    tokio::time::sleep(ttl - Duration::from_secs(1)).await;
    neighbors(&h, &doc).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3, "still pinned");

    tokio::time::sleep(Duration::from_secs(2)).await;
    neighbors(&h, &doc).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(h.aggregator.cached_retry_count("file:///ws/main.go"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn computation_started_before_workspace_change_leaves_new_entry_alone() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.slow",
        "go",
        Arc::new(provider_fn(move |_uri, _ctx, _cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Err(NeighborError::provider("ext.slow", "boom"))
            }
        })),
    );

    let uri = "file:///ws/main.go";
    let doc = DocumentRef::new(uri, "go");
    let start = tokio::time::Instant::now();
    neighbors(&h, &doc).await;
    h.aggregator.workspace_folders_changed();

    tokio::time::sleep_until(start + Duration::from_millis(500)).await;
    neighbors(&h, &doc).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The first computation has failed by now; the second is still running.
    tokio::time::sleep_until(start + Duration::from_millis(1_100)).await;
    assert_eq!(h.aggregator.cached_retry_count(uri), Some(0));
    neighbors(&h, &doc).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep_until(start + Duration::from_millis(1_600)).await;
    assert_eq!(h.aggregator.cached_retry_count(uri), Some(1));
}

#[tokio::test]
async fn panicking_provider_degrades_to_empty_bundle() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    h.tracker.open("file:///ws/a.go", "go", "package a");
    h.registry.register_provider(
        "ext.panics",
        "go",
        Arc::new(provider_fn(|_uri, _ctx, _cancel| explode())),
    );

    let bundle = neighbors(&h, &DocumentRef::new("file:///ws/main.go", "go")).await;
    let keys: Vec<&String> = bundle.files.keys().collect();
    assert_eq!(keys, vec!["file:///ws/a.go"]);
}

#[tokio::test(start_paused = true)]
async fn slow_provider_populates_cache_after_timeout() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[("file:///ws/slow.ts", "export const slow = 1;")],
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.ts",
        "typescript",
        Arc::new(provider_fn(move |_uri, _ctx, _cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(fixed("ts-imports", &["file:///ws/slow.ts"]))
            }
        })),
    );

    let doc = DocumentRef::new("file:///ws/main.ts", "typescript");
    let started = tokio::time::Instant::now();
    let first = neighbors(&h, &doc).await;
    assert!(first.files.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(2)).await;

    let second = neighbors(&h, &doc).await;
    assert!(second.contains("file:///ws/slow.ts"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_computation() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[("file:///ws/dep.py", "x = 1")],
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.py",
        "python",
        Arc::new(provider_fn(move |_uri, _ctx, _cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(fixed("python-imports", &["file:///ws/dep.py"]))
            }
        })),
    );

    let doc = DocumentRef::new("file:///ws/main.py", "python");
    let (a, b, c) = tokio::join!(neighbors(&h, &doc), neighbors(&h, &doc), neighbors(&h, &doc));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for bundle in [a, b, c] {
        assert!(bundle.contains("file:///ws/dep.py"));
    }
}

#[tokio::test]
async fn traits_pass_through_without_files() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    h.registry.register_provider(
        "ext.traits",
        "rust",
        Arc::new(provider_fn(|_uri, _ctx, _cancel| async {
            Ok(ProviderResponse {
                entries: vec![RelatedFileEntry::new(
                    SourceKind::language("rust-mods"),
                    ["file:///ws/missing.rs"],
                )],
                traits: vec![ContextTrait::new("crateKind", "lib")],
            })
        })),
    );

    let bundle = neighbors(&h, &DocumentRef::new("file:///ws/lib.rs", "rust")).await;
    assert!(bundle.files.is_empty());
    assert_eq!(bundle.traits, vec![ContextTrait::new("crateKind", "lib")]);
}

#[tokio::test]
async fn document_outside_workspace_gets_open_tabs_only() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[("file:///elsewhere/dep.rs", "fn dep() {}")],
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.rs",
        "rust",
        Arc::new(provider_fn(move |_uri, _ctx, _cancel| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(fixed("rust-mods", &["file:///elsewhere/dep.rs"])) }
        })),
    );
    h.tracker.open("file:///ws/open.rs", "rust", "fn open() {}");

    let bundle = neighbors(&h, &DocumentRef::new("file:///elsewhere/main.rs", "rust")).await;
    let keys: Vec<&String> = bundle.files.keys().collect();
    assert_eq!(keys, vec!["file:///ws/open.rs"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_caller_does_not_empty_cache_for_others() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[("file:///ws/dep.rs", "fn dep() {}")],
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    h.registry.register_provider(
        "ext.rs",
        "rust",
        Arc::new(provider_fn(move |_uri, _ctx, cancel: CancellationToken| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if cancel.is_cancelled() {
                    return Ok(ProviderResponse::empty());
                }
                Ok(fixed("rust-mods", &["file:///ws/dep.rs"]))
            }
        })),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let doc = DocumentRef::new("file:///ws/main.rs", "rust");
    let first = h
        .aggregator
        .get_neighbor_files_and_traits(&doc, &TelemetryContext::default(), Some(&cancel), false)
        .await;
    assert!(first.contains("file:///ws/dep.rs"));

    let second = neighbors(&h, &doc).await;
    assert!(second.contains("file:///ws/dep.rs"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn forced_computation_honors_caller_cancellation() {
    let h = harness(
        NeighborConfig::default(),
        "/ws",
        &[("file:///ws/dep.rs", "fn dep() {}")],
    );
    h.registry.register_provider(
        "ext.rs",
        "rust",
        Arc::new(provider_fn(|_uri, _ctx, cancel: CancellationToken| async move {
            if cancel.is_cancelled() {
                return Ok(ProviderResponse::empty());
            }
            Ok(fixed("rust-mods", &["file:///ws/dep.rs"]))
        })),
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let bundle = h
        .aggregator
        .get_neighbor_files_and_traits(
            &DocumentRef::new("file:///ws/main.rs", "rust"),
            &TelemetryContext::default(),
            Some(&cancel),
            true,
        )
        .await;
    assert!(bundle.files.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_aggregator_cancels_background_work() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    h.registry.register_provider(
        "ext.slow",
        "rust",
        Arc::new(provider_fn(move |_uri, _ctx, cancel: CancellationToken| {
            let flag = flag.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => flag.store(true, Ordering::SeqCst),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
                Ok(ProviderResponse::empty())
            }
        })),
    );

    let first = neighbors(&h, &DocumentRef::new("file:///ws/main.rs", "rust")).await;
    assert!(first.files.is_empty());
    drop(h);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn provider_context_carries_workspace_and_telemetry() {
    let h = harness(NeighborConfig::default(), "/ws", &[]);
    let seen: Arc<std::sync::Mutex<Option<ProviderContext>>> = Arc::default();
    let sink = seen.clone();
    h.registry.register_provider(
        "ext.ctx",
        "rust",
        Arc::new(provider_fn(move |_uri, ctx: ProviderContext, _cancel| {
            *sink.lock().unwrap() = Some(ctx);
            async { Ok(ProviderResponse::empty()) }
        })),
    );

    h.aggregator
        .get_neighbor_files_and_traits(
            &DocumentRef::new("file:///ws/src/lib.rs", "rust"),
            &TelemetryContext::with_request_id("req-7"),
            None,
            true,
        )
        .await;

    let ctx = seen.lock().unwrap().clone().expect("provider called");
    assert_eq!(ctx.language_id, "rust");
    assert_eq!(ctx.workspace_root, Some(PathBuf::from("/ws")));
    assert_eq!(ctx.telemetry.request_id.as_deref(), Some("req-7"));
}
