use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use context_neighbors::{
    language_id_for_path, path_to_file_uri, ContentExclusion, DocumentTracker, FsFileReader,
    IncludeProvider, NeighborAggregator, NeighborConfig, NoExclusion, OverlayFileReader,
    PathFilterExclusion, ProviderRegistry, WorkspaceFolders,
};
use context_protocol::{DocumentRef, NeighborBundle, TelemetryContext, NEIGHBOR_SCHEMA_VERSION};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod render;

#[derive(Parser)]
#[command(name = "context-neighbors")]
#[command(about = "Neighbor-file context for code completion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (CONTEXT_NEIGHBORS_* variables still apply on top)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect neighbor files for one document
    Neighbors(NeighborsArgs),

    /// Print the configuration JSON schema
    Schema,
}

#[derive(Args)]
struct NeighborsArgs {
    /// Workspace root folder
    #[arg(long)]
    workspace: PathBuf,

    /// Document to collect neighbors for (relative paths resolve against the workspace)
    #[arg(long)]
    file: PathBuf,

    /// Files to treat as open editor tabs; the first is the most recently focused
    #[arg(long = "open", value_name = "PATH")]
    open: Vec<PathBuf>,

    /// Extra directories searched for quoted #include targets
    #[arg(long = "include-dir", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,

    /// Workspace-relative path prefixes whose content is never returned
    #[arg(long = "exclude", value_name = "PREFIX")]
    exclude: Vec<String>,

    /// Override the language id detected from the file extension
    #[arg(long)]
    language: Option<String>,

    /// Bypass the cache and the race timeout
    #[arg(long)]
    force: bool,

    /// Output JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct NeighborsOutput<'a> {
    schema_version: u32,
    document: &'a DocumentRef,
    file_count: usize,
    total_chars: usize,
    #[serde(flatten)]
    bundle: &'a NeighborBundle,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let json_output = match &cli.command {
        Commands::Neighbors(args) => args.json,
        Commands::Schema => true,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mut config = match &cli.config {
        Some(path) => NeighborConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => NeighborConfig::default(),
    };
    config.apply_env();
    config.validate()?;

    match cli.command {
        Commands::Neighbors(args) => run_neighbors(args, config).await?,
        Commands::Schema => print_schema()?,
    }

    Ok(())
}

fn print_schema() -> Result<()> {
    let schema = schemars::schema_for!(NeighborConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

async fn run_neighbors(args: NeighborsArgs, config: NeighborConfig) -> Result<()> {
    let root = args
        .workspace
        .canonicalize()
        .context("Invalid workspace path")?;
    let current = resolve_in(&root, &args.file).context("Invalid --file")?;
    let language_id = args
        .language
        .clone()
        .unwrap_or_else(|| language_id_for_path(&current).to_string());
    let current_uri = path_to_file_uri(&current)?;

    let tracker = Arc::new(DocumentTracker::new());
    // Focus in reverse so the first --open path ends up most recent.
    for path in args.open.iter().rev() {
        let path = resolve_in(&root, path)
            .with_context(|| format!("Invalid --open {}", path.display()))?;
        let uri = path_to_file_uri(&path)?;
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        tracker.open(&uri, language_id_for_path(&path), content);
        tracker.focus(&uri);
    }
    let current_content = fs::read_to_string(&current)
        .with_context(|| format!("Failed to read {}", current.display()))?;
    tracker.open(&current_uri, &language_id, current_content);
    log::debug!("Tracking {} open documents", tracker.len());

    let workspace = Arc::new(WorkspaceFolders::new([root.clone()]));
    let reader = Arc::new(OverlayFileReader::new(
        tracker.clone(),
        Arc::new(FsFileReader::new()),
    ));
    let exclusion: Arc<dyn ContentExclusion> = if args.exclude.is_empty() {
        Arc::new(NoExclusion)
    } else {
        Arc::new(PathFilterExclusion::new(
            workspace.clone(),
            &[],
            &args.exclude,
            None,
        )?)
    };

    let registry = ProviderRegistry::new(
        Arc::new(config.related_files.clone()),
        reader.clone(),
        exclusion,
    );
    let include_dirs = args
        .include_dirs
        .iter()
        .map(|dir| resolve_in(&root, dir))
        .collect::<Result<Vec<_>>>()
        .context("Invalid --include-dir")?;
    Arc::new(IncludeProvider::new(reader, include_dirs)?).register(&registry);

    let aggregator = NeighborAggregator::new(config, tracker, Arc::new(registry), workspace);
    let doc = DocumentRef::new(current_uri, language_id);
    let bundle = aggregator
        .get_neighbor_files_and_traits(
            &doc,
            &TelemetryContext::with_request_id("cli"),
            None,
            args.force,
        )
        .await;

    if args.json {
        let output = NeighborsOutput {
            schema_version: NEIGHBOR_SCHEMA_VERSION,
            document: &doc,
            file_count: bundle.files.len(),
            total_chars: bundle.total_chars(),
            bundle: &bundle,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let relative = current
            .strip_prefix(&root)
            .unwrap_or(current.as_path())
            .display()
            .to_string();
        print!("{}", render::render_bundle(&relative, &doc.language_id, &bundle));
    }
    Ok(())
}

fn resolve_in(root: &Path, path: &Path) -> Result<PathBuf> {
    let joined = if path.is_relative() {
        root.join(path)
    } else {
        path.to_path_buf()
    };
    joined
        .canonicalize()
        .with_context(|| format!("{} does not exist", joined.display()))
}
