use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use postsearch_fusion::FusionError;
use postsearch_ingest::{
    process_demo_dir, DemoOutcome, EmbeddingMode, IngestError, IngestService, PostUpload,
    Settings, DEFAULT_SEARCH_LIMIT,
};
use postsearch_vector_store::VectorStoreError;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "postsearch")]
#[command(about = "Multimodal post ingestion and similarity search", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(long, global = true)]
    quiet: bool,

    /// Index base path (overrides POSTSEARCH_INDEX_PATH)
    #[arg(long, global = true)]
    index_path: Option<PathBuf>,

    /// Embedding width (overrides POSTSEARCH_VECTOR_DIMENSION)
    #[arg(long, global = true)]
    dimension: Option<usize>,

    /// Embedding backend (overrides POSTSEARCH_EMBEDDING_MODE)
    #[arg(long, global = true)]
    embed_mode: Option<String>,

    /// Frames sampled per second of video
    #[arg(long, global = true)]
    frame_rate: Option<f64>,

    /// Seconds of video considered per upload
    #[arg(long, global = true)]
    max_video_duration: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a post and append it to the index
    Ingest(IngestArgs),

    /// Find posts similar to a text query
    Search(SearchArgs),

    /// Show index size and file locations
    Stats,

    /// Ingest every post directory under a demo data folder
    #[command(name = "process-demo")]
    ProcessDemo(ProcessDemoArgs),
}

#[derive(Args)]
struct IngestArgs {
    /// Image file (repeatable)
    #[arg(long = "image")]
    images: Vec<PathBuf>,

    /// Y4M video file (repeatable)
    #[arg(long = "video")]
    videos: Vec<PathBuf>,

    /// Post caption
    #[arg(long)]
    text: Option<String>,

    /// Tag attached to the post (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// RFC 3339 creation time; defaults to now
    #[arg(long)]
    created_at: Option<String>,
}

#[derive(Args)]
struct SearchArgs {
    /// Free-text query
    query: String,

    /// Maximum number of results
    #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
    limit: usize,
}

#[derive(Args)]
struct ProcessDemoArgs {
    /// Folder with one sub-directory per post
    #[arg(long, default_value = "data/demo_posts")]
    data_dir: PathBuf,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum CliStatus {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
struct CliResponse {
    status: CliStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(default)]
    data: Value,
}

impl CliResponse {
    fn ok(data: Value) -> Self {
        Self {
            status: CliStatus::Ok,
            message: None,
            code: None,
            data,
        }
    }

    fn error(err: &anyhow::Error) -> Self {
        Self {
            status: CliStatus::Error,
            message: Some(format!("{err:#}")),
            code: Some(classify_error(err)),
            data: Value::Null,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let response = match run(cli).await {
        Ok(data) => CliResponse::ok(data),
        Err(err) => {
            log::error!("{err:#}");
            CliResponse::error(&err)
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.status == CliStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<Value> {
    let settings = resolve_settings(&cli)?;
    let read_only = matches!(cli.command, Commands::Search(_) | Commands::Stats);
    let service = if read_only {
        IngestService::open_read_only(&settings).await
    } else {
        IngestService::open(&settings).await
    }
    .with_context(|| format!("Failed to open index at {}", settings.index_path.display()))?;

    match cli.command {
        Commands::Ingest(args) => run_ingest(&service, args).await,
        Commands::Search(args) => run_search(&service, args).await,
        Commands::Stats => Ok(serde_json::to_value(service.index().stats().await)?),
        Commands::ProcessDemo(args) => run_process_demo(&service, args, cli.quiet).await,
    }
}

fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(path) = &cli.index_path {
        settings.index_path = path.clone();
    }
    if let Some(dimension) = cli.dimension {
        settings.vector_dimension = dimension;
    }
    if let Some(mode) = &cli.embed_mode {
        settings.embedding_mode = mode.parse::<EmbeddingMode>()?;
    }
    if let Some(rate) = cli.frame_rate {
        settings.sampler.frame_rate_hz = rate;
    }
    if let Some(seconds) = cli.max_video_duration {
        settings.sampler.max_duration_secs = seconds;
    }
    log::debug!("Resolved settings: {settings:?}");
    Ok(settings)
}

async fn run_ingest(service: &IngestService, args: IngestArgs) -> Result<Value> {
    let created_at = args
        .created_at
        .as_deref()
        .map(|raw| {
            raw.parse::<DateTime<Utc>>()
                .with_context(|| format!("Invalid --created-at '{raw}'"))
        })
        .transpose()?;

    let mut upload = PostUpload {
        text: args.text,
        tags: args.tags.into_iter().collect::<BTreeSet<_>>(),
        created_at,
        ..PostUpload::default()
    };
    for path in &args.images {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image {}", path.display()))?;
        upload.images.push(bytes);
    }
    for path in &args.videos {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read video {}", path.display()))?;
        upload.videos.push(bytes);
    }

    let post = service.ingest(upload).await?;
    log::info!("Stored post {}", post.id);
    Ok(serde_json::to_value(post)?)
}

async fn run_search(service: &IngestService, args: SearchArgs) -> Result<Value> {
    let results = service.search_text(&args.query, args.limit).await?;
    Ok(json!({
        "query": args.query,
        "limit": args.limit,
        "results": results,
    }))
}

async fn run_process_demo(
    service: &IngestService,
    args: ProcessDemoArgs,
    quiet: bool,
) -> Result<Value> {
    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Processing {}", args.data_dir.display()));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let report = process_demo_dir(service, &args.data_dir, |outcome| match outcome {
        DemoOutcome::Ingested { dir, id } => {
            spinner.set_message(format!("{} -> post {id}", dir.display()));
        }
        DemoOutcome::Failed { dir, .. } => {
            spinner.set_message(format!("{} failed", dir.display()));
        }
    })
    .await;
    spinner.finish_and_clear();

    let report = report?;
    Ok(json!({
        "ingested": report.ingested(),
        "failed": report.failed(),
        "posts": report.outcomes,
        "total_posts": service.index().len().await,
    }))
}

fn classify_error(err: &anyhow::Error) -> &'static str {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<IngestError>() {
            return match err {
                IngestError::FusionError(inner) => classify_fusion(inner),
                IngestError::VectorStoreError(inner) => classify_store(inner),
                IngestError::EncoderError { .. } => "encoder_failed",
                IngestError::InvalidConfig(_) => "invalid_config",
                IngestError::IoError(_) => "io",
                IngestError::SerializationError(_) | IngestError::WorkerError(_) => "internal",
            };
        }
        if let Some(err) = cause.downcast_ref::<std::io::Error>() {
            return if err.kind() == std::io::ErrorKind::NotFound {
                "not_found"
            } else {
                "io"
            };
        }
        if cause.downcast_ref::<chrono::ParseError>().is_some() {
            return "invalid_argument";
        }
    }
    "internal"
}

const fn classify_fusion(err: &FusionError) -> &'static str {
    match err {
        FusionError::NoInputProvided => "no_input",
        FusionError::InvalidVideo(_) => "invalid_video",
        FusionError::InvalidSampleRate(_) | FusionError::InvalidConfig(_) => "invalid_config",
        FusionError::DimensionMismatch { .. } => "dimension_mismatch",
        FusionError::DegenerateEmbedding => "degenerate_embedding",
        FusionError::IoError(_) => "io",
    }
}

const fn classify_store(err: &VectorStoreError) -> &'static str {
    match err {
        VectorStoreError::DimensionMismatch { .. } => "dimension_mismatch",
        VectorStoreError::InvalidVector(_) => "invalid_vector",
        VectorStoreError::CorruptIndex { .. } => "corrupt_index",
        VectorStoreError::Locked(_) => "index_locked",
        VectorStoreError::ReadOnly(_) => "index_read_only",
        VectorStoreError::InvalidConfig(_) => "invalid_config",
        VectorStoreError::IoError(_) => "io",
        VectorStoreError::SerializationError(_) | VectorStoreError::Other(_) => "internal",
    }
}
