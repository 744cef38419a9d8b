mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use tonefetch_core::{
    load_config, retag, validate_config, AudioFormat, Config, Converter, DownloadEngine,
    FfmpegConverter, Fetcher, JobId, JobRequest, JobStatus, OutputProfile, Provider,
    RetagRequest, SourceRef, YtDlpFetcher,
};

use render::{render_search_results, JobRenderer};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "tonefetch.toml";

#[derive(Debug, Parser)]
#[command(name = "tonefetch", version, about = "Download, transcode and tag audio tracks")]
struct Cli {
    /// Path to a TOML config file (also read from TONEFETCH_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs and job events as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download one or more tracks by URL or search query.
    Download(DownloadArgs),
    /// Search a provider and print the results.
    Search(SearchArgs),
    /// Rewrite the tags of a file already on disk.
    Tag(TagArgs),
    /// Check that yt-dlp and ffmpeg are usable.
    Check,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// Track URLs or free-text queries.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Provider used for free-text queries.
    #[arg(long)]
    provider: Option<Provider>,

    #[arg(long)]
    format: Option<AudioFormat>,

    /// Bitrate in kbps (lossy formats only).
    #[arg(long)]
    bitrate: Option<u32>,

    #[arg(long)]
    output: Option<PathBuf>,

    /// Image embedded instead of the provider thumbnail.
    #[arg(long)]
    cover: Option<PathBuf>,

    /// Do not embed the provider thumbnail.
    #[arg(long)]
    no_cover_art: bool,

    /// Place files under a folder named after the artist.
    #[arg(long)]
    artist_folders: bool,

    /// Maximum number of jobs running at once.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    concurrency: Option<usize>,
}

#[derive(Debug, Args)]
struct SearchArgs {
    query: String,

    #[arg(long)]
    provider: Option<Provider>,

    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct TagArgs {
    /// mp3, m4a or flac file to update in place.
    file: PathBuf,

    #[arg(long)]
    title: Option<String>,

    /// Also written as the album artist.
    #[arg(long)]
    artist: Option<String>,

    #[arg(long)]
    album: Option<String>,

    /// jpg or png image embedded as the front cover.
    #[arg(long)]
    cover: Option<PathBuf>,
}

impl From<TagArgs> for RetagRequest {
    fn from(args: TagArgs) -> Self {
        RetagRequest {
            path: args.file,
            title: args.title,
            artist: args.artist,
            album: args.album,
            cover_path: args.cover,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    // Logs go to stderr so stdout only carries results.
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref())?;
    validate_config(&config).context("Configuration validation failed")?;

    match cli.command {
        Command::Download(args) => download(config, args, cli.json).await,
        Command::Search(args) => search(config, args, cli.json).await,
        Command::Tag(args) => tag(config, args).await,
        Command::Check => check(config).await,
    }
}

fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("TONEFETCH_CONFIG").ok().map(PathBuf::from));

    match path {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            load_config(&path).with_context(|| format!("Failed to load config from {:?}", path))
        }
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            let path = Path::new(DEFAULT_CONFIG_FILE);
            info!("Loading configuration from {:?}", path);
            load_config(path).with_context(|| format!("Failed to load config from {:?}", path))
        }
        None => Ok(Config::default()),
    }
}

fn build_profile(defaults: &OutputProfile, args: &DownloadArgs) -> OutputProfile {
    let mut profile = defaults.clone();
    if let Some(format) = args.format {
        profile.format = format;
    }
    if let Some(bitrate) = args.bitrate {
        profile.bitrate_kbps = bitrate;
    }
    if let Some(output) = &args.output {
        profile.output_dir = output.clone();
    }
    if let Some(cover) = &args.cover {
        profile.custom_cover_path = Some(cover.clone());
    }
    if args.no_cover_art {
        profile.save_cover_art = false;
    }
    if args.artist_folders {
        profile.create_artist_folders = true;
    }
    profile
}

async fn download(config: Config, args: DownloadArgs, json: bool) -> Result<()> {
    let provider = args.provider.unwrap_or(config.fetcher.default_provider);
    let profile = build_profile(&config.defaults, &args);

    let mut engine_config = config.engine.clone();
    if let Some(concurrency) = args.concurrency {
        engine_config = engine_config.with_max_concurrent_jobs(concurrency);
    }

    let engine = DownloadEngine::new(
        engine_config,
        Arc::new(YtDlpFetcher::new(config.fetcher.clone())),
        Arc::new(FfmpegConverter::new(config.converter.clone())),
    );
    engine.start().await.context("Failed to start download engine")?;

    let mut jobs: Vec<(JobId, String)> = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let request = JobRequest::new(SourceRef::parse(input, provider), profile.clone());
        let id = engine
            .submit(request)
            .with_context(|| format!("Failed to submit {:?}", input))?;
        jobs.push((id, input.clone()));
    }
    info!("Submitted {} job(s)", jobs.len());

    let mut renderers = Vec::with_capacity(jobs.len());
    for (id, label) in &jobs {
        let Some(mut subscription) = engine.subscribe(*id) else {
            continue;
        };
        let mut renderer = JobRenderer::new(label.clone(), json);
        renderers.push(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                if let Some(line) = renderer.render(&event) {
                    println!("{}", line);
                }
            }
        }));
    }

    let waits = futures::future::join_all(jobs.iter().map(|(id, _)| engine.wait(*id)));
    tokio::pin!(waits);
    let finished = tokio::select! {
        finished = &mut waits => finished,
        _ = shutdown_signal() => {
            warn!("Interrupted, cancelling {} job(s)", jobs.len());
            for (id, _) in &jobs {
                if let Err(e) = engine.cancel(*id) {
                    warn!(job_id = %id, "Failed to cancel job: {}", e);
                }
            }
            waits.await
        }
    };

    for renderer in renderers {
        if let Err(e) = renderer.await {
            warn!("Event renderer stopped abnormally: {}", e);
        }
    }
    engine.shutdown().await;

    let unsuccessful = finished
        .iter()
        .flatten()
        .filter(|job| job.status != JobStatus::Completed)
        .count();
    if unsuccessful > 0 {
        bail!("{} of {} job(s) did not complete", unsuccessful, jobs.len());
    }
    Ok(())
}

async fn search(config: Config, args: SearchArgs, json: bool) -> Result<()> {
    let provider = args.provider.unwrap_or(config.fetcher.default_provider);
    let fetcher = YtDlpFetcher::new(config.fetcher);

    let results = fetcher
        .search(&args.query, provider, args.limit)
        .await
        .with_context(|| format!("Search for {:?} on {} failed", args.query, provider))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No results for {:?}", args.query);
    } else {
        for line in render_search_results(&results) {
            println!("{}", line);
        }
    }
    Ok(())
}

async fn tag(config: Config, args: TagArgs) -> Result<()> {
    let converter = FfmpegConverter::new(config.converter);
    let request = RetagRequest::from(args);
    let path = retag(&converter, &request)
        .await
        .with_context(|| format!("Failed to retag {:?}", request.path))?;
    println!("tagged: {}", path.display());
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    let fetcher = YtDlpFetcher::new(config.fetcher);
    let converter = FfmpegConverter::new(config.converter);
    let mut healthy = true;

    match fetcher.validate().await {
        Ok(()) => println!("{}: ok", fetcher.name()),
        Err(e) => {
            healthy = false;
            println!("{}: {}", fetcher.name(), e);
        }
    }
    match converter.validate().await {
        Ok(()) => println!("{}: ok", converter.name()),
        Err(e) => {
            healthy = false;
            println!("{}: {}", converter.name(), e);
        }
    }

    if !healthy {
        bail!("External tools are not available");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
