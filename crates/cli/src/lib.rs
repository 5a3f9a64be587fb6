use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pageflow_cache::{CacheStats, DiskResultStore, ResultStore};
use pageflow_core::upscale::UpscaleStats;
use pageflow_core::{
    FolderPageSource, LoaderOptions, PageSource, PipelineConfig, ReaderSession, ResizeEngine,
    UpscaleEngine, UpscaleHandler,
};
use pageflow_scheduler::{
    calculate_preload_plan, plan_to_queue, Direction, PreloadOptions, PreloadTier, QueueStats,
};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_POLL: Duration = Duration::from_millis(5);
const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Parser)]
#[command(name = "pageflow")]
#[command(about = "Page image loading pipeline CLI")]
pub struct Cli {
    /// Log more (repeat for debug and trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DirectionArg {
    Forward,
    Backward,
}

impl From<DirectionArg> for Direction {
    fn from(value: DirectionArg) -> Self {
        match value {
            DirectionArg::Forward => Direction::Forward,
            DirectionArg::Backward => Direction::Backward,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the preload plan and queue order for a page.
    Plan {
        #[arg(long)]
        current: usize,
        #[arg(long)]
        total: usize,
        #[arg(long, default_value_t = 10)]
        preload_size: usize,
        #[arg(long, default_value_t = 0.7)]
        forward_ratio: f64,
        #[arg(long)]
        double_page: bool,
        #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
        direction: DirectionArg,
    },
    /// Read through a folder of page images and report what the pipeline did.
    Simulate {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        /// Pages to visit in order; defaults to every page
        #[arg(long, value_delimiter = ',')]
        pages: Vec<usize>,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Run visited pages through the resize upscaler
        #[arg(long)]
        upscale: bool,
        /// Directory for persisted upscale results
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Remove expired upscale results from a store directory.
    Prune {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, default_value_t = 30)]
        max_age_days: u64,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct PlanOutput {
    current: usize,
    total: usize,
    direction: &'static str,
    immediate: Vec<usize>,
    next_high: Vec<usize>,
    prev_high: Vec<usize>,
    normal: Vec<usize>,
    queue: Vec<QueueEntryOutput>,
}

#[derive(Debug, Serialize)]
struct QueueEntryOutput {
    index: usize,
    priority: u32,
    tier: &'static str,
}

#[derive(Debug, Serialize)]
struct SimulateOutput {
    dir: String,
    page_count: usize,
    visits: Vec<VisitOutput>,
    cache: CacheOutput,
    queue: QueueOutput,
    upscale: Option<UpscaleOutput>,
}

#[derive(Debug, Serialize)]
struct VisitOutput {
    index: usize,
    direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CacheOutput {
    entries: usize,
    bytes: usize,
    budget: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    hit_rate: f64,
}

impl From<CacheStats> for CacheOutput {
    fn from(stats: CacheStats) -> Self {
        Self {
            entries: stats.entry_count,
            bytes: stats.current_size,
            budget: stats.budget,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            hit_rate: stats.hit_rate(),
        }
    }
}

#[derive(Debug, Serialize)]
struct QueueOutput {
    submitted: u64,
    completed: u64,
    cancelled: u64,
    cleared: u64,
    concurrency: usize,
}

impl From<QueueStats> for QueueOutput {
    fn from(stats: QueueStats) -> Self {
        Self {
            submitted: stats.submitted,
            completed: stats.completed,
            cancelled: stats.cancelled,
            cleared: stats.cleared,
            concurrency: stats.concurrency,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpscaleOutput {
    store: String,
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    skipped: u64,
    duplicates: u64,
    memory_hits: u64,
    store_hits: u64,
    statuses: Vec<PageStatusOutput>,
}

#[derive(Debug, Serialize)]
struct PageStatusOutput {
    index: usize,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct PruneOutput {
    dir: String,
    removed: usize,
    remaining: usize,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Plan { current, total, preload_size, forward_ratio, double_page, direction } => {
            let options = PreloadOptions {
                preload_size,
                forward_ratio,
                double_page,
                direction: direction.into(),
            };
            run_plan(current, total, &options)
        }
        Commands::Simulate { dir, pages, config, upscale, store } => {
            run_simulate(&dir, &pages, config.as_deref(), upscale, store)
        }
        Commands::Config { config } => run_config(config.as_deref()),
        Commands::Prune { dir, max_age_days } => run_prune(&dir, max_age_days),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed when `run` is called twice in one process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_plan(current: usize, total: usize, options: &PreloadOptions) -> Result<()> {
    if !(0.0..=1.0).contains(&options.forward_ratio) {
        bail!("--forward-ratio must be between 0 and 1, got {}", options.forward_ratio);
    }
    if current >= total {
        bail!("page {current} is out of range for a document of {total} pages");
    }

    let plan = calculate_preload_plan(current, total, options);
    let queue = plan_to_queue(&plan)
        .into_iter()
        .map(|task| QueueEntryOutput {
            index: task.index,
            priority: task.priority,
            tier: tier_name(task.tier),
        })
        .collect();

    let output = PlanOutput {
        current,
        total,
        direction: plan.direction.as_str(),
        immediate: plan.immediate,
        next_high: plan.next_high,
        prev_high: plan.prev_high,
        normal: plan.normal,
        queue,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn tier_name(tier: PreloadTier) -> &'static str {
    match tier {
        PreloadTier::Immediate => "immediate",
        PreloadTier::NextHigh => "next_high",
        PreloadTier::PrevHigh => "prev_high",
        PreloadTier::Normal => "normal",
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config.apply_env().context("invalid environment override")?;
    Ok(config)
}

fn run_simulate(
    dir: &Path,
    pages: &[usize],
    config_path: Option<&Path>,
    upscale: bool,
    store_dir: Option<PathBuf>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if upscale {
        config.upscale_enabled = true;
    }
    if let Some(store_dir) = store_dir {
        config.upscale.cache_dir = store_dir;
    }

    let source = FolderPageSource::open(dir)
        .with_context(|| format!("failed to open page folder {}", dir.display()))?;
    if source.page_count() == 0 {
        bail!("no page images found in {}", dir.display());
    }
    let source = Arc::new(source);

    let mut options = LoaderOptions::default();
    let handler = if config.upscale_enabled {
        let store = DiskResultStore::new(&config.upscale.cache_dir).with_context(|| {
            format!("failed to open upscale store {}", config.upscale.cache_dir.display())
        })?;
        let handler = Arc::new(
            UpscaleHandler::builder(Arc::new(ResizeEngine::new()) as Arc<dyn UpscaleEngine>)
                .store(Arc::new(store) as Arc<dyn ResultStore>)
                .settings(config.upscale.clone())
                .build(),
        );
        options = options.with_upscale(Arc::clone(&handler));
        Some(handler)
    } else {
        None
    };

    let store_display = config.upscale.cache_dir.display().to_string();
    let mut session = ReaderSession::with_options(config, options)?;
    let page_count = session.open(source).page_count();
    info!(dir = %dir.display(), pages = page_count, "simulating reader");

    let route: Vec<usize> = if pages.is_empty() {
        (0..page_count).collect()
    } else {
        pages.to_vec()
    };

    let mut visits = Vec::with_capacity(route.len());
    for index in route {
        let visit = match session.goto_page(index) {
            Ok(navigation) => {
                let direction = navigation.direction.as_str();
                match navigation.handle.wait() {
                    Ok(load) => VisitOutput {
                        index,
                        direction,
                        from_cache: Some(load.from_cache),
                        bytes: Some(load.buffer.len()),
                        width: load.dimensions.map(|d| d.width),
                        height: load.dimensions.map(|d| d.height),
                        error: None,
                    },
                    Err(error) => failed_visit(index, direction, error.to_string()),
                }
            }
            Err(error) => failed_visit(index, session.direction().as_str(), error.to_string()),
        };
        debug!(page = index, "visited");
        visits.push(visit);
    }

    let loader = session
        .loader()
        .context("document was closed during the simulation")?;
    wait_idle("page loads", || {
        let stats = loader.queue_stats();
        stats.running == 0 && stats.queued == 0
    })?;
    if let Some(handler) = &handler {
        wait_idle("upscale jobs", || handler.is_idle())?;
    }

    let output = SimulateOutput {
        dir: dir.display().to_string(),
        page_count,
        visits,
        cache: loader.cache_stats().into(),
        queue: loader.queue_stats().into(),
        upscale: handler
            .as_deref()
            .map(|handler| upscale_output(handler, page_count, store_display)),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);

    session.close();
    Ok(())
}

fn failed_visit(index: usize, direction: &'static str, error: String) -> VisitOutput {
    VisitOutput {
        index,
        direction,
        from_cache: None,
        bytes: None,
        width: None,
        height: None,
        error: Some(error),
    }
}

fn upscale_output(handler: &UpscaleHandler, page_count: usize, store: String) -> UpscaleOutput {
    let UpscaleStats {
        submitted,
        completed,
        failed,
        cancelled,
        skipped,
        duplicates,
        memory_hits,
        store_hits,
        ..
    } = handler.stats();
    let statuses = (0..page_count)
        .map(|index| PageStatusOutput { index, status: handler.status(index).as_str() })
        .collect();
    UpscaleOutput {
        store,
        submitted,
        completed,
        failed,
        cancelled,
        skipped,
        duplicates,
        memory_hits,
        store_hits,
        statuses,
    }
}

fn wait_idle(what: &str, mut idle: impl FnMut() -> bool) -> Result<()> {
    let deadline = Instant::now() + IDLE_TIMEOUT;
    while !idle() {
        if Instant::now() >= deadline {
            bail!("timed out waiting for {what} to finish");
        }
        thread::sleep(IDLE_POLL);
    }
    Ok(())
}

fn run_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn run_prune(dir: &Path, max_age_days: u64) -> Result<()> {
    let store = DiskResultStore::new(dir)
        .with_context(|| format!("failed to open upscale store {}", dir.display()))?;
    let max_age = Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY));
    let removed = store
        .cleanup_expired(max_age)
        .with_context(|| format!("failed to prune {}", dir.display()))?;
    let output = PruneOutput {
        dir: dir.display().to_string(),
        removed,
        remaining: store.entry_count()?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
