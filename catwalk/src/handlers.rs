use anyhow::{Context, Result};
use catwalk_core::cache::SqliteCache;
use catwalk_core::config::CatwalkConfig;
use catwalk_core::pipeline::{
    PipelineOptions, PipelineProgressCallback, discover_tree, execute_pipeline,
};
use catwalk_core::report::{
    ReportFormat, RunReport, generate_json_report, generate_text_report, render_tree, save_report,
};
use clap::ArgMatches;
use colored::Colorize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;
use url::Url;

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/catwalk/";
pub const CONFIG_FILE: &str = "catwalk.json";
pub const CACHE_FILE: &str = "cache.db";

/// What `init` left on disk
#[derive(Debug)]
pub struct InitSummary {
    pub config_path: PathBuf,
    pub cache_path: PathBuf,
    pub cache_reset: bool,
}

/// Expand `~` in a user supplied path
pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

pub fn default_config_dir() -> PathBuf {
    expand_path(DEFAULT_CONFIG_DIR)
}

/// Load the configuration: an explicit file must exist, the default file is
/// used when present, otherwise built-in defaults apply.
pub fn load_config(explicit: Option<&Path>, config_dir: &Path) -> Result<CatwalkConfig> {
    if let Some(path) = explicit {
        let path = expand_path(&path.to_string_lossy());
        return CatwalkConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }

    let path = config_dir.join(CONFIG_FILE);
    if path.exists() {
        CatwalkConfig::load(&path)
            .with_context(|| format!("failed to load config {}", path.display()))
    } else {
        let config = CatwalkConfig::default();
        config.validate()?;
        Ok(config)
    }
}

/// Cache file for a run, `None` when caching is off. An explicit path turns caching on.
pub fn resolve_cache_path(
    use_cache: bool,
    explicit: Option<&Path>,
    config_dir: &Path,
) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(expand_path(&path.to_string_lossy())),
        None if use_cache => Some(config_dir.join(CACHE_FILE)),
        None => None,
    }
}

/// Write the default config into `dir` and create the cache database.
///
/// Without `force` an existing config file is an error. With `force` the
/// config is rewritten and any existing cache is emptied.
pub fn initialize(dir: &Path, force: bool) -> Result<InitSummary> {
    let config_path = dir.join(CONFIG_FILE);
    let cache_path = dir.join(CACHE_FILE);

    CatwalkConfig::write_default(&config_path, force)?;

    let cache_reset = force && SqliteCache::exists(&cache_path);
    if cache_reset {
        SqliteCache::remove(&cache_path)
            .with_context(|| format!("failed to remove {}", cache_path.display()))?;
    }
    SqliteCache::open(&cache_path)
        .with_context(|| format!("failed to create cache {}", cache_path.display()))?;

    Ok(InitSummary {
        config_path,
        cache_path,
        cache_reset,
    })
}

/// Write the report in the format implied by the output extension.
pub fn write_report(report: &RunReport, output: &Path) -> Result<ReportFormat> {
    let format = ReportFormat::from_path(output);
    let content = match format {
        ReportFormat::Text => generate_text_report(report),
        ReportFormat::Json => generate_json_report(report)?,
    };
    save_report(&content, output)
        .with_context(|| format!("failed to write report to {}", output.display()))?;
    Ok(format)
}

/// Plain-text lines summarising a finished run
pub fn run_summary(report: &RunReport) -> Vec<String> {
    let stats = &report.stats;
    vec![
        format!("Run {} {}", report.run_id, report.status()),
        format!(
            "Categories: {}  Listing pages: {}  Product URLs: {}",
            report.tree.node_count(),
            report.listing_pages,
            report.product_urls
        ),
        format!(
            "Fetched: {}  From cache: {}  Extracted: {}  Failed: {}",
            stats.fetched, stats.cache_hits, stats.extracted, stats.failed
        ),
        format!(
            "Clean records: {}  Duplicates: {}  Incomplete: {}  Anomalies: {}",
            report.records.len(),
            report.qc.duplicates.len(),
            report.qc.incomplete.len(),
            report.qc.anomalies.len()
        ),
    ]
}

pub fn print_banner() {
    println!(
        "{} {}",
        "catwalk".bright_magenta().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("{}", "category-aware catalogue crawler".bright_black());
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> String {
    print!("{} ", msg.bright_cyan().bold());
    let _ = io::stdout().flush();
    let mut response = String::new();
    if io::stdin().read_line(&mut response).is_err() {
        return String::new();
    }
    response.trim().to_lowercase()
}

fn init_tracing(quiet: bool) {
    let level = if quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .try_init();
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  CATWALK INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let raw_dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_DIR);
    let mut force = args.get_flag("force");
    let config_dir = expand_path(raw_dir);

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    let config_path = config_dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("A configuration already exists:");
        println!(
            "  {} {}",
            "•".yellow(),
            config_path.display().to_string().bright_white()
        );
        println!();
        println!(
            "{}",
            "Continuing overwrites it and empties the product cache.".yellow()
        );

        let response = print_prompt("Do you want to continue? [y/N]:");
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
        force = true;
    }

    let summary = initialize(&config_dir, force)?;

    if summary.cache_reset {
        println!("{} Existing cache emptied", "✓".green().bold());
    }
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Config: {}",
        "✓".green().bold(),
        summary.config_path.display().to_string().bright_white()
    );
    println!(
        "{} Cache: {}",
        "✓".green().bold(),
        summary.cache_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

pub async fn handle_tree(args: &ArgMatches, quiet: bool) -> Result<()> {
    init_tracing(quiet);

    let url = args.get_one::<Url>("url").context("--url is required")?;
    let retries = args.get_one::<u32>("retries").copied().unwrap_or(3);
    let config = load_config(
        args.get_one::<PathBuf>("config").map(PathBuf::as_path),
        &default_config_dir(),
    )?;

    if !quiet {
        println!("{} Discovering categories under {}", "→".blue(), url.as_str().bright_white());
    }

    let retry = config.retry_policy(retries, Duration::from_millis(500));
    let tree = discover_tree(&config, url.as_str(), retry)
        .await
        .with_context(|| format!("cannot build the category tree for {}", url))?;

    println!();
    print!("{}", render_tree(&tree));
    println!();
    println!("{} {} categories", "✓".green().bold(), tree.node_count());
    Ok(())
}

pub async fn handle_run(args: &ArgMatches, quiet: bool) -> Result<()> {
    init_tracing(quiet);

    let url = args.get_one::<Url>("url").context("--url is required")?;
    let output = args.get_one::<PathBuf>("output").context("--output is required")?;
    let workers = args.get_one::<usize>("workers").copied().unwrap_or(4);
    let max_retries = args.get_one::<u32>("retries").copied().unwrap_or(3);
    let base_delay = args.get_one::<u64>("base-delay").copied().unwrap_or(500);
    let config_dir = default_config_dir();

    let config = load_config(args.get_one::<PathBuf>("config").map(PathBuf::as_path), &config_dir)?;
    let cache_path = resolve_cache_path(
        args.get_flag("use-cache"),
        args.get_one::<PathBuf>("cache-path").map(PathBuf::as_path),
        &config_dir,
    );
    let output = expand_path(&output.to_string_lossy());

    if !quiet {
        println!("\n🛍️  Crawling {}", url.as_str().bright_white());
        println!("Workers: {}", workers);
        println!("Max depth: {}", config.crawl.max_depth);
        match cache_path {
            Some(ref path) => println!("Cache: {}\n", path.display()),
            None => println!("Cache: disabled\n"),
        }
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing pages in flight");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let options = PipelineOptions {
        root_url: url.as_str().to_string(),
        workers: workers.max(1),
        max_retries,
        base_delay: Duration::from_millis(base_delay),
        cache_path,
        show_progress: !quiet,
    };

    let progress_callback: PipelineProgressCallback = Arc::new(move |msg: String| {
        if !quiet {
            println!("{} {}", "→".blue(), msg);
        }
    });

    let report = execute_pipeline(&config, options, cancel, Some(progress_callback))
        .await
        .with_context(|| format!("run against {} failed", url))?;

    let format = write_report(&report, &output)?;

    println!();
    let mark = if report.stats.cancelled {
        "⚠".yellow().bold()
    } else {
        "✓".green().bold()
    };
    for line in run_summary(&report) {
        println!("{} {}", mark, line);
    }
    println!(
        "{} Report ({:?}): {}",
        mark,
        format,
        output.display().to_string().bright_white()
    );
    Ok(())
}
