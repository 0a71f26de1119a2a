use crate::cache::SqliteCache;
use crate::config::CatwalkConfig;
use crate::qc;
use crate::report::RunReport;
use catwalk_scanner::error::Result;
use catwalk_scanner::{
    CategoryNode, CategoryTreeBuilder, Orchestrator, OrchestratorConfig, PaginationCollector,
    ProgressCallback, RecordCache, RetryPolicy, SiteLayout,
};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Options for a single pipeline run
pub struct PipelineOptions {
    pub root_url: String,
    pub workers: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    /// SQLite cache file; `None` runs without change detection.
    pub cache_path: Option<PathBuf>,
    pub show_progress: bool,
}

/// Callback for reporting pipeline phases
pub type PipelineProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

fn tree_builder(
    config: &CatwalkConfig,
    layout: Arc<dyn SiteLayout>,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
) -> Result<CategoryTreeBuilder> {
    Ok(CategoryTreeBuilder::new(
        config.fetcher()?,
        layout,
        Arc::new(config.exclusions.clone()),
    )
    .with_retry(retry)
    .with_max_depth(config.crawl.max_depth)
    .with_min_delay(Duration::from_millis(config.crawl.politeness_delay_ms))
    .with_cancel_flag(cancel))
}

/// Discover the category tree only.
pub async fn discover_tree(config: &CatwalkConfig, root_url: &str, retry: RetryPolicy) -> Result<CategoryNode> {
    config.validate()?;
    let layout: Arc<dyn SiteLayout> = Arc::new(config.layout()?);
    tree_builder(config, layout, retry, Arc::new(AtomicBool::new(false)))?
        .build(root_url)
        .await
}

fn open_cache(path: &Path) -> Option<Arc<SqliteCache>> {
    match SqliteCache::open(path) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!("Cache {} unavailable, running uncached: {}", path.display(), e);
            None
        }
    }
}

fn spinner(show: bool) -> Option<Arc<ProgressBar>> {
    if !show {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(Arc::new(pb))
}

/// Execute the full crawl: tree, listings, product pages, QC.
///
/// Fails only on invalid configuration or when the root listing cannot be
/// fetched. Per-page problems end up in the report.
pub async fn execute_pipeline(
    config: &CatwalkConfig,
    options: PipelineOptions,
    cancel: Arc<AtomicBool>,
    progress_callback: Option<PipelineProgressCallback>,
) -> Result<RunReport> {
    let PipelineOptions {
        root_url,
        workers,
        max_retries,
        base_delay,
        cache_path,
        show_progress,
    } = options;

    config.validate()?;
    let started_at = Utc::now();
    let notify = |msg: String| {
        if let Some(ref callback) = progress_callback {
            callback(msg);
        }
    };

    let cache = cache_path.as_deref().and_then(open_cache);
    let run_id = match cache.as_ref().map(|c| c.create_run(&root_url)) {
        Some(Ok(id)) => id,
        Some(Err(e)) => {
            warn!("Could not log run: {}", e);
            uuid::Uuid::new_v4().to_string()
        }
        None => uuid::Uuid::new_v4().to_string(),
    };
    info!("Run {} starting at {}", run_id, root_url);

    let retry = config.retry_policy(max_retries, base_delay);
    let layout: Arc<dyn SiteLayout> = Arc::new(config.layout()?);
    let exclusions = Arc::new(config.exclusions.clone());
    let politeness = Duration::from_millis(config.crawl.politeness_delay_ms);
    let progress_bar = spinner(show_progress);

    // Category tree
    notify(format!("Building category tree from {}", root_url));
    if let Some(ref pb) = progress_bar {
        pb.set_message("Discovering categories...");
    }
    let tree = match tree_builder(config, layout.clone(), retry.clone(), cancel.clone())?
        .build(&root_url)
        .await
    {
        Ok(tree) => tree,
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.finish_and_clear();
            }
            if let Some(ref cache) = cache
                && let Err(log_err) = cache.finish_run(&run_id, "failed", &Default::default())
            {
                warn!("Could not log run: {}", log_err);
            }
            return Err(e);
        }
    };
    notify(format!("Found {} categories", tree.node_count()));

    // Listing pages
    if let Some(ref pb) = progress_bar {
        pb.set_message("Collecting product URLs...");
    }
    let mut collector = PaginationCollector::new(config.fetcher()?, layout, exclusions.clone())
        .with_retry(retry.clone())
        .with_max_pages(config.crawl.max_pages)
        .with_min_delay(politeness)
        .with_cancel_flag(cancel.clone());
    if let Some(size) = config.site.full_page_size {
        collector = collector.with_full_page_size(size, config.site.pagination_param.clone());
    }
    let collection = collector.collect(&tree).await;
    notify(format!(
        "Collected {} product URLs from {} listing pages",
        collection.products.len(),
        collection.pages_fetched
    ));

    // Product pages
    let total = collection.products.len();
    let processed = Arc::new(AtomicUsize::new(0));
    let internal_progress_callback: ProgressCallback = match progress_bar.clone() {
        Some(pb) => {
            let processed = processed.clone();
            Arc::new(move |_worker_id: usize, _url: String| {
                let count = processed.fetch_add(1, Ordering::Relaxed) + 1;
                pb.set_message(format!("Fetching products... {}/{}", count, total));
            })
        }
        None => Arc::new(|_worker_id: usize, _url: String| {}),
    };

    let mut orchestrator = Orchestrator::new(
        config.fetcher()?,
        Arc::new(config.extractor()?),
        OrchestratorConfig {
            max_workers: workers,
            retry,
            min_request_delay: politeness,
        },
    )
    .with_exclusions(exclusions)
    .with_cancel_flag(cancel)
    .with_progress_callback(internal_progress_callback);
    if let Some(ref cache) = cache {
        let record_cache: Arc<dyn RecordCache> = cache.clone();
        orchestrator = orchestrator.with_cache(record_cache);
    }
    let outcome = orchestrator.run(collection.products).await;

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Fetched {} products ({} from cache, {} failed)",
            outcome.stats.fetched, outcome.stats.cache_hits, outcome.stats.failed
        ));
    }

    // Quality control
    let (records, qc_report) = qc::evaluate(outcome.records, &config.qc);
    notify(format!("{} clean records after QC", records.len()));

    let mut failures = collection.failures;
    failures.extend(outcome.failures);

    let run = RunReport {
        run_id,
        root_url,
        started_at,
        finished_at: Utc::now(),
        tree,
        product_urls: total,
        listing_pages: collection.pages_fetched,
        records,
        qc: qc_report,
        failures,
        stats: outcome.stats,
    };

    if let Some(ref cache) = cache
        && let Err(e) = cache.finish_run(&run.run_id, run.status(), &run.stats)
    {
        warn!("Could not log run: {}", e);
    }

    Ok(run)
}
