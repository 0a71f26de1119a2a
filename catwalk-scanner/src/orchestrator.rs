use crate::cache::{KeyedLocks, RecordCache};
use crate::error::{Result, ScanError};
use crate::exclusion::{EntityKind, Exclusions};
use crate::extract::FieldExtractor;
use crate::fetch::{HttpFetcher, Page, Politeness, RetryPolicy};
use crate::normalize::ProductRef;
use crate::record::{CacheEntry, ContentFingerprint, FetchFailure, ProductRecord};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

const LOCK_SHARDS: usize = 64;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_workers: usize,
    pub retry: RetryPolicy,
    /// Minimum gap between two requests of the same worker.
    pub min_request_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            retry: RetryPolicy::default(),
            min_request_delay: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub fetched: usize,
    pub cache_hits: usize,
    pub extracted: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub records: Vec<ProductRecord>,
    pub failures: Vec<FetchFailure>,
    pub stats: RunStats,
}

/// What one worker reports back for one product URL.
enum ItemResult {
    Extracted(ProductRecord),
    Cached(ProductRecord),
    Failed(FetchFailure),
}

/// Everything a worker needs, shared by all workers.
struct Shared {
    fetcher: HttpFetcher,
    extractor: Arc<dyn FieldExtractor>,
    cache: Option<Arc<dyn RecordCache>>,
    exclusions: Arc<Exclusions>,
    locks: KeyedLocks,
    retry: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

/// Fetches product pages with a fixed pool of workers and turns them into
/// records, reusing cached records when a page has not changed.
pub struct Orchestrator {
    fetcher: HttpFetcher,
    extractor: Arc<dyn FieldExtractor>,
    cache: Option<Arc<dyn RecordCache>>,
    exclusions: Arc<Exclusions>,
    config: OrchestratorConfig,
    cancel: Arc<AtomicBool>,
    progress_callback: Option<ProgressCallback>,
}

impl Orchestrator {
    pub fn new(fetcher: HttpFetcher, extractor: Arc<dyn FieldExtractor>, config: OrchestratorConfig) -> Self {
        Self {
            fetcher,
            extractor,
            cache: None,
            exclusions: Arc::new(Exclusions::none()),
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            progress_callback: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn RecordCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_exclusions(mut self, exclusions: Arc<Exclusions>) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Share an externally owned flag; setting it stops workers from taking new items.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run(&self, refs: Vec<ProductRef>) -> RunOutcome {
        let workers = self.config.max_workers.max(1);
        let total = refs.len();
        info!("Fetching {} product pages with {} workers", total, workers);

        let queue: Arc<Mutex<VecDeque<ProductRef>>> = Arc::new(Mutex::new(refs.into()));
        let shared = Arc::new(Shared {
            fetcher: self.fetcher.clone(),
            extractor: self.extractor.clone(),
            cache: self.cache.clone(),
            exclusions: self.exclusions.clone(),
            locks: KeyedLocks::new(LOCK_SHARDS),
            retry: self.config.retry.clone(),
            cancel: self.cancel.clone(),
        });
        let (tx, mut rx) = mpsc::channel::<ItemResult>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = queue.clone();
            let shared = shared.clone();
            let tx = tx.clone();
            let progress_cb = self.progress_callback.clone();
            let min_delay = self.config.min_request_delay;

            handles.push(tokio::spawn(async move {
                debug!("Worker {} started", worker_id);
                let mut politeness = Politeness::new(min_delay);

                loop {
                    if shared.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let Some(product) = queue.lock().await.pop_front() else {
                        break;
                    };

                    politeness.wait().await;
                    if shared.cancel.load(Ordering::Relaxed) {
                        break;
                    }

                    if let Some(ref callback) = progress_cb {
                        callback(worker_id, product.url().to_string());
                    }

                    let result = match AssertUnwindSafe(process(&shared, &product))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            warn!("Worker {} panicked on {}: {}", worker_id, product.url(), message);
                            failed(product.url(), format!("worker panicked: {}", message), 0)
                        }
                    };
                    if tx.send(result).await.is_err() {
                        break;
                    }
                }
                debug!("Worker {} exiting", worker_id);
            }));
        }
        drop(tx);

        let mut outcome = RunOutcome::default();
        while let Some(result) = rx.recv().await {
            match result {
                ItemResult::Extracted(record) => {
                    outcome.stats.fetched += 1;
                    outcome.stats.extracted += 1;
                    outcome.records.push(record);
                }
                ItemResult::Cached(record) => {
                    outcome.stats.fetched += 1;
                    outcome.stats.cache_hits += 1;
                    outcome.records.push(record);
                }
                ItemResult::Failed(failure) => {
                    outcome.stats.failed += 1;
                    outcome.failures.push(failure);
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("{}", ScanError::from(e));
            }
        }

        outcome.stats.cancelled = self.cancel.load(Ordering::Relaxed);
        info!(
            "Run finished: {} records ({} extracted, {} from cache), {} failures{}",
            outcome.records.len(),
            outcome.stats.extracted,
            outcome.stats.cache_hits,
            outcome.stats.failed,
            if outcome.stats.cancelled { ", cancelled" } else { "" }
        );
        outcome
    }
}

async fn process(shared: &Shared, product: &ProductRef) -> ItemResult {
    let url = product.url();
    if shared.exclusions.is_excluded(EntityKind::Product, url) {
        return failed(url, "excluded", 0);
    }

    let (result, attempts) = shared.fetcher.fetch_with_retry(url, &shared.retry).await;
    let page = match result {
        Ok(page) => page,
        Err(e) => {
            warn!("{}", e);
            return failed(url, e, attempts);
        }
    };

    match resolve(shared, &page).await {
        Ok(result) => result,
        Err(e) => {
            warn!("Extraction failed for {}: {}", url, e);
            failed(url, e, attempts)
        }
    }
}

/// Identify the page, then reuse or rebuild its record while holding the
/// identifier's lock.
async fn resolve(shared: &Shared, page: &Page) -> Result<ItemResult> {
    let fingerprint = ContentFingerprint::compute(&page.body);
    let identifier = shared.extractor.identify(&page.body, &page.url)?;
    if shared.exclusions.is_excluded(EntityKind::Product, &identifier) {
        return Err(ScanError::Other(format!("product '{}' is excluded", identifier)));
    }

    let _guard = shared.locks.lock(&identifier).await;

    if let Some(cache) = &shared.cache {
        match lookup(cache, &identifier).await {
            Ok(Some(entry)) if entry.fingerprint == fingerprint => {
                debug!("Cache hit for {} ({})", identifier, page.url);
                // the cached record may have been extracted from a mirror URL
                return Ok(ItemResult::Cached(ProductRecord {
                    url: page.url.clone(),
                    ..entry.record
                }));
            }
            Ok(_) => {}
            Err(e) => warn!("Cache lookup for {} failed, treating as miss: {}", identifier, e),
        }
    }

    let fields = shared.extractor.extract(&page.body, &page.url)?;
    let record = ProductRecord {
        identifier,
        url: page.url.clone(),
        fields,
        fingerprint,
        fetched_at: Utc::now(),
    };

    if let Some(cache) = &shared.cache {
        if let Err(e) = store(cache, CacheEntry::from_record(&record)).await {
            warn!("Cache store for {} failed: {}", record.identifier, e);
        }
    }

    Ok(ItemResult::Extracted(record))
}

// Cache implementations may block (SQLite), so they run off the async workers.
async fn lookup(cache: &Arc<dyn RecordCache>, identifier: &str) -> Result<Option<CacheEntry>> {
    let cache = cache.clone();
    let identifier = identifier.to_string();
    tokio::task::spawn_blocking(move || cache.lookup(&identifier)).await?
}

async fn store(cache: &Arc<dyn RecordCache>, entry: CacheEntry) -> Result<()> {
    let cache = cache.clone();
    tokio::task::spawn_blocking(move || cache.store(&entry)).await?
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn failed(url: &str, error: impl ToString, attempts: u32) -> ItemResult {
    ItemResult::Failed(FetchFailure {
        url: url.to_string(),
        error: error.to_string(),
        attempts,
    })
}
