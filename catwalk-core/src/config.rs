use crate::qc::QcConfig;
use catwalk_scanner::error::{Result, ScanError};
use catwalk_scanner::exclusion::Exclusions;
use catwalk_scanner::extract::SelectorExtractor;
use catwalk_scanner::fetch::{HttpFetcher, RetryPolicy};
use catwalk_scanner::layout::{
    DEFAULT_CATEGORY_SELECTOR, DEFAULT_NEXT_SELECTOR, DEFAULT_PRODUCT_SELECTOR, SelectorLayout,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How listing pages are laid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub category_selector: String,
    pub product_selector: String,
    pub next_selector: Option<String>,
    /// Query parameter addressing listing page N when no next link is present.
    pub pagination_param: String,
    /// Product links on a full listing page, if the site uses a fixed page size.
    pub full_page_size: Option<usize>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            category_selector: DEFAULT_CATEGORY_SELECTOR.to_string(),
            product_selector: DEFAULT_PRODUCT_SELECTOR.to_string(),
            next_selector: Some(DEFAULT_NEXT_SELECTOR.to_string()),
            pagination_param: "page".to_string(),
            full_page_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub identifier_field: String,
    /// Field name to CSS selectors, tried in order. `css@attr` reads an attribute.
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let fields = [
            ("sku", vec![".sku", "[itemprop=sku]"]),
            (
                "name",
                vec![".edgtf-single-product-title", "h1.product_title", "h1[itemprop=name]", "h1"],
            ),
            ("price", vec![".price ins .amount", ".price .amount", ".price"]),
            (
                "description",
                vec![
                    ".woocommerce-product-details__short-description",
                    "#tab-description",
                ],
            ),
            ("category", vec![".posted_in a"]),
            ("image", vec!["img.wp-post-image@src", "meta[property='og:image']@content"]),
        ];
        Self {
            identifier_field: "sku".to_string(),
            fields: fields
                .into_iter()
                .map(|(name, selectors)| {
                    (
                        name.to_string(),
                        selectors.into_iter().map(str::to_string).collect(),
                    )
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub max_depth: usize,
    pub max_pages: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Minimum gap between two requests of one worker.
    pub politeness_delay_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            max_pages: 50,
            timeout_secs: 20,
            user_agent: catwalk_scanner::fetch::DEFAULT_USER_AGENT.to_string(),
            politeness_delay_ms: 250,
            max_backoff_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatwalkConfig {
    pub site: SiteConfig,
    pub exclusions: Exclusions,
    pub extraction: ExtractionConfig,
    pub qc: QcConfig,
    pub crawl: CrawlConfig,
}

impl CatwalkConfig {
    /// Read and validate a JSON configuration file. Missing sections take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            ScanError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: CatwalkConfig = serde_json::from_str(&text).map_err(|e| {
            ScanError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration. Refuses to overwrite unless `force` is set.
    pub fn write_default(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(ScanError::ConfigError(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&CatwalkConfig::default())
            .map_err(|e| ScanError::ConfigError(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let selectors = [
            ("site.category_selector", Some(&self.site.category_selector)),
            ("site.product_selector", Some(&self.site.product_selector)),
            ("site.next_selector", self.site.next_selector.as_ref()),
        ];
        for (name, selector) in selectors {
            if selector.is_some_and(|s| s.trim().is_empty()) {
                return Err(ScanError::ConfigError(format!("{} is empty", name)));
            }
        }
        if self.site.pagination_param.trim().is_empty() {
            return Err(ScanError::ConfigError("site.pagination_param is empty".into()));
        }
        for (field, selectors) in &self.extraction.fields {
            if selectors.is_empty() || selectors.iter().any(|s| s.trim().is_empty()) {
                return Err(ScanError::ConfigError(format!(
                    "extraction.fields.{} has an empty selector",
                    field
                )));
            }
        }
        if !self
            .extraction
            .fields
            .contains_key(&self.extraction.identifier_field)
        {
            return Err(ScanError::ConfigError(format!(
                "identifier field '{}' has no selectors",
                self.extraction.identifier_field
            )));
        }
        if self.crawl.max_depth == 0 {
            return Err(ScanError::ConfigError("crawl.max_depth must be at least 1".into()));
        }
        if self.crawl.max_pages == 0 {
            return Err(ScanError::ConfigError("crawl.max_pages must be at least 1".into()));
        }
        self.exclusions.validate()?;
        self.qc.validate()?;

        // Selectors that do not parse are config errors too
        self.layout()?;
        self.extractor()?;
        Ok(())
    }

    pub fn layout(&self) -> Result<SelectorLayout> {
        SelectorLayout::new(
            &self.site.category_selector,
            &self.site.product_selector,
            self.site.next_selector.as_deref(),
        )
    }

    pub fn extractor(&self) -> Result<SelectorExtractor> {
        SelectorExtractor::new(&self.extraction.identifier_field, &self.extraction.fields)
    }

    pub fn fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::with_options(
            Duration::from_secs(self.crawl.timeout_secs.max(1)),
            &self.crawl.user_agent,
        )
    }

    pub fn retry_policy(&self, max_retries: u32, base_delay: Duration) -> RetryPolicy {
        RetryPolicy::new(max_retries, base_delay)
            .with_max_delay(Duration::from_millis(self.crawl.max_backoff_ms))
            .with_jitter(Duration::from_millis(self.crawl.jitter_ms))
    }
}
