//! Listing-page parsing: which links are subcategories, which are products, and
//! where the next page is.

use crate::error::{Result, ScanError};
use crate::normalize::{normalize_url, resolve_link};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    pub url: String,
}

/// One implementation per page layout; the active one is chosen by configuration.
pub trait SiteLayout: Send + Sync {
    /// Child category links on a listing page, in document order.
    fn category_links(&self, html: &str, page_url: &str) -> Vec<Link>;

    /// Product page links on a listing page, in document order.
    fn product_links(&self, html: &str, page_url: &str) -> Vec<String>;

    /// The next listing page, if the page advertises one.
    fn next_page(&self, html: &str, page_url: &str) -> Option<String>;
}

/// CSS-selector driven layout. Links leaving the listing's host are ignored.
pub struct SelectorLayout {
    category: Selector,
    product: Selector,
    next: Option<Selector>,
}

pub const DEFAULT_CATEGORY_SELECTOR: &str =
    "ul.product-categories a[href], li.product-category a[href]";
pub const DEFAULT_PRODUCT_SELECTOR: &str = "a.woocommerce-LoopProduct-link[href]";
pub const DEFAULT_NEXT_SELECTOR: &str =
    "a.next.page-numbers[href], a[rel=next][href], link[rel=next][href]";

impl SelectorLayout {
    pub fn new(category: &str, product: &str, next: Option<&str>) -> Result<Self> {
        Ok(Self {
            category: parse_selector("category", category)?,
            product: parse_selector("product", product)?,
            next: next.map(|s| parse_selector("next page", s)).transpose()?,
        })
    }
}

/// Resolved same-host links matched by `selector`. With `skip_self`, links that
/// normalize to the page itself are dropped.
fn same_host_links<'a>(
    document: &'a Html,
    selector: &Selector,
    page_url: &str,
    skip_self: bool,
) -> Vec<(ElementRef<'a>, String)> {
    let host = Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase));
    let page_key = normalize_url(page_url);

    document
        .select(selector)
        .filter_map(|element| {
            let href = element.value().attr("href")?;
            let absolute = resolve_link(page_url, href)?;
            let same_host = Url::parse(&absolute)
                .ok()
                .and_then(|u| u.host_str().map(str::to_lowercase))
                == host;
            if !same_host || absolute == page_url {
                return None;
            }
            if skip_self && normalize_url(&absolute) == page_key {
                return None;
            }
            Some((element, absolute))
        })
        .collect()
}

impl Default for SelectorLayout {
    fn default() -> Self {
        Self::new(
            DEFAULT_CATEGORY_SELECTOR,
            DEFAULT_PRODUCT_SELECTOR,
            Some(DEFAULT_NEXT_SELECTOR),
        )
        .unwrap_or_else(|e| unreachable!("built-in selectors are valid: {}", e))
    }
}

impl SiteLayout for SelectorLayout {
    fn category_links(&self, html: &str, page_url: &str) -> Vec<Link> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for (element, url) in same_host_links(&document, &self.category, page_url, true) {
            if !seen.insert(normalize_url(&url)) {
                continue;
            }
            let text = element.text().collect::<Vec<_>>().join(" ");
            let name = text.split_whitespace().collect::<Vec<_>>().join(" ");
            let name = if name.is_empty() {
                slug_name(&url)
            } else {
                name
            };
            links.push(Link { name, url });
        }

        links
    }

    fn product_links(&self, html: &str, page_url: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();

        same_host_links(&document, &self.product, page_url, true)
            .into_iter()
            .map(|(_, url)| url)
            .filter(|url| seen.insert(normalize_url(url)))
            .collect()
    }

    fn next_page(&self, html: &str, page_url: &str) -> Option<String> {
        let selector = self.next.as_ref()?;
        let document = Html::parse_document(html);
        same_host_links(&document, selector, page_url, false)
            .into_iter()
            .map(|(_, url)| url)
            .next()
    }
}

pub(crate) fn parse_selector(what: &str, selector: &str) -> Result<Selector> {
    if selector.trim().is_empty() {
        return Err(ScanError::ConfigError(format!("{} selector is empty", what)));
    }
    Selector::parse(selector).map_err(|e| {
        ScanError::ConfigError(format!("invalid {} selector '{}': {}", what, selector, e))
    })
}

fn slug_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()?
                .filter(|s| !s.is_empty())
                .last()
                .map(|s| s.replace('-', " "))
        })
        .unwrap_or_else(|| url.to_string())
}
