use crate::exclusion::{EntityKind, Exclusions};
use crate::fetch::{HttpFetcher, Politeness, RetryPolicy};
use crate::layout::SiteLayout;
use crate::normalize::{ProductRef, normalize_url};
use crate::record::{CategoryNode, FetchFailure};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Product URLs gathered from every listing page of a category tree.
#[derive(Debug, Default)]
pub struct Collection {
    /// Unique by normalized URL, in discovery order.
    pub products: Vec<ProductRef>,
    /// Listing pages that could not be fetched.
    pub failures: Vec<FetchFailure>,
    pub pages_fetched: usize,
}

pub struct PaginationCollector {
    fetcher: HttpFetcher,
    layout: Arc<dyn SiteLayout>,
    exclusions: Arc<Exclusions>,
    retry: RetryPolicy,
    max_pages: usize,
    full_page_size: Option<usize>,
    page_param: String,
    politeness: Mutex<Politeness>,
    cancel: Arc<AtomicBool>,
}

impl PaginationCollector {
    pub fn new(fetcher: HttpFetcher, layout: Arc<dyn SiteLayout>, exclusions: Arc<Exclusions>) -> Self {
        Self {
            fetcher,
            layout,
            exclusions,
            retry: RetryPolicy::default(),
            max_pages: 50,
            full_page_size: None,
            page_param: "page".to_string(),
            politeness: Mutex::new(Politeness::new(Duration::ZERO)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// A page holding this many product links is taken to have a successor even
    /// without a next link; the successor is addressed through `page_param`.
    pub fn with_full_page_size(mut self, size: usize, page_param: impl Into<String>) -> Self {
        self.full_page_size = Some(size);
        self.page_param = page_param.into();
        self
    }

    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.politeness = Mutex::new(Politeness::new(delay));
        self
    }

    /// Once the flag is set no further listing page is requested.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Walk every category of `tree` in pre-order. Never fails as a whole; pages
    /// that cannot be fetched end their category's walk and are reported.
    pub async fn collect(&self, tree: &CategoryNode) -> Collection {
        let mut collection = Collection::default();
        let mut seen = HashSet::new();
        let mut walked = HashSet::new();

        for node in tree.iter() {
            if self.is_cancelled() {
                info!("Collection cancelled before {}", node.url);
                break;
            }
            if !walked.insert(normalize_url(&node.url)) {
                debug!("Category {} already walked", node.url);
                continue;
            }
            self.walk_category(&node.url, &mut seen, &mut collection)
                .await;
        }

        info!(
            "Collected {} product URLs from {} listing pages ({} failed)",
            collection.products.len(),
            collection.pages_fetched,
            collection.failures.len()
        );
        collection
    }

    async fn walk_category(
        &self,
        category_url: &str,
        seen: &mut HashSet<ProductRef>,
        collection: &mut Collection,
    ) {
        let mut page_url = category_url.to_string();

        for page_no in 1..=self.max_pages {
            self.politeness.lock().await.wait().await;
            if self.is_cancelled() {
                return;
            }
            let (result, attempts) = self.fetcher.fetch_with_retry(&page_url, &self.retry).await;
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    warn!("Listing page failed: {}", e);
                    collection.failures.push(FetchFailure {
                        url: page_url,
                        error: e.to_string(),
                        attempts,
                    });
                    return;
                }
            };
            collection.pages_fetched += 1;

            let html = page.text();
            let links = self.layout.product_links(&html, &page_url);
            let on_page = links.len();
            let mut new = 0;
            for link in links {
                if self.exclusions.is_excluded(EntityKind::Product, &link) {
                    debug!("Excluded product {}", link);
                    continue;
                }
                let product = ProductRef::new(link);
                if seen.insert(product.clone()) {
                    collection.products.push(product);
                    new += 1;
                }
            }
            debug!("{} page {}: {} links, {} new", category_url, page_no, on_page, new);

            if new == 0 {
                return;
            }

            let full = self.full_page_size.is_some_and(|size| size > 0 && on_page >= size);
            let next = self.layout.next_page(&html, &page_url).or_else(|| {
                full.then(|| with_page_param(category_url, &self.page_param, page_no + 1))
                    .flatten()
            });
            match next {
                Some(next) => page_url = next,
                None => return,
            }
        }

        debug!("{} reached the {} page cap", category_url, self.max_pages);
    }
}

fn with_page_param(url: &str, param: &str, page: usize) -> Option<String> {
    let mut url = Url::parse(url).ok()?;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair(param, &page.to_string());
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SelectorLayout;
    use wiremock::{
        Mock, MockServer, Request, Respond, ResponseTemplate,
        matchers::{method, path, query_param, query_param_is_missing},
    };

    fn listing(products: impl IntoIterator<Item = String>, next: Option<&str>) -> String {
        let mut body: String = products
            .into_iter()
            .map(|href| format!(r#"<a class="prod" href="{}">p</a>"#, href))
            .collect();
        if let Some(next) = next {
            body.push_str(&format!(r#"<a class="next" href="{}">Next</a>"#, next));
        }
        format!("<html><body>{}</body></html>", body)
    }

    fn products(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("/p/item-{}", i)).collect()
    }

    fn collector(exclusions: Exclusions) -> PaginationCollector {
        let layout = Arc::new(SelectorLayout::new("a.cat", "a.prod", Some("a.next")).unwrap());
        PaginationCollector::new(HttpFetcher::new().unwrap(), layout, Arc::new(exclusions))
            .with_retry(RetryPolicy::new(0, Duration::from_millis(1)).with_jitter(Duration::ZERO))
    }

    async fn serve(server: &MockServer, at: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_two_pages_yield_twenty_five_refs() {
        let server = MockServer::start().await;
        serve(&server, "/c/bord/", listing(products(0..20), Some("/c/bord/page/2/"))).await;
        serve(&server, "/c/bord/page/2/", listing(products(20..25), None)).await;

        let tree = CategoryNode::new("bord", format!("{}/c/bord/", server.uri()), 0);
        let collection = collector(Exclusions::none()).collect(&tree).await;

        assert_eq!(collection.products.len(), 25);
        assert_eq!(collection.pages_fetched, 2);
        let unique: HashSet<_> = collection.products.iter().collect();
        assert_eq!(unique.len(), 25);
    }

    #[tokio::test]
    async fn test_stops_on_page_without_new_urls() {
        let server = MockServer::start().await;
        serve(&server, "/c/a/", listing(products(0..3), Some("/c/a/page/2/"))).await;
        serve(&server, "/c/a/page/2/", listing(products(0..3), Some("/c/a/page/3/"))).await;
        Mock::given(method("GET"))
            .and(path("/c/a/page/3/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(products(3..6), None)))
            .expect(0)
            .mount(&server)
            .await;

        let tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        let collection = collector(Exclusions::none()).collect(&tree).await;

        assert_eq!(collection.products.len(), 3);
        assert_eq!(collection.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_max_pages_caps_the_walk() {
        let server = MockServer::start().await;
        serve(&server, "/c/a/", listing(products(0..2), Some("/c/a/page/2/"))).await;
        serve(&server, "/c/a/page/2/", listing(products(2..4), Some("/c/a/page/3/"))).await;
        serve(&server, "/c/a/page/3/", listing(products(4..6), None)).await;

        let tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        let collection = collector(Exclusions::none())
            .with_max_pages(2)
            .collect(&tree)
            .await;

        assert_eq!(collection.products.len(), 4);
        assert_eq!(collection.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_full_page_without_next_link_uses_page_param() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c/a/"))
            .and(query_param_is_missing("page"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(products(0..3), None)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c/a/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(products(3..5), None)))
            .mount(&server)
            .await;

        let tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        let collection = collector(Exclusions::none())
            .with_full_page_size(3, "page")
            .collect(&tree)
            .await;

        assert_eq!(collection.products.len(), 5);
        assert_eq!(collection.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_dedup_is_global_and_exclusions_apply() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/c/a/",
            listing(vec!["/p/chair".into(), "/p/acme-lamp".into()], None),
        )
        .await;
        serve(
            &server,
            "/c/b/",
            listing(vec!["/p/chair/".into(), "/p/table".into()], None),
        )
        .await;

        let mut tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        tree.children
            .push(CategoryNode::new("b", format!("{}/c/b/", server.uri()), 1));
        let collection = collector(Exclusions::none().with_product_terms(["acme"]))
            .collect(&tree)
            .await;

        let urls: Vec<_> = collection.products.iter().map(|p| p.url().to_string()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{}/p/chair", server.uri()),
                format!("{}/p/table", server.uri()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_listing_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/c/gone/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tree = CategoryNode::new("gone", format!("{}/c/gone/", server.uri()), 0);
        let collection = collector(Exclusions::none()).collect(&tree).await;

        assert!(collection.products.is_empty());
        assert_eq!(collection.failures.len(), 1);
        assert_eq!(collection.failures[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_product_id_query_links_stay_distinct() {
        let server = MockServer::start().await;
        serve(
            &server,
            "/c/a/",
            listing(vec!["/?p=101".into(), "/?p=102".into(), "/?p=101#top".into()], None),
        )
        .await;

        let tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        let collection = collector(Exclusions::none()).collect(&tree).await;

        let urls: Vec<_> = collection.products.iter().map(|p| p.url().to_string()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{}/?p=101", server.uri()),
                format!("{}/?p=102", server.uri()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_collector_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(products(0..3), None)))
            .expect(0)
            .mount(&server)
            .await;

        let mut tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        tree.children
            .push(CategoryNode::new("b", format!("{}/c/b/", server.uri()), 1));
        let collection = collector(Exclusions::none())
            .with_cancel_flag(Arc::new(AtomicBool::new(true)))
            .collect(&tree)
            .await;

        assert!(collection.products.is_empty());
        assert_eq!(collection.pages_fetched, 0);
        assert!(collection.failures.is_empty());
    }

    /// Serves a listing and raises the cancel flag while doing so.
    struct CancellingListing {
        body: String,
        cancel: Arc<AtomicBool>,
    }

    impl Respond for CancellingListing {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            self.cancel.store(true, Ordering::Relaxed);
            ResponseTemplate::new(200).set_body_string(self.body.clone())
        }
    }

    #[tokio::test]
    async fn test_cancel_between_pages_stops_the_walk() {
        let server = MockServer::start().await;
        let cancel = Arc::new(AtomicBool::new(false));
        Mock::given(method("GET"))
            .and(path("/c/a/"))
            .respond_with(CancellingListing {
                body: listing(products(0..2), Some("/c/a/page/2/")),
                cancel: cancel.clone(),
            })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c/a/page/2/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(products(2..4), None)))
            .expect(0)
            .mount(&server)
            .await;

        let tree = CategoryNode::new("a", format!("{}/c/a/", server.uri()), 0);
        let collection = collector(Exclusions::none())
            .with_cancel_flag(cancel)
            .collect(&tree)
            .await;

        assert_eq!(collection.pages_fetched, 1);
        assert_eq!(collection.products.len(), 2);
    }

    #[test]
    fn test_page_param_replaces_existing_value() {
        assert_eq!(
            with_page_param("https://shop.test/c/?orderby=price&page=4", "page", 5).as_deref(),
            Some("https://shop.test/c/?orderby=price&page=5")
        );
    }
}
