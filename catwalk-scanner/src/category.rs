use crate::error::{Result, ScanError};
use crate::exclusion::{EntityKind, Exclusions};
use crate::fetch::{HttpFetcher, Politeness, RetryPolicy};
use crate::layout::SiteLayout;
use crate::normalize::normalize_url;
use crate::record::CategoryNode;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Per-build traversal state.
struct Walk {
    visited: HashSet<String>,
    ancestors: Vec<String>,
}

/// Depth-first discovery of the category hierarchy below a root listing page.
pub struct CategoryTreeBuilder {
    fetcher: HttpFetcher,
    layout: Arc<dyn SiteLayout>,
    exclusions: Arc<Exclusions>,
    retry: RetryPolicy,
    max_depth: usize,
    politeness: Mutex<Politeness>,
    cancel: Arc<AtomicBool>,
}

impl CategoryTreeBuilder {
    pub fn new(fetcher: HttpFetcher, layout: Arc<dyn SiteLayout>, exclusions: Arc<Exclusions>) -> Self {
        Self {
            fetcher,
            layout,
            exclusions,
            retry: RetryPolicy::default(),
            max_depth: 4,
            politeness: Mutex::new(Politeness::new(Duration::ZERO)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Nodes at this level are kept but never fetched.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.politeness = Mutex::new(Politeness::new(delay));
        self
    }

    /// Once the flag is set no further category page is requested; the tree
    /// built so far is returned.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Build the tree rooted at `root_url`. Only a failure to fetch the root is fatal.
    pub async fn build(&self, root_url: &str) -> Result<CategoryNode> {
        let parsed = Url::parse(root_url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", root_url, e)))?;
        let name = parsed.host_str().unwrap_or(root_url).to_string();
        let mut root = CategoryNode::new(name, root_url, 0);

        if self.is_cancelled() {
            info!("Cancelled before fetching {}", root_url);
            return Ok(root);
        }
        info!("Building category tree from {} (max depth {})", root_url, self.max_depth);

        let html = self.fetch_listing(root_url).await?;

        let root_key = normalize_url(root_url);
        let mut walk = Walk {
            visited: HashSet::from([root_key.clone()]),
            ancestors: vec![root_key],
        };

        self.descend(&mut root, html, &mut walk).await;

        info!("Category tree built: {} nodes", root.node_count());
        Ok(root)
    }

    fn descend<'a>(
        &'a self,
        node: &'a mut CategoryNode,
        html: String,
        walk: &'a mut Walk,
    ) -> BoxFuture<'a, ()> {
        async move {
            let links = self.layout.category_links(&html, &node.url);
            drop(html);
            debug!("{} child links on {}", links.len(), node.url);

            for link in links {
                if self.is_cancelled() {
                    debug!("Cancelled while walking {}", node.url);
                    break;
                }
                let key = normalize_url(&link.url);
                if walk.ancestors.contains(&key) {
                    debug!("Dropping back-link from {} to ancestor {}", node.url, link.url);
                    continue;
                }
                if self.exclusions.is_excluded(EntityKind::Category, &link.url)
                    || self.exclusions.is_excluded(EntityKind::Category, &link.name)
                {
                    info!("Excluded category '{}' ({})", link.name, link.url);
                    continue;
                }

                let mut child = CategoryNode::new(link.name, link.url, node.level + 1);

                if !walk.visited.insert(key.clone()) {
                    debug!("Already visited {}, keeping as leaf", child.url);
                    node.children.push(child);
                    continue;
                }
                if child.level >= self.max_depth {
                    node.children.push(child);
                    continue;
                }

                match self.fetch_listing(&child.url).await {
                    Ok(page) => {
                        walk.ancestors.push(key);
                        self.descend(&mut child, page, walk).await;
                        walk.ancestors.pop();
                    }
                    Err(e) => warn!("Category page failed, keeping as leaf: {}", e),
                }
                node.children.push(child);
            }
        }
        .boxed()
    }

    async fn fetch_listing(&self, url: &str) -> Result<String> {
        self.politeness.lock().await.wait().await;
        let (result, _) = self.fetcher.fetch_with_retry(url, &self.retry).await;
        result.map(|page| page.text().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::layout::SelectorLayout;
    use wiremock::{
        Mock, MockServer, Request, Respond, ResponseTemplate,
        matchers::{method, path},
    };

    fn listing(children: &[(&str, &str)]) -> String {
        let links: String = children
            .iter()
            .map(|(name, href)| format!(r#"<a class="cat" href="{}">{}</a>"#, href, name))
            .collect();
        format!("<html><body>{}</body></html>", links)
    }

    async fn serve(server: &MockServer, at: &str, children: &[(&str, &str)]) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(children)))
            .mount(server)
            .await;
    }

    fn builder(exclusions: Exclusions) -> CategoryTreeBuilder {
        let layout = Arc::new(SelectorLayout::new("a.cat", "a.prod", None).unwrap());
        CategoryTreeBuilder::new(HttpFetcher::new().unwrap(), layout, Arc::new(exclusions))
            .with_retry(RetryPolicy::new(0, Duration::from_millis(1)).with_jitter(Duration::ZERO))
    }

    fn assert_no_ancestor_repeats(node: &CategoryNode, path: &mut Vec<String>) {
        let key = normalize_url(&node.url);
        assert!(!path.contains(&key), "{} repeats an ancestor", node.url);
        path.push(key);
        for child in &node.children {
            assert_eq!(child.level, node.level + 1);
            assert_no_ancestor_repeats(child, path);
        }
        path.pop();
    }

    #[tokio::test]
    async fn test_cycles_terminate_and_levels_increase() {
        let server = MockServer::start().await;
        serve(&server, "/", &[("Bord", "/c/bord/"), ("Stolar", "/c/stolar/")]).await;
        serve(&server, "/c/bord/", &[("Hem", "/"), ("Runda", "/c/bord/runda/")]).await;
        serve(&server, "/c/bord/runda/", &[("Bord", "/c/bord/"), ("Stolar", "/c/stolar/")]).await;
        serve(&server, "/c/stolar/", &[("Runda", "/c/bord/runda/")]).await;

        let tree = builder(Exclusions::none())
            .build(&format!("{}/", server.uri()))
            .await
            .unwrap();

        assert_no_ancestor_repeats(&tree, &mut Vec::new());
        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["127.0.0.1", "Bord", "Runda", "Stolar", "Stolar"]);
        // the second Stolar is the root's own link, already walked below Runda
        assert!(tree.children[1].is_leaf());
    }

    #[tokio::test]
    async fn test_excluded_category_is_pruned_with_subtree() {
        let server = MockServer::start().await;
        serve(&server, "/", &[("Bord", "/c/bord/"), ("Tält", "/c/talt/")]).await;
        serve(&server, "/c/bord/", &[]).await;
        Mock::given(method("GET"))
            .and(path("/c/talt/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[("Big", "/c/talt/big/")])))
            .expect(0)
            .mount(&server)
            .await;

        let tree = builder(Exclusions::none().with_category_names(["Tält"]))
            .build(&format!("{}/", server.uri()))
            .await
            .unwrap();

        assert_eq!(tree.node_count(), 2);
        assert!(tree.iter().all(|n| !n.url.contains("talt")));
    }

    #[tokio::test]
    async fn test_max_depth_stops_fetching() {
        let server = MockServer::start().await;
        serve(&server, "/", &[("One", "/d1/")]).await;
        serve(&server, "/d1/", &[("Two", "/d2/")]).await;
        Mock::given(method("GET"))
            .and(path("/d2/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[("Three", "/d3/")])))
            .expect(0)
            .mount(&server)
            .await;

        let tree = builder(Exclusions::none())
            .with_max_depth(2)
            .build(&format!("{}/", server.uri()))
            .await
            .unwrap();

        let levels: Vec<_> = tree.iter().map(|n| n.level).collect();
        assert_eq!(levels, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failing_child_becomes_leaf() {
        let server = MockServer::start().await;
        serve(&server, "/", &[("Broken", "/broken/"), ("Fine", "/fine/")]).await;
        serve(&server, "/fine/", &[]).await;
        Mock::given(method("GET"))
            .and(path("/broken/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tree = builder(Exclusions::none())
            .build(&format!("{}/", server.uri()))
            .await
            .unwrap();

        assert_eq!(tree.children.len(), 2);
        assert!(tree.children[0].is_leaf());
    }

    #[tokio::test]
    async fn test_cancelled_builder_returns_bare_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[("Bord", "/c/bord/")])))
            .expect(0)
            .mount(&server)
            .await;

        let tree = builder(Exclusions::none())
            .with_cancel_flag(Arc::new(AtomicBool::new(true)))
            .build(&format!("{}/", server.uri()))
            .await
            .unwrap();

        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.level, 0);
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
    async fn test_cancel_after_root_stops_descent() {
        let server = MockServer::start().await;
        let cancel = Arc::new(AtomicBool::new(false));
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(CancellingListing {
                body: listing(&[("Bord", "/c/bord/"), ("Stolar", "/c/stolar/")]),
                cancel: cancel.clone(),
            })
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/c/bord/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(&[])))
            .expect(0)
            .mount(&server)
            .await;

        let tree = builder(Exclusions::none())
            .with_cancel_flag(cancel)
            .build(&format!("{}/", server.uri()))
            .await
            .unwrap();

        assert_eq!(tree.node_count(), 1);
    }

    #[tokio::test]
    async fn test_root_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = builder(Exclusions::none())
            .build(&format!("{}/", server.uri()))
            .await;

        assert!(matches!(
            result,
            Err(ScanError::Fetch {
                source: FetchError::Status(500),
                ..
            })
        ));
    }
}
