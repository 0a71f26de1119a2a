use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use url::Url;

/// Query parameters that only select a listing page and never identify a product.
/// Short names such as `p` are left alone: shops use `?p=<id>` for product pages.
pub const PAGINATION_PARAMS: &[&str] = &["page", "paged"];

/// Resolve `href` against the page it was found on. Returns `None` for links that
/// can never point at a catalogue page.
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with('#')
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);

    Some(url.to_string())
}

/// Canonical identity of a URL: lower-case scheme and host, default port and
/// fragment dropped, pagination removed (both `?page=N` and `/page/N/`), remaining
/// query pairs sorted, trailing slash stripped except on the root path.
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.trim().to_string();
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !PAGINATION_PARAMS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();
    if segments.len() >= 2
        && segments[segments.len() - 2] == "page"
        && segments[segments.len() - 1].chars().all(|c| c.is_ascii_digit())
    {
        segments.truncate(segments.len() - 2);
    }

    let mut normalized = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().unwrap_or_default().to_lowercase()
    );
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push('/');
    normalized.push_str(&segments.join("/"));

    if !pairs.is_empty() {
        let query = pairs
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{}={}", k, v) })
            .collect::<Vec<_>>()
            .join("&");
        normalized.push('?');
        normalized.push_str(&query);
    }

    normalized
}

/// A product page to fetch. Two refs are equal when their normalized URLs are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ProductRefRepr", into = "ProductRefRepr")]
pub struct ProductRef {
    url: String,
    key: String,
}

#[derive(Serialize, Deserialize)]
struct ProductRefRepr {
    url: String,
}

impl From<ProductRefRepr> for ProductRef {
    fn from(repr: ProductRefRepr) -> Self {
        ProductRef::new(repr.url)
    }
}

impl From<ProductRef> for ProductRefRepr {
    fn from(product: ProductRef) -> Self {
        ProductRefRepr { url: product.url }
    }
}

impl ProductRef {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let key = normalize_url(&url);
        Self { url, key }
    }

    /// The URL as discovered; this is what gets fetched.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for ProductRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ProductRef {}

impl Hash for ProductRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_trailing_slash_and_case() {
        assert_eq!(
            normalize_url("HTTPS://Shop.Test/produkter/bord/"),
            normalize_url("https://shop.test/produkter/bord")
        );
    }

    #[test]
    fn test_normalize_sorts_query_and_drops_pagination() {
        assert_eq!(
            normalize_url("https://shop.test/p?b=2&a=1&page=4"),
            "https://shop.test/p?a=1&b=2"
        );
        assert_eq!(
            normalize_url("https://shop.test/c/bord/page/3/"),
            "https://shop.test/c/bord"
        );
    }

    #[test]
    fn test_normalize_keeps_product_id_query() {
        assert_ne!(
            normalize_url("https://shop.test/?p=101"),
            normalize_url("https://shop.test/?p=102")
        );
        assert_eq!(
            normalize_url("https://shop.test/?paged=2&p=101"),
            "https://shop.test/?p=101"
        );
    }

    #[test]
    fn test_normalize_root_keeps_slash() {
        assert_eq!(normalize_url("https://shop.test"), "https://shop.test/");
        assert_eq!(normalize_url("https://shop.test/#top"), "https://shop.test/");
    }

    #[test]
    fn test_product_ref_identity_uses_normalized_url() {
        let mut set = HashSet::new();
        set.insert(ProductRef::new("https://shop.test/p/chair/"));
        set.insert(ProductRef::new("https://shop.test/p/chair?page=2"));
        set.insert(ProductRef::new("https://shop.test/p/table"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_resolve_link_skips_non_pages() {
        let base = "https://shop.test/c/";
        assert_eq!(resolve_link(base, "mailto:x@y.z"), None);
        assert_eq!(resolve_link(base, "#reviews"), None);
        assert_eq!(
            resolve_link(base, "/p/chair#desc").as_deref(),
            Some("https://shop.test/p/chair")
        );
    }
}
