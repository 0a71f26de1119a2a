//! Exclusion rules shared by the tree builder, the pagination collector and the
//! orchestrator.
//!
//! The rules are plain data loaded from configuration. Once built they are never
//! mutated; components receive them behind an `Arc`.

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use url::Url;

/// What is being tested against the exclusion rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Category,
    Product,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exclusions {
    /// URLs starting with any of these are skipped, whatever their kind.
    pub url_prefixes: Vec<String>,
    /// URLs containing any of these are skipped, whatever their kind.
    pub url_substrings: Vec<String>,
    /// Category names (or their URL slugs) to drop together with their subtree.
    pub category_names: Vec<String>,
    /// Product names or brands; matched case-insensitively as substrings.
    pub product_terms: Vec<String>,
}

impl Exclusions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_url_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.url_prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    pub fn with_category_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.category_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_product_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.product_terms.extend(terms.into_iter().map(Into::into));
        self
    }

    /// Reject blank entries: an empty prefix or substring would exclude everything.
    pub fn validate(&self) -> Result<()> {
        let lists = [
            ("url_prefixes", &self.url_prefixes),
            ("url_substrings", &self.url_substrings),
            ("category_names", &self.category_names),
            ("product_terms", &self.product_terms),
        ];
        for (name, list) in lists {
            if list.iter().any(|entry| entry.trim().is_empty()) {
                return Err(ScanError::ConfigError(format!(
                    "exclusions.{} contains an empty entry",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn is_excluded(&self, kind: EntityKind, value: &str) -> bool {
        if self.url_prefixes.iter().any(|p| value.starts_with(p.as_str()))
            || self.url_substrings.iter().any(|s| value.contains(s.as_str()))
        {
            return true;
        }

        let lowered = value.to_lowercase();
        match kind {
            EntityKind::Category => {
                let slug = last_path_segment(value);
                self.category_names.iter().any(|name| {
                    let name = name.to_lowercase();
                    lowered == name || slug.as_deref() == Some(slugify(&name).as_str())
                })
            }
            EntityKind::Product => self
                .product_terms
                .iter()
                .any(|term| lowered.contains(&term.to_lowercase())),
        }
    }
}

fn last_path_segment(value: &str) -> Option<String> {
    let url = Url::parse(value).ok()?;
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_lowercase())
}

fn slugify(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("-")
}
