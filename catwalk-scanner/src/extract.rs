use crate::error::{Result, ScanError};
use crate::layout::parse_selector;
use crate::normalize::resolve_link;
use crate::record::Fields;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Turns a product page into an identifier and a set of named fields.
///
/// `identify` runs on every fetched page, before the cache is consulted, so it
/// should be cheap. `extract` only runs when the cache cannot supply the record.
pub trait FieldExtractor: Send + Sync {
    fn identify(&self, page: &[u8], url: &str) -> Result<String>;

    fn extract(&self, page: &[u8], url: &str) -> Result<Fields>;
}

/// One selector candidate. `attr` reads an attribute instead of the text content.
struct Probe {
    selector: Selector,
    attr: Option<String>,
}

struct FieldRule {
    name: String,
    probes: Vec<Probe>,
}

/// CSS-selector driven extractor.
///
/// Each field has an ordered list of selectors; the first one producing a
/// non-blank value wins. A selector written as `css@attr` reads that attribute,
/// and `href`/`src` attributes are resolved against the page URL.
pub struct SelectorExtractor {
    identifier_field: String,
    rules: Vec<FieldRule>,
}

impl SelectorExtractor {
    pub fn new(identifier_field: &str, fields: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        if !fields.contains_key(identifier_field) {
            return Err(ScanError::ConfigError(format!(
                "identifier field '{}' has no selectors",
                identifier_field
            )));
        }

        let mut rules = Vec::with_capacity(fields.len());
        for (name, selectors) in fields {
            if selectors.is_empty() {
                return Err(ScanError::ConfigError(format!(
                    "field '{}' has no selectors",
                    name
                )));
            }
            let probes = selectors
                .iter()
                .map(|s| parse_probe(name, s))
                .collect::<Result<Vec<_>>>()?;
            rules.push(FieldRule {
                name: name.clone(),
                probes,
            });
        }

        Ok(Self {
            identifier_field: identifier_field.to_string(),
            rules,
        })
    }

    fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}

fn parse_probe(field: &str, raw: &str) -> Result<Probe> {
    let (css, attr) = match raw.rsplit_once('@') {
        Some((css, attr)) if is_attr_name(attr) => (css, Some(attr.to_string())),
        _ => (raw, None),
    };
    Ok(Probe {
        selector: parse_selector(&format!("field '{}'", field), css)?,
        attr,
    })
}

fn is_attr_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

fn element_value(element: ElementRef<'_>, attr: Option<&str>, url: &str) -> Option<String> {
    let value = match attr {
        Some(name) => {
            let raw = element.value().attr(name)?.trim();
            if name == "href" || name == "src" {
                resolve_link(url, raw).unwrap_or_else(|| raw.to_string())
            } else {
                raw.to_string()
            }
        }
        None => element.text().collect::<Vec<_>>().join(" "),
    };
    let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    (!value.is_empty()).then_some(value)
}

fn apply(rule: &FieldRule, document: &Html, url: &str) -> Option<String> {
    rule.probes.iter().find_map(|probe| {
        document
            .select(&probe.selector)
            .find_map(|el| element_value(el, probe.attr.as_deref(), url))
    })
}

impl FieldExtractor for SelectorExtractor {
    fn identify(&self, page: &[u8], url: &str) -> Result<String> {
        let rule = self.rule(&self.identifier_field).ok_or_else(|| {
            ScanError::ConfigError(format!("no rule for '{}'", self.identifier_field))
        })?;
        let document = Html::parse_document(&String::from_utf8_lossy(page));
        apply(rule, &document, url).ok_or_else(|| {
            ScanError::ParseError(format!(
                "no '{}' found on {}",
                self.identifier_field, url
            ))
        })
    }

    fn extract(&self, page: &[u8], url: &str) -> Result<Fields> {
        let document = Html::parse_document(&String::from_utf8_lossy(page));
        let fields: Fields = self
            .rules
            .iter()
            .filter_map(|rule| apply(rule, &document, url).map(|v| (rule.name.clone(), v)))
            .collect();

        if !fields.contains_key(&self.identifier_field) {
            return Err(ScanError::ParseError(format!(
                "no '{}' found on {}",
                self.identifier_field, url
            )));
        }
        Ok(fields)
    }
}
