//! Post-run quality control: duplicate resolution, completeness checks and
//! numeric outlier flags.

use catwalk_scanner::error::{Result, ScanError};
use catwalk_scanner::record::ProductRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    /// Fields every record should carry; missing ones are reported.
    pub required_fields: Vec<String>,
    /// Subset of `required_fields` whose absence drops the record.
    pub mandatory_fields: Vec<String>,
    /// Numeric fields checked against the median.
    pub anomaly_fields: Vec<String>,
    /// Values outside `[median / k, median * k]` are flagged.
    pub anomaly_factor: f64,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            required_fields: vec!["sku".into(), "name".into(), "price".into()],
            mandatory_fields: vec!["sku".into(), "name".into()],
            anomaly_fields: vec!["price".into()],
            anomaly_factor: 10.0,
        }
    }
}

impl QcConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.anomaly_factor > 1.0) {
            return Err(ScanError::ConfigError(format!(
                "qc.anomaly_factor must be greater than 1, got {}",
                self.anomaly_factor
            )));
        }
        if let Some(field) = self
            .mandatory_fields
            .iter()
            .find(|f| !self.required_fields.contains(f))
        {
            return Err(ScanError::ConfigError(format!(
                "mandatory field '{}' is not listed in qc.required_fields",
                field
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteRecord {
    pub identifier: String,
    pub url: String,
    pub missing: Vec<String>,
    /// A mandatory field is missing, so the record was kept out of the clean set.
    pub dropped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub identifier: String,
    pub field: String,
    pub value: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QcReport {
    /// Identifiers seen on more than one URL, with every URL that carried them.
    pub duplicates: BTreeMap<String, Vec<String>>,
    pub incomplete: Vec<IncompleteRecord>,
    pub anomalies: Vec<Anomaly>,
}

impl QcReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.incomplete.is_empty() && self.anomalies.is_empty()
    }
}

/// Winner ordering: more non-blank fields, then newer, then smaller URL.
fn better(a: &ProductRecord, b: &ProductRecord) -> Ordering {
    a.completeness()
        .cmp(&b.completeness())
        .then(a.fetched_at.cmp(&b.fetched_at))
        .then(b.url.cmp(&a.url))
}

/// Split raw records into a clean, identifier-unique set and a report of what
/// was wrong with the input.
pub fn evaluate(records: Vec<ProductRecord>, config: &QcConfig) -> (Vec<ProductRecord>, QcReport) {
    let mut report = QcReport::default();

    for record in &records {
        let missing = record.missing_fields(&config.required_fields);
        if !missing.is_empty() {
            let dropped = missing.iter().any(|f| config.mandatory_fields.contains(f));
            report.incomplete.push(IncompleteRecord {
                identifier: record.identifier.clone(),
                url: record.url.clone(),
                missing,
                dropped,
            });
        }
    }

    let mut groups: HashMap<String, Vec<ProductRecord>> = HashMap::new();
    let mut order = Vec::new();
    for record in records {
        if !groups.contains_key(&record.identifier) {
            order.push(record.identifier.clone());
        }
        groups.entry(record.identifier.clone()).or_default().push(record);
    }

    let mut clean = Vec::with_capacity(order.len());
    for identifier in order {
        let Some(group) = groups.remove(&identifier) else {
            continue;
        };
        if group.len() > 1 {
            let mut urls: Vec<String> = group.iter().map(|r| r.url.clone()).collect();
            urls.sort();
            urls.dedup();
            report.duplicates.insert(identifier.clone(), urls);
        }
        // records missing a mandatory field are already listed as dropped
        let winner = group
            .into_iter()
            .filter(|r| r.missing_fields(&config.mandatory_fields).is_empty())
            .max_by(better);
        match winner {
            Some(winner) => clean.push(winner),
            None => debug!("Dropping {}: no record has every mandatory field", identifier),
        }
    }

    for field in &config.anomaly_fields {
        report
            .anomalies
            .extend(find_anomalies(&clean, field, config.anomaly_factor));
    }

    info!(
        "QC: {} clean records, {} duplicated identifiers, {} incomplete, {} anomalies",
        clean.len(),
        report.duplicates.len(),
        report.incomplete.len(),
        report.anomalies.len()
    );
    (clean, report)
}

fn find_anomalies(records: &[ProductRecord], field: &str, k: f64) -> Vec<Anomaly> {
    let values: Vec<(&ProductRecord, &str, f64)> = records
        .iter()
        .filter_map(|r| {
            let raw = r.field(field)?;
            parse_number(raw).map(|n| (r, raw, n))
        })
        .collect();
    if values.len() < 3 {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = values.iter().map(|(_, _, n)| *n).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    if median <= 0.0 {
        return Vec::new();
    }

    let (low, high) = (median / k, median * k);
    values
        .into_iter()
        .filter(|(_, _, n)| *n < low || *n > high)
        .map(|(record, raw, n)| Anomaly {
            identifier: record.identifier.clone(),
            field: field.to_string(),
            value: raw.to_string(),
            reason: if n < low {
                format!("below median/{} ({:.2} < {:.2})", k, n, low)
            } else {
                format!("above median*{} ({:.2} > {:.2})", k, n, high)
            },
        })
        .collect()
}

/// Parse a catalogue-formatted number: `"1 299,00 kr"`, `"1,299.00"`, `"495:-"`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let kept = kept.trim_matches(|c: char| c == ',' || c == '.');
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (kept.rfind(','), kept.rfind('.')) {
        // both present: the later one is the decimal separator
        (Some(c), Some(d)) if c > d => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (Some(c), None) => {
            // a single comma followed by exactly three digits groups thousands
            let decimals = kept.len() - c - 1;
            if kept.matches(',').count() == 1 && decimals != 3 {
                kept.replace(',', ".")
            } else {
                kept.replace(',', "")
            }
        }
        _ => kept.to_string(),
    };
    normalized.parse().ok()
}
