// Report generation from a finished pipeline run

use crate::qc::QcReport;
use catwalk_scanner::orchestrator::RunStats;
use catwalk_scanner::record::{CategoryNode, FetchFailure, ProductRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }

    /// Guess from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
            .unwrap_or(ReportFormat::Json)
    }
}

/// Everything a run produced: the clean dataset, what QC found, and what failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub root_url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tree: CategoryNode,
    pub product_urls: usize,
    pub listing_pages: usize,
    pub records: Vec<ProductRecord>,
    pub qc: QcReport,
    /// Listing pages and product pages that never produced data.
    pub failures: Vec<FetchFailure>,
    pub stats: RunStats,
}

impl RunReport {
    pub fn status(&self) -> &'static str {
        if self.stats.cancelled {
            "cancelled"
        } else {
            "completed"
        }
    }

    fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

fn section(report: &mut String, title: &str) {
    report.push_str(RULE);
    report.push_str(title);
    report.push('\n');
    report.push_str(RULE);
    report.push('\n');
}

pub fn generate_text_report(data: &RunReport) -> String {
    let mut report = String::new();

    // Header
    report.push_str(RULE);
    report.push_str("                          CATWALK CATALOGUE RUN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Run ID:       {}\n", data.run_id));
    report.push_str(&format!("Status:       {}\n", capitalize(data.status())));
    report.push_str(&format!(
        "Run Date:     {}\n",
        data.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("Duration:     {} seconds\n", data.duration_seconds()));
    report.push_str(&format!("Root:         {}\n", data.root_url));
    report.push('\n');

    section(&mut report, "CATEGORY TREE");
    report.push_str(&render_tree(&data.tree));
    report.push('\n');

    section(&mut report, "SUMMARY");
    report.push_str(&format!("Categories:       {}\n", data.tree.node_count()));
    report.push_str(&format!("Listing pages:    {}\n", data.listing_pages));
    report.push_str(&format!("Product URLs:     {}\n", data.product_urls));
    report.push_str(&format!("Pages fetched:    {}\n", data.stats.fetched));
    report.push_str(&format!("  extracted:      {}\n", data.stats.extracted));
    report.push_str(&format!("  from cache:     {}\n", data.stats.cache_hits));
    report.push_str(&format!("Clean records:    {}\n", data.records.len()));
    report.push_str(&format!("Failures:         {}\n", data.failures.len()));
    report.push('\n');

    if !data.qc.duplicates.is_empty() {
        section(&mut report, "DUPLICATES");
        for (identifier, urls) in &data.qc.duplicates {
            report.push_str(&format!("{}  ({} URLs)\n", identifier, urls.len()));
            for url in urls {
                report.push_str(&format!("  {}\n", url));
            }
        }
        report.push('\n');
    }

    if !data.qc.incomplete.is_empty() {
        section(&mut report, "INCOMPLETE RECORDS");
        for item in &data.qc.incomplete {
            let marker = if item.dropped { "[DROPPED]" } else { "[KEPT]   " };
            report.push_str(&format!(
                "{} {}  missing: {}\n",
                marker,
                item.identifier,
                item.missing.join(", ")
            ));
            report.push_str(&format!("          {}\n", item.url));
        }
        report.push('\n');
    }

    if !data.qc.anomalies.is_empty() {
        section(&mut report, "ANOMALIES");
        for anomaly in &data.qc.anomalies {
            report.push_str(&format!(
                "{}  {} = {}\n",
                anomaly.identifier, anomaly.field, anomaly.value
            ));
            report.push_str(&wrap_text(&anomaly.reason, 80, "  "));
        }
        report.push('\n');
    }

    if !data.failures.is_empty() {
        section(&mut report, "FAILURES");
        for failure in &data.failures {
            report.push_str(&format!(
                "{}  ({} attempt{})\n",
                failure.url,
                failure.attempts,
                if failure.attempts == 1 { "" } else { "s" }
            ));
            report.push_str(&wrap_text(&failure.error, 80, "  "));
        }
        report.push('\n');
    }

    // Footer
    report.push_str(RULE);
    report.push_str("                                 End of Report\n");
    report.push_str(RULE);

    report
}

/// The dataset document written by `catwalk run`.
pub fn generate_json_report(data: &RunReport) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "metadata": {
            "generator": "Catwalk",
            "version": env!("CARGO_PKG_VERSION"),
            "generated_at": Utc::now().to_rfc3339(),
            "format": "json"
        },
        "run": {
            "id": data.run_id,
            "status": data.status(),
            "root_url": data.root_url,
            "start_time": data.started_at.to_rfc3339(),
            "end_time": data.finished_at.to_rfc3339(),
            "duration_seconds": data.duration_seconds(),
            "stats": data.stats
        },
        "summary": {
            "categories": data.tree.node_count(),
            "listing_pages": data.listing_pages,
            "product_urls": data.product_urls,
            "clean_records": data.records.len(),
            "duplicated_identifiers": data.qc.duplicates.len(),
            "incomplete_records": data.qc.incomplete.len(),
            "anomalies": data.qc.anomalies.len(),
            "failures": data.failures.len()
        },
        "categories": data.tree,
        "records": data.records,
        "qc": data.qc,
        "failures": data.failures
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// Box-drawing rendering of a category tree, one node per line.
pub fn render_tree(root: &CategoryNode) -> String {
    let mut result = format!("{}  {}\n", root.name, root.url);
    render_children(root, "", &mut result);
    result
}

fn render_children(node: &CategoryNode, indent: &str, out: &mut String) {
    for (i, child) in node.children.iter().enumerate() {
        let is_last = i == node.children.len() - 1;
        let prefix = if is_last { "└── " } else { "├── " };
        out.push_str(&format!("{}{}{}  {}\n", indent, prefix, child.name, child.url));

        let next_indent = format!("{}{}", indent, if is_last { "    " } else { "│   " });
        render_children(child, &next_indent, out);
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

fn wrap_text(text: &str, width: usize, indent: &str) -> String {
    let mut result = String::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.len() + word.len() + 1 > width - indent.len() && !current_line.is_empty() {
            result.push_str(indent);
            result.push_str(&current_line);
            result.push('\n');
            current_line.clear();
        }

        if !current_line.is_empty() {
            current_line.push(' ');
        }
        current_line.push_str(word);
    }

    if !current_line.is_empty() {
        result.push_str(indent);
        result.push_str(&current_line);
        result.push('\n');
    }

    result
}
