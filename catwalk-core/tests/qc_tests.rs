// Tests for the QC and dedup stage

use catwalk_core::qc::{QcConfig, evaluate, parse_number};
use catwalk_scanner::record::{ContentFingerprint, ProductRecord};
use chrono::{Duration, TimeZone, Utc};

fn record(id: &str, url: &str, fields: &[(&str, &str)], age_secs: i64) -> ProductRecord {
    let base = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    ProductRecord {
        identifier: id.to_string(),
        url: url.to_string(),
        fields: fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        fingerprint: ContentFingerprint::compute(url.as_bytes()),
        fetched_at: base - Duration::seconds(age_secs),
    }
}

fn config(required: &[&str], mandatory: &[&str]) -> QcConfig {
    QcConfig {
        required_fields: required.iter().map(|s| s.to_string()).collect(),
        mandatory_fields: mandatory.iter().map(|s| s.to_string()).collect(),
        anomaly_fields: vec!["price".to_string()],
        anomaly_factor: 10.0,
    }
}

// ============================================================================
// Deduplication Tests
// ============================================================================

#[test]
fn test_duplicate_with_missing_mandatory_field_is_dropped() {
    let records = vec![
        record("SKU1", "https://shop.test/a", &[("name", "Chair"), ("price", "100")], 0),
        record("SKU1", "https://shop.test/b", &[("name", "Chair")], 0),
    ];

    let (clean, report) = evaluate(records, &config(&["name", "price"], &["price"]));

    assert_eq!(clean.len(), 1);
    assert_eq!(clean[0].url, "https://shop.test/a");
    assert_eq!(report.incomplete.len(), 1);
    assert_eq!(report.incomplete[0].url, "https://shop.test/b");
    assert_eq!(report.incomplete[0].missing, vec!["price".to_string()]);
    assert_eq!(
        report.duplicates["SKU1"],
        vec!["https://shop.test/a".to_string(), "https://shop.test/b".to_string()]
    );
}

#[test]
fn test_winner_is_chosen_among_records_with_mandatory_fields() {
    // the fuller record lacks the mandatory price, the thinner one has it
    let records = vec![
        record(
            "SKU1",
            "https://shop.test/a",
            &[("name", "Chair"), ("color", "Oak"), ("size", "L")],
            0,
        ),
        record("SKU1", "https://shop.test/b", &[("name", "Chair"), ("price", "100")], 0),
    ];

    let (clean, report) = evaluate(records, &config(&["name", "price"], &["price"]));

    assert_eq!(clean.len(), 1);
    assert_eq!(clean[0].url, "https://shop.test/b");
    assert_eq!(report.incomplete.len(), 1);
    assert_eq!(report.incomplete[0].url, "https://shop.test/a");
    assert!(report.incomplete[0].dropped);
    assert_eq!(report.duplicates["SKU1"].len(), 2);
}

#[test]
fn test_identifier_without_any_complete_record_is_reported() {
    let records = vec![
        record("SKU2", "https://shop.test/a", &[("name", "Lamp")], 0),
        record("SKU2", "https://shop.test/b", &[("name", "Lamp")], 5),
    ];

    let (clean, report) = evaluate(records, &config(&["name", "price"], &["price"]));

    assert!(clean.is_empty());
    assert_eq!(report.incomplete.len(), 2);
    assert!(report.incomplete.iter().all(|i| i.dropped));
}

#[test]
fn test_tie_breaks_on_recency_then_url() {
    let records = vec![
        record("SKU2", "https://shop.test/old", &[("name", "Lamp")], 60),
        record("SKU2", "https://shop.test/new", &[("name", "Lamp")], 0),
        record("SKU3", "https://shop.test/z", &[("name", "Desk")], 0),
        record("SKU3", "https://shop.test/m", &[("name", "Desk")], 0),
    ];

    let (clean, _) = evaluate(records, &config(&["name"], &[]));

    let winner = |id: &str| clean.iter().find(|r| r.identifier == id).unwrap().url.clone();
    assert_eq!(winner("SKU2"), "https://shop.test/new");
    assert_eq!(winner("SKU3"), "https://shop.test/m");
}

#[test]
fn test_clean_identifiers_are_unique() {
    let records: Vec<_> = (0..20)
        .map(|i| {
            record(
                &format!("SKU{}", i % 7),
                &format!("https://shop.test/p/{}", i),
                &[("name", "x")],
                i,
            )
        })
        .collect();

    let (clean, report) = evaluate(records, &config(&["name"], &["name"]));

    let mut ids: Vec<_> = clean.iter().map(|r| r.identifier.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), clean.len());
    assert_eq!(clean.len(), 7);
    assert_eq!(report.duplicates.len(), 7);
}

#[test]
fn test_optional_missing_field_is_reported_but_kept() {
    let records = vec![record("SKU4", "https://shop.test/p/4", &[("name", "Sofa")], 0)];

    let (clean, report) = evaluate(records, &config(&["name", "price"], &["name"]));

    assert_eq!(clean.len(), 1);
    assert_eq!(report.incomplete.len(), 1);
    assert!(!report.incomplete[0].dropped);
}

// ============================================================================
// Anomaly Tests
// ============================================================================

#[test]
fn test_price_far_from_median_is_flagged_not_dropped() {
    let records = vec![
        record("A", "https://shop.test/a", &[("name", "a"), ("price", "100 kr")], 0),
        record("B", "https://shop.test/b", &[("name", "b"), ("price", "120 kr")], 0),
        record("C", "https://shop.test/c", &[("name", "c"), ("price", "90 kr")], 0),
        record("D", "https://shop.test/d", &[("name", "d"), ("price", "25 000 kr")], 0),
        record("E", "https://shop.test/e", &[("name", "e"), ("price", "5 kr")], 0),
    ];

    let (clean, report) = evaluate(records, &config(&["name", "price"], &["name"]));

    assert_eq!(clean.len(), 5);
    let flagged: Vec<_> = report.anomalies.iter().map(|a| a.identifier.as_str()).collect();
    assert_eq!(flagged, vec!["D", "E"]);
    assert!(report.anomalies.iter().all(|a| a.field == "price"));
}

#[test]
fn test_anomalies_need_three_values() {
    let records = vec![
        record("A", "https://shop.test/a", &[("name", "a"), ("price", "1")], 0),
        record("B", "https://shop.test/b", &[("name", "b"), ("price", "10000")], 0),
    ];

    let (_, report) = evaluate(records, &config(&["name"], &[]));
    assert!(report.anomalies.is_empty());
}

// ============================================================================
// Number Parsing Tests
// ============================================================================

#[test]
fn test_parse_number_handles_catalogue_formats() {
    assert_eq!(parse_number("1 299,00 kr"), Some(1299.0));
    assert_eq!(parse_number("1,299.50"), Some(1299.5));
    assert_eq!(parse_number("1.299,50"), Some(1299.5));
    assert_eq!(parse_number("495:-"), Some(495.0));
    assert_eq!(parse_number("12,5"), Some(12.5));
    assert_eq!(parse_number("Pris saknas"), None);
}

// ============================================================================
// Config Validation Tests
// ============================================================================

#[test]
fn test_qc_config_rejects_factor_at_or_below_one() {
    let mut qc = QcConfig::default();
    qc.anomaly_factor = 1.0;
    assert!(qc.validate().is_err());
}

#[test]
fn test_qc_config_rejects_mandatory_outside_required() {
    let qc = config(&["name"], &["price"]);
    assert!(qc.validate().is_err());
}
