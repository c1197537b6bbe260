//! `filtering` pipeline stage (spec §4.6): evaluates `DLFilter` rules and
//! move ops against a video's metadata map. Pure function of `(filters,
//! metadata, cu.url)`, as spec §8's round-trip laws require.

use crate::config::{DLFilter, FilterKind, FilterOp, MoveOp};
use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct FilterOutcome {
    pub(crate) ignore: bool,
    pub(crate) move_output_dir: Option<String>,
}

fn field_str<'a>(metadata: &'a HashMap<String, serde_json::Value>, field: &str) -> Option<&'a str> {
    metadata.get(field).and_then(|v| v.as_str())
}

/// `true` if `value` is empty (a presence test) and the field exists, or if
/// the field's string value contains `value` (case-sensitive, matching
/// metadata verbatim — spec doesn't call for case-folding here, unlike move
/// ops).
fn field_matches(metadata: &HashMap<String, serde_json::Value>, field: &str, value: &str) -> bool {
    match field_str(metadata, field) {
        Some(s) if value.is_empty() => !s.is_empty() || metadata.contains_key(field),
        Some(s) => s.contains(value),
        None => false,
    }
}

fn rule_applies(rule_channel_url: &Option<String>, cu_url: &str) -> bool {
    match rule_channel_url {
        Some(u) => u == cu_url,
        None => true,
    }
}

/// `true` means the rule's condition is satisfied ("passes").
fn rule_passes(filter: &DLFilter, metadata: &HashMap<String, serde_json::Value>) -> bool {
    let raw = field_matches(metadata, &filter.field, &filter.value);
    match filter.op {
        FilterOp::Contains => raw,
        FilterOp::Omits => !raw,
    }
}

fn parse_upload_date(s: &str) -> Option<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(s, "%Y%m%d").ok()
}

/// Evaluates filters, then the date-range window, then move ops (spec §4.6).
pub(crate) fn evaluate(
    filters: &[DLFilter],
    move_ops: &[MoveOp],
    metadata: &HashMap<String, serde_json::Value>,
    cu_url: &str,
    from_date: &str,
    to_date: &str,
) -> FilterOutcome {
    let applicable: Vec<&DLFilter> = filters
        .iter()
        .filter(|f| rule_applies(&f.channel_url, cu_url))
        .collect();

    let mut must_total = 0u32;
    let mut must_passed = 0u32;
    let mut any_total = 0u32;
    let mut any_passed = 0u32;

    for filter in &applicable {
        let passed = rule_passes(filter, metadata);
        match filter.kind {
            FilterKind::Must => {
                must_total += 1;
                if passed {
                    must_passed += 1;
                }
            }
            FilterKind::Any => {
                any_total += 1;
                if passed {
                    any_passed += 1;
                }
            }
        }
    }

    let must_failed = must_passed < must_total;
    let any_failed = any_total > 0 && any_passed == 0 && must_passed == 0;

    if must_failed || any_failed {
        return FilterOutcome {
            ignore: true,
            move_output_dir: None,
        };
    }

    if let Some(upload_date) = field_str(metadata, "upload_date").and_then(parse_upload_date) {
        if !from_date.is_empty() {
            match parse_upload_date(from_date) {
                Some(d) if upload_date < d => {
                    return FilterOutcome {
                        ignore: true,
                        move_output_dir: None,
                    };
                }
                Some(_) => {}
                None => tracing::warn!(bound = from_date, "from_date failed to parse, ignoring bound"),
            }
        }
        if !to_date.is_empty() {
            match parse_upload_date(to_date) {
                Some(d) if upload_date > d => {
                    return FilterOutcome {
                        ignore: true,
                        move_output_dir: None,
                    };
                }
                Some(_) => {}
                None => tracing::warn!(bound = to_date, "to_date failed to parse, ignoring bound"),
            }
        }
    }

    let move_output_dir = move_ops
        .iter()
        .filter(|op| rule_applies(&op.channel_url, cu_url))
        .find(|op| {
            field_str(metadata, &op.field)
                .map(|v| v.to_lowercase().contains(&op.contains_value.to_lowercase()))
                .unwrap_or(false)
                || op.field.to_lowercase().contains(&op.contains_value.to_lowercase())
        })
        .map(|op| op.output_dir.clone());

    FilterOutcome {
        ignore: false,
        move_output_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(title: &str) -> HashMap<String, serde_json::Value> {
        HashMap::from([("title".to_string(), json!(title))])
    }

    #[test]
    fn must_omits_hard_fail_ignores() {
        // Boundary scenario 2 from spec §8.
        let filters = vec![DLFilter {
            field: "title".into(),
            op: FilterOp::Omits,
            value: "puppies".into(),
            kind: FilterKind::Must,
            channel_url: None,
        }];
        let outcome = evaluate(&filters, &[], &metadata("Puppies in the park"), "cu", "", "");
        assert!(outcome.ignore);
    }

    #[test]
    fn any_filter_success_proceeds() {
        // Boundary scenario 3 from spec §8.
        let filters = vec![
            DLFilter {
                field: "title".into(),
                op: FilterOp::Contains,
                value: "kittens".into(),
                kind: FilterKind::Any,
                channel_url: None,
            },
            DLFilter {
                field: "title".into(),
                op: FilterOp::Contains,
                value: "puppies".into(),
                kind: FilterKind::Any,
                channel_url: None,
            },
        ];
        let outcome = evaluate(&filters, &[], &metadata("Puppies in the park"), "cu", "", "");
        assert!(!outcome.ignore);
    }

    #[test]
    fn scoped_rule_for_other_channel_url_is_skipped() {
        let filters = vec![DLFilter {
            field: "title".into(),
            op: FilterOp::Omits,
            value: "puppies".into(),
            kind: FilterKind::Must,
            channel_url: Some("other-cu".into()),
        }];
        let outcome = evaluate(&filters, &[], &metadata("Puppies in the park"), "cu", "", "");
        assert!(!outcome.ignore);
    }

    #[test]
    fn date_window_ignores_outside_range() {
        let mut meta = metadata("anything");
        meta.insert("upload_date".into(), json!("20200101"));
        let outcome = evaluate(&[], &[], &meta, "cu", "20210101", "");
        assert!(outcome.ignore);
    }

    #[test]
    fn move_op_assigns_output_dir() {
        let meta = metadata("Gameplay highlights");
        let ops = vec![MoveOp {
            field: "title".into(),
            contains_value: "gameplay".into(),
            output_dir: "/videos/gaming".into(),
            channel_url: None,
        }];
        let outcome = evaluate(&[], &ops, &meta, "cu", "", "");
        assert_eq!(outcome.move_output_dir, Some("/videos/gaming".to_string()));
    }
}
