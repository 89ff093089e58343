//! Telemetry payload parser
//!
//! Decodes one JSON telemetry document into a [`PayloadTree`].
//!
//! ```json
//! {
//!   "timespan": "1h",
//!   "start": "2024-01-01T00:00:00Z",
//!   "end": "2024-01-01T01:00:00Z",
//!   "hours": [
//!     {
//!       "hour": "2024-01-01T00:00:00Z",
//!       "status": {
//!         "Run": { "count": 5, "duration": 3600,
//!                  "intervals": [{ "start": "2024-01-01T00:00:00Z",
//!                                  "end": "2024-01-01T01:00:00Z" }] }
//!       },
//!       "production": {
//!         "RecipeA": { "good": 10, "reject": 1, "total": 11, "intervals": [] }
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Only the `hours` array, each hour's `hour` timestamp and each interval's
//! `start`/`end` are required. Everything else falls back to a default when
//! absent or of the wrong shape.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};
use crate::models::{
    HourEntry, Interval, PayloadMeta, PayloadTree, ProductionEntry, StatusEntry,
};

const KEY_TIMESPAN: &str = "timespan";
const KEY_START: &str = "start";
const KEY_END: &str = "end";
const KEY_HOURS: &str = "hours";
const KEY_HOUR: &str = "hour";
const KEY_STATUS: &str = "status";
const KEY_PRODUCTION: &str = "production";
const KEY_INTERVALS: &str = "intervals";
const KEY_COUNT: &str = "count";
const KEY_DURATION: &str = "duration";
const KEY_GOOD: &str = "good";
const KEY_REJECT: &str = "reject";
const KEY_TOTAL: &str = "total";

pub struct PayloadParser;

impl PayloadParser {
    /// Parse a raw telemetry document
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MalformedPayload`] when the text is not JSON,
    /// the `hours` array is missing, or a required timestamp is missing or
    /// unparsable.
    pub fn parse(raw_text: &str) -> IngestResult<PayloadTree> {
        let raw_text = raw_text.strip_prefix('\u{feff}').unwrap_or(raw_text);
        let root: Value = serde_json::from_str(raw_text)?;
        let root = root
            .as_object()
            .ok_or_else(|| IngestError::malformed("document root must be a JSON object"))?;

        let hours = match root.get(KEY_HOURS) {
            Some(Value::Array(hours)) => hours,
            Some(_) => return Err(IngestError::malformed("'hours' must be an array")),
            None => return Err(IngestError::malformed("missing required 'hours' array")),
        };

        let meta = PayloadMeta {
            timespan: root
                .get(KEY_TIMESPAN)
                .and_then(Value::as_str)
                .map(str::to_string),
            start_utc: optional_timestamp(KEY_START, root.get(KEY_START)),
            end_utc: optional_timestamp(KEY_END, root.get(KEY_END)),
        };

        let hours = hours
            .iter()
            .enumerate()
            .map(|(index, hour)| parse_hour(index, hour))
            .collect::<IngestResult<Vec<_>>>()?;

        debug!(
            hours = hours.len(),
            timespan = ?meta.timespan,
            "Parsed telemetry payload"
        );

        Ok(PayloadTree { meta, hours })
    }
}

fn parse_hour(index: usize, value: &Value) -> IngestResult<HourEntry> {
    let path = format!("hours[{}]", index);
    let hour = value
        .as_object()
        .ok_or_else(|| IngestError::malformed(format!("{}: hour entry must be an object", path)))?;

    let hour_start = required_timestamp(&path, KEY_HOUR, hour)?;
    let mut entry = HourEntry::new(hour_start);

    if let Some(Value::Object(statuses)) = hour.get(KEY_STATUS) {
        entry.statuses = parse_statuses(&path, statuses)?;
    }

    if let Some(Value::Object(production)) = hour.get(KEY_PRODUCTION) {
        entry.production = parse_production(&path, production)?;
    }

    Ok(entry)
}

fn parse_statuses(
    hour_path: &str,
    statuses: &Map<String, Value>,
) -> IngestResult<BTreeMap<String, StatusEntry>> {
    let mut parsed = BTreeMap::new();

    for (name, value) in statuses {
        let entry = match value.as_object() {
            Some(fields) => StatusEntry {
                count: tolerant_count(fields.get(KEY_COUNT)),
                duration_seconds: tolerant_count(fields.get(KEY_DURATION)),
                intervals: parse_intervals(
                    &format!("{}.status.{}", hour_path, name),
                    fields.get(KEY_INTERVALS),
                )?,
            },
            None => StatusEntry::default(),
        };
        parsed.insert(name.clone(), entry);
    }

    Ok(parsed)
}

fn parse_production(
    hour_path: &str,
    production: &Map<String, Value>,
) -> IngestResult<Vec<ProductionEntry>> {
    let mut parsed = Vec::with_capacity(production.len());

    for (recipe, value) in production {
        if recipe.trim().is_empty() {
            warn!(path = %hour_path, "Skipping production record with blank recipe name");
            continue;
        }

        let entry = match value.as_object() {
            Some(fields) => ProductionEntry {
                recipe: recipe.clone(),
                good: tolerant_count(fields.get(KEY_GOOD)),
                reject: tolerant_count(fields.get(KEY_REJECT)),
                total: tolerant_count(fields.get(KEY_TOTAL)),
                intervals: parse_intervals(
                    &format!("{}.production.{}", hour_path, recipe),
                    fields.get(KEY_INTERVALS),
                )?,
            },
            None => ProductionEntry {
                recipe: recipe.clone(),
                good: 0,
                reject: 0,
                total: 0,
                intervals: Vec::new(),
            },
        };
        parsed.push(entry);
    }

    Ok(parsed)
}

fn parse_intervals(path: &str, value: Option<&Value>) -> IngestResult<Vec<Interval>> {
    let Some(Value::Array(items)) = value else {
        return Ok(Vec::new());
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let item_path = format!("{}.intervals[{}]", path, index);
            let fields = item.as_object().ok_or_else(|| {
                IngestError::malformed(format!("{}: interval must be an object", item_path))
            })?;
            Ok(Interval::new(
                required_timestamp(&item_path, KEY_START, fields)?,
                required_timestamp(&item_path, KEY_END, fields)?,
            ))
        })
        .collect()
}

/// Parse an offset-aware RFC 3339 timestamp and normalize it to UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn required_timestamp(
    path: &str,
    key: &str,
    fields: &Map<String, Value>,
) -> IngestResult<DateTime<Utc>> {
    match fields.get(key) {
        Some(Value::String(raw)) => parse_timestamp(raw).ok_or_else(|| {
            IngestError::malformed(format!("{}: '{}' is not a valid timestamp: {}", path, key, raw))
        }),
        Some(_) => Err(IngestError::malformed(format!(
            "{}: '{}' must be a timestamp string",
            path, key
        ))),
        None => Err(IngestError::malformed(format!(
            "{}: missing required '{}' timestamp",
            path, key
        ))),
    }
}

fn optional_timestamp(key: &str, value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?;
    let parsed = parse_timestamp(raw);
    if parsed.is_none() {
        debug!(key, value = raw, "Ignoring unparsable top-level timestamp");
    }
    parsed
}

/// Read a non-negative integer, defaulting to 0 for anything unusable
fn tolerant_count(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(truncate))
        },
        _ => None,
    };

    parsed.filter(|n| *n >= 0).unwrap_or(0)
}

fn truncate(value: f64) -> Option<i64> {
    value.is_finite().then(|| value.trunc() as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn malformed_message(raw: &str) -> String {
        match PayloadParser::parse(raw) {
            Err(IngestError::MalformedPayload(message)) => message,
            other => panic!("expected MalformedPayload, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_full_document() {
        let raw = json!({
            "timespan": "1h",
            "start": "2024-01-01T00:00:00Z",
            "end": "2024-01-01T01:00:00Z",
            "hours": [{
                "hour": "2024-01-01T00:00:00Z",
                "status": {
                    "Run": {
                        "count": 5,
                        "duration": 3600,
                        "intervals": [{"start": "2024-01-01T00:00:00Z", "end": "2024-01-01T01:00:00Z"}]
                    },
                    "Idle": {"count": 0, "duration": 0}
                },
                "production": {
                    "RecipeA": {"good": 10, "reject": 1, "total": 11, "intervals": [
                        {"start": "2024-01-01T00:10:00Z", "end": "2024-01-01T00:40:00Z"}
                    ]}
                }
            }]
        })
        .to_string();

        let tree = PayloadParser::parse(&raw).unwrap();

        assert_eq!(tree.meta.timespan.as_deref(), Some("1h"));
        assert_eq!(tree.meta.start_utc, Some(utc(0, 0)));
        assert_eq!(tree.meta.end_utc, Some(utc(1, 0)));
        assert_eq!(tree.hours.len(), 1);

        let hour = &tree.hours[0];
        assert_eq!(hour.hour_start, utc(0, 0));
        assert_eq!(hour.statuses.len(), 2);
        let run = &hour.statuses["Run"];
        assert_eq!(run.count, 5);
        assert_eq!(run.duration_seconds, 3600);
        assert_eq!(run.intervals, vec![Interval::new(utc(0, 0), utc(1, 0))]);
        assert!(hour.statuses["Idle"].intervals.is_empty());

        assert_eq!(hour.production.len(), 1);
        let recipe = &hour.production[0];
        assert_eq!(recipe.recipe, "RecipeA");
        assert_eq!((recipe.good, recipe.reject, recipe.total), (10, 1, 11));
        assert_eq!(recipe.intervals[0].duration_seconds(), 1800.0);
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        let message = malformed_message("{ not json");
        assert!(message.contains("invalid JSON"));
    }

    #[test]
    fn test_non_object_root_is_malformed() {
        assert!(malformed_message("[1, 2, 3]").contains("root"));
    }

    #[test]
    fn test_missing_hours_is_malformed() {
        let message = malformed_message(r#"{"timespan": "1h"}"#);
        assert!(message.contains("hours"));
    }

    #[test]
    fn test_hours_not_array_is_malformed() {
        let message = malformed_message(r#"{"hours": {"hour": "2024-01-01T00:00:00Z"}}"#);
        assert!(message.contains("must be an array"));
    }

    #[test]
    fn test_hour_without_timestamp_is_malformed() {
        let message = malformed_message(r#"{"hours": [{"status": {}}]}"#);
        assert!(message.contains("hours[0]"));
        assert!(message.contains("'hour'"));
    }

    #[test]
    fn test_hour_with_bad_timestamp_is_malformed() {
        let message = malformed_message(r#"{"hours": [{"hour": "yesterday"}]}"#);
        assert!(message.contains("not a valid timestamp"));
    }

    #[test]
    fn test_interval_without_end_is_malformed() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "status": {"Run": {"intervals": [{"start": "2024-01-01T00:00:00Z"}]}}}]}"#;
        let message = malformed_message(raw);
        assert!(message.contains("hours[0].status.Run.intervals[0]"));
        assert!(message.contains("'end'"));
    }

    #[test]
    fn test_production_interval_without_start_is_malformed() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "production": {"R1": {"intervals": [{"end": "2024-01-01T00:00:00Z"}]}}}]}"#;
        assert!(malformed_message(raw).contains("'start'"));
    }

    #[test]
    fn test_leading_byte_order_mark_is_ignored() {
        let tree = PayloadParser::parse("\u{feff}{\"hours\": []}").unwrap();
        assert!(tree.hours.is_empty());
    }

    #[test]
    fn test_empty_hours_is_valid() {
        let tree = PayloadParser::parse(r#"{"hours": []}"#).unwrap();
        assert!(tree.hours.is_empty());
        assert_eq!(tree.meta, PayloadMeta::default());
    }

    #[test]
    fn test_tolerant_top_level_fields() {
        let raw = r#"{"timespan": 60, "start": "not a date", "end": null, "hours": []}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        assert_eq!(tree.meta, PayloadMeta::default());
    }

    #[test]
    fn test_tolerant_counts() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "status": {
                "Run": {"count": "7", "duration": 12.9},
                "Stop": {"count": -3, "duration": "abc"},
                "Alarm": {"count": true},
                "Setup": 42
            },
            "production": {"R1": {"good": "3.5", "reject": null}}
        }]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        let statuses = &tree.hours[0].statuses;

        assert_eq!(statuses["Run"].count, 7);
        assert_eq!(statuses["Run"].duration_seconds, 12);
        assert_eq!(statuses["Stop"].count, 0);
        assert_eq!(statuses["Stop"].duration_seconds, 0);
        assert_eq!(statuses["Alarm"], StatusEntry::default());
        assert_eq!(statuses["Setup"], StatusEntry::default());

        let recipe = &tree.hours[0].production[0];
        assert_eq!((recipe.good, recipe.reject, recipe.total), (3, 0, 0));
    }

    #[test]
    fn test_intervals_not_array_default_to_empty() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "status": {"Run": {"count": 1, "intervals": "none"}}}]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        assert!(tree.hours[0].statuses["Run"].intervals.is_empty());
    }

    #[test]
    fn test_blank_recipe_names_are_skipped() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "production": {"": {"good": 1}, "   ": {"good": 2}, "R1": {"good": 3}}}]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        let production = &tree.hours[0].production;
        assert_eq!(production.len(), 1);
        assert_eq!(production[0].recipe, "R1");
        assert_eq!(production[0].good, 3);
    }

    #[test]
    fn test_production_keeps_document_order() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "production": {"Zeta": {}, "Alpha": {}, "Mid": {}}}]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        let recipes: Vec<_> = tree.hours[0]
            .production
            .iter()
            .map(|p| p.recipe.as_str())
            .collect();
        assert_eq!(recipes, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_status_names_are_verbatim_keys() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "status": {"Wartung / Störung": {"count": 1}, "run": {"count": 2}}}]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        let statuses = &tree.hours[0].statuses;
        assert_eq!(statuses["Wartung / Störung"].count, 1);
        assert_eq!(statuses["run"].count, 2);
    }

    #[test]
    fn test_offsets_are_converted_to_utc() {
        let raw = r#"{"start": "2024-01-01T02:30:00+02:00", "hours": [
            {"hour": "2024-01-01T01:00:00+01:00",
             "status": {"Run": {"intervals": [
                {"start": "2023-12-31T19:00:00-05:00", "end": "2024-01-01T00:30:00Z"}
             ]}}}
        ]}"#;
        let tree = PayloadParser::parse(raw).unwrap();

        assert_eq!(tree.meta.start_utc, Some(utc(0, 30)));
        assert_eq!(tree.hours[0].hour_start, utc(0, 0));
        let interval = tree.hours[0].statuses["Run"].intervals[0];
        assert_eq!(interval.start, utc(0, 0));
        assert_eq!(interval.duration_seconds(), 1800.0);
    }

    #[test]
    fn test_negative_interval_is_accepted() {
        let raw = r#"{"hours": [{"hour": "2024-01-01T00:00:00Z",
            "status": {"Run": {"intervals": [
                {"start": "2024-01-01T01:00:00Z", "end": "2024-01-01T00:00:00Z"}
            ]}}}]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        assert_eq!(tree.hours[0].statuses["Run"].intervals[0].duration_seconds(), -3600.0);
    }

    #[test]
    fn test_duplicate_hours_are_kept_in_order() {
        let raw = r#"{"hours": [
            {"hour": "2024-01-01T00:00:00Z", "status": {"Run": {"count": 1}}},
            {"hour": "2024-01-01T00:00:00Z", "status": {"Run": {"count": 2}}}
        ]}"#;
        let tree = PayloadParser::parse(raw).unwrap();
        assert_eq!(tree.hours.len(), 2);
        assert_eq!(tree.hours[1].statuses["Run"].count, 2);
    }

    #[test]
    fn test_tolerant_count_values() {
        assert_eq!(tolerant_count(Some(&json!(5))), 5);
        assert_eq!(tolerant_count(Some(&json!(5.99))), 5);
        assert_eq!(tolerant_count(Some(&json!(" 8 "))), 8);
        assert_eq!(tolerant_count(Some(&json!(-1))), 0);
        assert_eq!(tolerant_count(Some(&json!([1]))), 0);
        assert_eq!(tolerant_count(None), 0);
    }
}
