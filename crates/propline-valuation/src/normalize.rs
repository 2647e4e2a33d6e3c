//! Valuation payloads → canonical valuation records.
//!
//! Besides the schema mapping, two fields are derived from the history:
//! `current_land_value` falls back to the latest non-null point, and
//! `land_value_change_pct` compares the two latest non-null points.

use propline_core::normalize::parse_object;
use propline_core::{
    CanonicalRecord, NormalizeError, Normalizer, PrivacyPolicy, RawPayload, Series, Value,
};

use crate::schema::{DATASET, DEFAULT_ALLOW, SCHEMA};

pub const CHANGE_PCT: &str = "land_value_change_pct";

#[derive(Debug, Clone, Copy, Default)]
pub struct ValuationNormalizer;

impl Normalizer for ValuationNormalizer {
    fn dataset(&self) -> &'static str {
        DATASET
    }

    fn normalize(&self, raw: &RawPayload) -> Result<CanonicalRecord, NormalizeError> {
        let obj = parse_object(raw)?;
        let mut record = SCHEMA.record_from(&raw.unit.key, &obj)?;

        let current_missing = record
            .field("current_land_value")
            .map_or(true, Value::is_null);
        if let Some(series) = &record.series {
            let latest = series.latest().map(|(_, v)| v.clone());
            let change = change_pct(series);
            if current_missing {
                if let Some(value) = latest {
                    record.fields.insert("current_land_value".into(), value);
                }
            }
            if let Some(pct) = change {
                record.fields.insert(CHANGE_PCT.into(), Value::Float(pct));
            }
        }
        Ok(record)
    }

    fn default_policy(&self) -> PrivacyPolicy {
        PrivacyPolicy::new(DEFAULT_ALLOW)
    }
}

/// Percent change between the two latest non-null points, to 2 decimals
fn change_pct(series: &Series) -> Option<f64> {
    let mut values = series.points.values().rev().filter_map(Value::as_f64);
    let latest = values.next()?;
    let previous = values.next().filter(|p| *p != 0.0)?;
    Some(((latest - previous) / previous * 10_000.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use propline_core::{GridResolution, SeriesLayout, UnitRef, flatten};
    use serde_json::json;

    fn normalize(body: serde_json::Value) -> Result<CanonicalRecord, NormalizeError> {
        let raw = RawPayload::new(UnitRef::new(0, "3045118"), body.to_string());
        ValuationNormalizer.normalize(&raw)
    }

    #[test]
    fn history_as_array() {
        let record = normalize(json!({
            "zoning": "R2",
            "landArea": "556.4",
            "landValues": [
                {"year": 2021, "landValue": "$1,200,000"},
                {"year": 2022, "landValue": 1_320_000},
            ],
        }))
        .unwrap();
        let series = record.series.as_ref().unwrap();
        assert_eq!(series.name, "land_value");
        assert_eq!(series.points[&2021], Value::Int(1_200_000));
        assert_eq!(record.field("current_land_value"), Some(&Value::Int(1_320_000)));
        assert_eq!(record.field(CHANGE_PCT), Some(&Value::Float(10.0)));
        assert_eq!(record.field("land_area"), Some(&Value::Float(556.4)));
    }

    #[test]
    fn history_as_year_map() {
        let record = normalize(json!({
            "current_land_value": 900_000,
            "land_value_history": {"2019": 800_000, "2020": null, "2021": 850_000},
        }))
        .unwrap();
        // Explicit current value wins over the history
        assert_eq!(record.field("current_land_value"), Some(&Value::Int(900_000)));
        // Null 2020 point is skipped
        assert_eq!(record.field(CHANGE_PCT), Some(&Value::Float(6.25)));
    }

    #[test]
    fn no_history_no_derivations() {
        let record = normalize(json!({"zone": "B4"})).unwrap();
        assert!(record.series.is_none());
        assert_eq!(record.field(CHANGE_PCT), None);
        assert_eq!(record.field("current_land_value"), None);
    }

    #[test]
    fn malformed_history_fails_the_unit() {
        let err = normalize(json!({"landValues": "a lot"})).unwrap_err();
        assert_eq!(err.kind(), "invalid value");
    }

    #[test]
    fn default_policy_keeps_series_drops_owner() {
        let record = normalize(json!({
            "owner": "Jane Citizen",
            "landValues": {"2021": 500_000, "2022": 550_000},
            "lat": -33.9,
            "lon": 151.2,
        }))
        .unwrap();
        let filtered = ValuationNormalizer.default_policy().apply(record);

        let wide = flatten(&filtered, SeriesLayout::Wide, GridResolution::DEFAULT);
        assert_eq!(wide.len(), 1);
        let names: Vec<&str> = wide[0].fields.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            [
                "current_land_value",
                "land_value_2021",
                "land_value_2022",
                "land_value_change_pct"
            ]
        );

        let long = flatten(&filtered, SeriesLayout::Long, GridResolution::DEFAULT);
        assert_eq!(long.len(), 2);
        assert_eq!(long[1].period, Some(2022));
        assert_eq!(long[1].fields["land_value"], Value::Int(550_000));
        assert!(long.iter().all(|r| !r.fields.contains_key("owner_name")));
    }
}
