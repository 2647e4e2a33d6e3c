//! Payload → canonical record mapping, and record → row flattening.
//!
//! Datasets describe their canonical schema as static tables of [`FieldSpec`]s
//! and an optional [`SeriesSpec`]; [`DatasetSchema`] does the alias lookup and
//! type coercion. Optional values that fail coercion become null; required
//! ones fail the unit.

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use crate::error::NormalizeError;
use crate::privacy::{FilteredRecord, PrivacyPolicy};
use crate::record::{CanonicalRecord, OutputRow, Series, SeriesLayout, Value};
use crate::source::RawPayload;
use crate::spatial::{GridResolution, grid_key_opt, valid_coords};

/// Maps one dataset's provider payloads onto its canonical schema
pub trait Normalizer: Send + Sync {
    /// Dataset name used in logs and summaries
    fn dataset(&self) -> &'static str;

    fn normalize(&self, raw: &RawPayload) -> Result<CanonicalRecord, NormalizeError>;

    /// Allow-list used when no policy file is configured
    fn default_policy(&self) -> PrivacyPolicy;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Str,
}

/// One canonical field and the provider names it may arrive under.
///
/// Aliases may be dotted paths into nested objects (`"address.postcode"`).
/// The first alias with a non-null value wins.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn new(
        name: &'static str,
        kind: FieldKind,
        aliases: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            aliases,
            kind,
            required: false,
        }
    }

    pub const fn required(
        name: &'static str,
        kind: FieldKind,
        aliases: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            aliases,
            kind,
            required: true,
        }
    }
}

/// Historical series: an array of `{period, value}` objects or a `{"2019": v}` map
#[derive(Debug, Clone, Copy)]
pub struct SeriesSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Keys holding the period inside array entries
    pub period_keys: &'static [&'static str],
    /// Keys holding the value inside array entries
    pub value_keys: &'static [&'static str],
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy)]
pub struct DatasetSchema {
    pub fields: &'static [FieldSpec],
    pub series: Option<SeriesSpec>,
    pub latitude: &'static [&'static str],
    pub longitude: &'static [&'static str],
}

/// Parse a payload body into a JSON object
pub fn parse_object(raw: &RawPayload) -> Result<Map<String, Json>, NormalizeError> {
    let body = raw.body.trim();
    if body.is_empty() {
        return Err(NormalizeError::Empty);
    }
    match serde_json::from_str::<Json>(body) {
        Ok(Json::Object(obj)) => Ok(obj),
        Ok(Json::Null) => Err(NormalizeError::Empty),
        Ok(_) => Err(NormalizeError::NotAnObject),
        Err(e) => Err(NormalizeError::InvalidJson(e.to_string())),
    }
}

/// Resolve a dotted path inside an object
pub fn lookup<'a>(obj: &'a Map<String, Json>, path: &str) -> Option<&'a Json> {
    let mut parts = path.split('.');
    let mut current = obj.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// First non-null value among `aliases`
pub fn lookup_any<'a>(obj: &'a Map<String, Json>, aliases: &[&str]) -> Option<&'a Json> {
    aliases
        .iter()
        .filter_map(|alias| lookup(obj, alias))
        .find(|v| !v.is_null())
}

/// Strip currency symbols, thousands separators and whitespace from numeric text
fn clean_numeric(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '$' | ',' | '_') && !c.is_whitespace())
        .collect()
}

/// Coerce a JSON value to `kind`. Blank strings are null.
pub fn coerce(json: &Json, kind: FieldKind) -> Result<Value, String> {
    if let Json::String(s) = json {
        if s.trim().is_empty() {
            return Ok(Value::Null);
        }
    }
    match (kind, json) {
        (_, Json::Null) => Ok(Value::Null),
        (_, Json::Array(_) | Json::Object(_)) => Err("expected a scalar".into()),

        (FieldKind::Str, Json::String(s)) => Ok(Value::Str(s.trim().to_string())),
        (FieldKind::Str, Json::Number(n)) => Ok(Value::Str(n.to_string())),
        (FieldKind::Str, Json::Bool(b)) => Ok(Value::Str(b.to_string())),

        (FieldKind::Bool, Json::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldKind::Bool, Json::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Value::Bool(false)),
            Some(1) => Ok(Value::Bool(true)),
            _ => Err("expected 0 or 1".into()),
        },
        (FieldKind::Bool, Json::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "n" | "0" => Ok(Value::Bool(false)),
            _ => Err("expected a boolean".into()),
        },

        (FieldKind::Int, Json::Number(n)) => match n.as_i64() {
            Some(i) => Ok(Value::Int(i)),
            None => n
                .as_f64()
                .and_then(integral)
                .map(Value::Int)
                .ok_or_else(|| "expected an integer".into()),
        },
        (FieldKind::Int, Json::String(s)) => {
            let cleaned = clean_numeric(s);
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().and_then(integral))
                .map(Value::Int)
                .ok_or_else(|| "expected an integer".into())
        }

        (FieldKind::Float, Json::Number(n)) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(Value::Float)
            .ok_or_else(|| "expected a number".into()),
        (FieldKind::Float, Json::String(s)) => clean_numeric(s)
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float)
            .ok_or_else(|| "expected a number".into()),

        (FieldKind::Int | FieldKind::Float, Json::Bool(_)) => Err("expected a number".into()),
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}

fn period_of(json: &Json) -> Option<i32> {
    match json {
        Json::Number(n) => n.as_i64().and_then(|p| i32::try_from(p).ok()),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl SeriesSpec {
    fn parse(&self, json: &Json) -> Result<Option<Series>, NormalizeError> {
        let invalid = |message: &str| NormalizeError::InvalidValue {
            field: self.name,
            message: message.to_string(),
        };
        let point = |v: &Json| coerce(v, self.kind).unwrap_or(Value::Null);

        let mut points = BTreeMap::new();
        match json {
            Json::Null => return Ok(None),
            Json::Array(entries) => {
                for entry in entries {
                    let obj = entry
                        .as_object()
                        .ok_or_else(|| invalid("series entries must be objects"))?;
                    let period = lookup_any(obj, self.period_keys)
                        .and_then(period_of)
                        .ok_or_else(|| invalid("series entry without a period"))?;
                    let value = lookup_any(obj, self.value_keys).map_or(Value::Null, point);
                    points.insert(period, value);
                }
            }
            Json::Object(map) => {
                for (k, v) in map {
                    let period: i32 = k
                        .trim()
                        .parse()
                        .map_err(|_| invalid("series keys must be periods"))?;
                    points.insert(period, point(v));
                }
            }
            _ => return Err(invalid("expected an array or object")),
        }

        Ok((!points.is_empty()).then(|| Series {
            name: self.name.to_string(),
            points,
        }))
    }
}

impl DatasetSchema {
    /// Build a record for `key` from an already-parsed payload object
    pub fn record_from(
        &self,
        key: &str,
        obj: &Map<String, Json>,
    ) -> Result<CanonicalRecord, NormalizeError> {
        let mut record = CanonicalRecord::new(key);
        let mut nulled = 0usize;

        for spec in self.fields {
            let Some(json) = lookup_any(obj, spec.aliases) else {
                if spec.required {
                    return Err(NormalizeError::MissingField(spec.name));
                }
                continue;
            };
            let value = match coerce(json, spec.kind) {
                Ok(Value::Null) if spec.required => {
                    return Err(NormalizeError::MissingField(spec.name));
                }
                Ok(v) => v,
                Err(message) if spec.required => {
                    return Err(NormalizeError::InvalidValue {
                        field: spec.name,
                        message,
                    });
                }
                Err(_) => {
                    nulled += 1;
                    Value::Null
                }
            };
            record.fields.insert(spec.name.to_string(), value);
        }

        let coord = |aliases: &[&str]| {
            lookup_any(obj, aliases)
                .and_then(|j| coerce(j, FieldKind::Float).ok())
                .and_then(|v| v.as_f64())
        };
        record.latitude = coord(self.latitude);
        record.longitude = coord(self.longitude);

        if let Some(series) = &self.series {
            if let Some(json) = lookup_any(obj, series.aliases) {
                record.series = series.parse(json)?;
            }
        }

        if nulled > 0 {
            log::debug!("{key}: {nulled} optional values failed coercion, stored as null");
        }
        Ok(record)
    }

    pub fn normalize(&self, raw: &RawPayload) -> Result<CanonicalRecord, NormalizeError> {
        let obj = parse_object(raw)?;
        self.record_from(&raw.unit.key, &obj)
    }
}

/// Flatten a filtered record into output rows.
///
/// Wide: exactly one row. Long: one row per series period, or one row with a
/// null period when the record has no series.
pub fn flatten(
    record: &FilteredRecord,
    layout: SeriesLayout,
    resolution: GridResolution,
) -> Vec<OutputRow> {
    let rec = record.record();
    let coords = valid_coords(rec.latitude, rec.longitude);
    let mut base = OutputRow {
        key: rec.key.clone(),
        period: None,
        latitude: coords.map(|c| c.0),
        longitude: coords.map(|c| c.1),
        grid: grid_key_opt(rec.latitude, rec.longitude, resolution),
        fields: rec.fields.clone(),
    };

    let Some(series) = rec.series.as_ref().filter(|s| !s.points.is_empty()) else {
        return vec![base];
    };

    match layout {
        SeriesLayout::Wide => {
            for (period, value) in &series.points {
                if record.allows_wide_period(*period) {
                    base.fields.insert(series.wide_column(*period), value.clone());
                }
            }
            vec![base]
        }
        SeriesLayout::Long if record.allows_long_series() => series
            .points
            .iter()
            .map(|(period, value)| {
                let mut row = base.clone();
                row.period = Some(*period);
                row.fields.insert(series.name.clone(), value.clone());
                row
            })
            .collect(),
        SeriesLayout::Long => vec![base],
    }
}
