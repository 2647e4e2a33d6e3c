//! Canonical records and the rows they flatten into

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::spatial::SpatialKey;

/// Structural column names. Always present in the output; never attribute names.
pub const UNIT_KEY: &str = "unit_key";
pub const PERIOD: &str = "period";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const LAT_GRID: &str = "lat_grid";
pub const LON_GRID: &str = "lon_grid";

pub const STRUCTURAL_COLUMNS: [&str; 6] =
    [UNIT_KEY, PERIOD, LATITUDE, LONGITUDE, LAT_GRID, LON_GRID];

pub fn is_structural(name: &str) -> bool {
    STRUCTURAL_COLUMNS.contains(&name)
}

/// Typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Period (year) → value history for one unit
#[derive(Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: BTreeMap<i32, Value>,
}

impl Series {
    /// Wide-layout column for one period: `{name}_{period}`
    pub fn wide_column(&self, period: i32) -> String {
        format!("{}_{period}", self.name)
    }

    pub fn latest(&self) -> Option<(i32, &Value)> {
        self.points
            .iter()
            .rev()
            .find(|(_, v)| !v.is_null())
            .map(|(p, v)| (*p, v))
    }
}

impl std::fmt::Debug for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Series")
            .field("name", &self.name)
            .field("periods", &self.points.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Normalized representation of one unit, before the privacy filter.
///
/// `Debug` shows the key and field names only.
#[derive(Clone, PartialEq)]
pub struct CanonicalRecord {
    pub key: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fields: BTreeMap<String, Value>,
    pub series: Option<Series>,
}

impl CanonicalRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            latitude: None,
            longitude: None,
            fields: BTreeMap::new(),
            series: None,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_coords(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl std::fmt::Debug for CanonicalRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanonicalRecord")
            .field("key", &self.key)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("series", &self.series)
            .finish_non_exhaustive()
    }
}

/// How a record's series becomes columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesLayout {
    /// One row per unit, one `{series}_{period}` column per period
    #[default]
    Wide,
    /// One row per period with `period` and `{series}` columns
    Long,
}

impl std::fmt::Display for SeriesLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wide => f.write_str("wide"),
            Self::Long => f.write_str("long"),
        }
    }
}

impl std::str::FromStr for SeriesLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wide" => Ok(Self::Wide),
            "long" => Ok(Self::Long),
            other => Err(format!("unknown series layout '{other}' (expected wide or long)")),
        }
    }
}

/// One output row. Natural key is `(key, period)`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub key: String,
    pub period: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub grid: SpatialKey,
    pub fields: BTreeMap<String, Value>,
}

/// Rows awaiting compaction plus the unit cursor they cover
#[derive(Debug, Default)]
pub struct OutputBatch {
    pub rows: Vec<OutputRow>,
    /// Index of the first unit *not* covered by this batch
    pub cursor: u64,
}
