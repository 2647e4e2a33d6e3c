//! Propline Valuation - land valuation ingestion
//!
//! One unit is one property id. Each record carries the current valuation
//! attributes plus a yearly land value history, flattened wide
//! (`land_value_2019`, ...) or long (one row per year).

pub mod normalize;
pub mod schema;

pub use normalize::{CHANGE_PCT, ValuationNormalizer};
pub use schema::{DATASET, DEFAULT_ALLOW, LAND_VALUE};
