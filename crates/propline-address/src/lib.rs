//! Propline Address - address ingestion
//!
//! One unit is one address key (e.g. a G-NAF persistent identifier). The
//! normalizer maps geocoder payloads onto a flat address record with
//! coordinates; owner names and title references are excluded by default.

pub mod normalize;
pub mod schema;

pub use normalize::AddressNormalizer;
pub use schema::{DATASET, DEFAULT_ALLOW};
