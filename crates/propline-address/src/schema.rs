//! Canonical address schema and provider aliases

use propline_core::{DatasetSchema, FieldKind, FieldSpec};

pub const DATASET: &str = "addresses";

/// `full_address` is required, but may be composed from the parts below
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::new(
        "full_address",
        FieldKind::Str,
        &["full_address", "fullAddress", "formattedAddress", "address.full", "address"],
    ),
    FieldSpec::new(
        "unit_number",
        FieldKind::Str,
        &["unit_number", "unitNumber", "flat_number", "address.unit"],
    ),
    FieldSpec::new(
        "street_number",
        FieldKind::Str,
        &["street_number", "streetNumber", "house_number", "address.number"],
    ),
    FieldSpec::new(
        "street_name",
        FieldKind::Str,
        &["street_name", "streetName", "road_name", "address.street"],
    ),
    FieldSpec::new(
        "street_type",
        FieldKind::Str,
        &["street_type", "streetType", "road_type", "address.street_type"],
    ),
    FieldSpec::new(
        "suburb",
        FieldKind::Str,
        &["suburb", "locality", "suburbName", "address.suburb"],
    ),
    FieldSpec::new(
        "state",
        FieldKind::Str,
        &["state", "state_code", "stateTerritory", "address.state"],
    ),
    FieldSpec::new(
        "postcode",
        FieldKind::Str,
        &["postcode", "postCode", "postal_code", "address.postcode"],
    ),
    FieldSpec::new("lot_plan", FieldKind::Str, &["lot_plan", "lotPlan", "lot_dp", "lotDp"]),
    FieldSpec::new("owner_name", FieldKind::Str, &["owner_name", "ownerName", "owner"]),
    FieldSpec::new("confidence", FieldKind::Int, &["confidence", "score", "match_score"]),
    FieldSpec::new("is_primary", FieldKind::Bool, &["is_primary", "isPrimary", "primary"]),
];

pub const SCHEMA: DatasetSchema = DatasetSchema {
    fields: FIELDS,
    series: None,
    latitude: &["latitude", "lat", "geometry.lat", "location.lat", "geocode.latitude"],
    longitude: &[
        "longitude",
        "lon",
        "lng",
        "geometry.lng",
        "location.lng",
        "geocode.longitude",
    ],
};

/// Everything except owner names and title references
pub const DEFAULT_ALLOW: &[&str] = &[
    "full_address",
    "unit_number",
    "street_number",
    "street_name",
    "street_type",
    "suburb",
    "state",
    "postcode",
    "confidence",
    "is_primary",
];
