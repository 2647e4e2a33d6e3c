//! Canonical valuation schema and provider aliases

use propline_core::{DatasetSchema, FieldKind, FieldSpec, SeriesSpec};

pub const DATASET: &str = "valuations";

/// Name of the yearly land value series (wide columns: `land_value_2019`, ...)
pub const LAND_VALUE: &str = "land_value";

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::new(
        "current_land_value",
        FieldKind::Int,
        &["current_land_value", "currentLandValue", "land_value.current", "landValue"],
    ),
    FieldSpec::new(
        "land_area",
        FieldKind::Float,
        &["land_area", "landArea", "area", "area_sqm"],
    ),
    FieldSpec::new("zone", FieldKind::Str, &["zone", "zoning", "zone_code", "zoneCode"]),
    FieldSpec::new(
        "property_type",
        FieldKind::Str,
        &["property_type", "propertyType", "property_description"],
    ),
    FieldSpec::new(
        "valuation_date",
        FieldKind::Str,
        &["valuation_date", "valuationDate", "base_date", "baseDate"],
    ),
    FieldSpec::new("district", FieldKind::Str, &["district", "district_name", "lga"]),
    FieldSpec::new("owner_name", FieldKind::Str, &["owner_name", "ownerName", "owner"]),
];

pub const SCHEMA: DatasetSchema = DatasetSchema {
    fields: FIELDS,
    series: Some(SeriesSpec {
        name: LAND_VALUE,
        aliases: &[
            "land_value_history",
            "landValues",
            "land_value.history",
            "valuations",
            "history",
        ],
        period_keys: &["year", "base_year", "period"],
        value_keys: &["land_value", "landValue", "value", "amount"],
        kind: FieldKind::Int,
    }),
    latitude: &["latitude", "lat", "location.lat"],
    longitude: &["longitude", "lon", "lng", "location.lng"],
};

pub const DEFAULT_ALLOW: &[&str] = &[
    "current_land_value",
    "land_area",
    "zone",
    "property_type",
    "valuation_date",
    "district",
    "land_value*",
];
