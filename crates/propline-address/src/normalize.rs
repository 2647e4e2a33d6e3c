//! Address payloads → canonical address records

use propline_core::normalize::parse_object;
use propline_core::{
    CanonicalRecord, NormalizeError, Normalizer, PrivacyPolicy, RawPayload, Value,
};

use crate::schema::{DATASET, DEFAULT_ALLOW, SCHEMA};

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressNormalizer;

impl Normalizer for AddressNormalizer {
    fn dataset(&self) -> &'static str {
        DATASET
    }

    fn normalize(&self, raw: &RawPayload) -> Result<CanonicalRecord, NormalizeError> {
        let obj = parse_object(raw)?;
        let mut record = SCHEMA.record_from(&raw.unit.key, &obj)?;
        tidy(&mut record);

        if text(&record, "full_address").is_none() {
            let composed = compose(&record).ok_or(NormalizeError::MissingField("full_address"))?;
            record.fields.insert("full_address".into(), Value::Str(composed));
        }
        Ok(record)
    }

    fn default_policy(&self) -> PrivacyPolicy {
        PrivacyPolicy::new(DEFAULT_ALLOW)
    }
}

fn text<'a>(record: &'a CanonicalRecord, name: &str) -> Option<&'a str> {
    match record.field(name) {
        Some(Value::Str(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

/// Uppercase locality and state, zero-pad short numeric postcodes
fn tidy(record: &mut CanonicalRecord) {
    for name in ["suburb", "state"] {
        if let Some(Value::Str(s)) = record.fields.get_mut(name) {
            *s = s.to_uppercase();
        }
    }
    if let Some(Value::Str(postcode)) = record.fields.get_mut("postcode") {
        let digits = !postcode.is_empty() && postcode.bytes().all(|b| b.is_ascii_digit());
        if digits && postcode.len() < 4 {
            *postcode = format!("{postcode:0>4}");
        }
    }
}

/// `"3/12 Smith St, NEWTOWN NSW 2042"`; `None` without a street or suburb
fn compose(record: &CanonicalRecord) -> Option<String> {
    let number = match (text(record, "unit_number"), text(record, "street_number")) {
        (Some(unit), Some(street)) => Some(format!("{unit}/{street}")),
        (None, Some(street)) => Some(street.to_string()),
        (Some(unit), None) => Some(unit.to_string()),
        (None, None) => None,
    };
    let street: Vec<&str> = [
        number.as_deref(),
        text(record, "street_name"),
        text(record, "street_type"),
    ]
    .into_iter()
    .flatten()
    .collect();
    let locality: Vec<&str> = ["suburb", "state", "postcode"]
        .into_iter()
        .filter_map(|f| text(record, f))
        .collect();

    if text(record, "street_name").is_none() && text(record, "suburb").is_none() {
        return None;
    }
    Some(match (street.is_empty(), locality.is_empty()) {
        (false, false) => format!("{}, {}", street.join(" "), locality.join(" ")),
        (false, true) => street.join(" "),
        (true, _) => locality.join(" "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use propline_core::{GridResolution, SeriesLayout, UnitRef, flatten};
    use serde_json::json;

    fn normalize(body: serde_json::Value) -> Result<CanonicalRecord, NormalizeError> {
        AddressNormalizer.normalize(&RawPayload::new(
            UnitRef::new(0, "GANSW704343339"),
            body.to_string(),
        ))
    }

    #[test]
    fn provider_aliases() {
        let record = normalize(json!({
            "formattedAddress": "12 SMITH ST, NEWTOWN NSW 2042",
            "locality": "newtown",
            "stateTerritory": "nsw",
            "postCode": 2042,
            "score": "98",
            "isPrimary": "yes",
            "geocode": {"latitude": -33.8976, "longitude": 151.1785},
        }))
        .unwrap();
        assert_eq!(record.field("suburb"), Some(&Value::Str("NEWTOWN".into())));
        assert_eq!(record.field("state"), Some(&Value::Str("NSW".into())));
        assert_eq!(record.field("postcode"), Some(&Value::Str("2042".into())));
        assert_eq!(record.field("confidence"), Some(&Value::Int(98)));
        assert_eq!(record.field("is_primary"), Some(&Value::Bool(true)));
        assert_eq!(record.latitude, Some(-33.8976));
    }

    #[test]
    fn short_postcodes_are_padded() {
        let record = normalize(json!({
            "full_address": "1 Mitchell St, DARWIN NT 800",
            "postcode": "800",
        }))
        .unwrap();
        assert_eq!(record.field("postcode"), Some(&Value::Str("0800".into())));
    }

    #[test]
    fn full_address_composed_from_parts() {
        let record = normalize(json!({
            "unit_number": "3",
            "street_number": "12",
            "street_name": "Smith",
            "street_type": "St",
            "suburb": "Newtown",
            "state": "NSW",
            "postcode": "2042",
        }))
        .unwrap();
        assert_eq!(
            record.field("full_address"),
            Some(&Value::Str("3/12 Smith St, NEWTOWN NSW 2042".into()))
        );
    }

    #[test]
    fn nothing_to_compose() {
        let err = normalize(json!({"postcode": "2000", "confidence": 50})).unwrap_err();
        assert_eq!(err, NormalizeError::MissingField("full_address"));
    }

    #[test]
    fn default_policy_drops_owner_and_title() {
        let record = normalize(json!({
            "full_address": "1 George St, SYDNEY NSW 2000",
            "owner": "Jane Citizen",
            "lotPlan": "1/DP12345",
            "lat": -33.8688,
            "lng": 151.2093,
        }))
        .unwrap();
        let filtered = AddressNormalizer.default_policy().apply(record);
        let rows = flatten(&filtered, SeriesLayout::Wide, GridResolution::DEFAULT);

        assert_eq!(rows.len(), 1);
        assert!(!rows[0].fields.contains_key("owner_name"));
        assert!(!rows[0].fields.contains_key("lot_plan"));
        assert_eq!(rows[0].grid.cells(), Some((-3387, 15120)));
    }

    #[test]
    fn non_object_payload() {
        let raw = RawPayload::new(UnitRef::new(0, "K"), "[1, 2]");
        assert_eq!(
            AddressNormalizer.normalize(&raw).unwrap_err(),
            NormalizeError::NotAnObject
        );
    }
}
