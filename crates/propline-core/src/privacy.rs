//! Allow-list privacy filter.
//!
//! [`FilteredRecord`] can only be built by [`PrivacyPolicy::apply`], and only
//! filtered records can be flattened into output rows. Any field not on the
//! allow-list is gone before a record is buffered, logged, or written.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::HarvestError;
use crate::record::{CanonicalRecord, is_structural};

#[derive(Debug, Deserialize)]
struct PolicyFile {
    allow: Vec<String>,
}

/// Output field allow-list. Entries ending in `*` match by prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivacyPolicy {
    exact: BTreeSet<String>,
    prefixes: BTreeSet<String>,
}

impl PrivacyPolicy {
    pub fn new<I, S>(allow: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = BTreeSet::new();
        let mut prefixes = BTreeSet::new();
        for entry in allow {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            match entry.strip_suffix('*') {
                Some(prefix) => prefixes.insert(prefix.to_string()),
                None => exact.insert(entry.to_string()),
            };
        }
        Self { exact, prefixes }
    }

    /// Load `allow = [...]` from a TOML file
    pub fn load(path: &Path) -> Result<Self, HarvestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read privacy policy {}: {e}", path.display()))
        })?;
        let file: PolicyFile = toml::from_str(&content).map_err(|e| {
            HarvestError::Config(format!("invalid privacy policy {}: {e}", path.display()))
        })?;
        let policy = Self::new(&file.allow);
        log::debug!(
            "Privacy policy {}: {} entries",
            path.display(),
            policy.exact.len() + policy.prefixes.len()
        );
        Ok(policy)
    }

    pub fn allows(&self, field: &str) -> bool {
        self.exact.contains(field) || self.prefixes.iter().any(|p| field.starts_with(p.as_str()))
    }

    /// Policy entries as written (prefix patterns keep their `*`)
    pub fn entries(&self) -> Vec<String> {
        self.exact
            .iter()
            .cloned()
            .chain(self.prefixes.iter().map(|p| format!("{p}*")))
            .collect()
    }

    /// Drop every field (and series column) the policy does not allow.
    ///
    /// Attribute names that shadow structural columns are dropped too. The
    /// series is checked per layout: its long column is `{name}`, its wide
    /// columns are `{name}_{period}`, and each must be allowed on its own.
    pub fn apply(&self, mut record: CanonicalRecord) -> FilteredRecord {
        let before = record.fields.len();
        record
            .fields
            .retain(|name, _| !is_structural(name) && self.allows(name));
        let mut dropped = before - record.fields.len();

        let mut series_long = false;
        let mut series_wide = BTreeSet::new();
        if let Some(series) = record.series.as_mut().filter(|s| !is_structural(&s.name)) {
            series_long = self.allows(&series.name);
            series_wide = series
                .points
                .keys()
                .copied()
                .filter(|p| self.allows(&series.wide_column(*p)))
                .collect();
            if !series_long {
                series.points.retain(|p, _| series_wide.contains(p));
            }
        }
        if record.series.is_some() && !series_long && series_wide.is_empty() {
            record.series = None;
            dropped += 1;
        }

        if dropped > 0 {
            log::trace!("{}: privacy filter dropped {dropped} fields", record.key);
        }
        FilteredRecord {
            record,
            series_long,
            series_wide,
        }
    }
}

/// A record that has passed the privacy filter
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredRecord {
    record: CanonicalRecord,
    series_long: bool,
    series_wide: BTreeSet<i32>,
}

impl FilteredRecord {
    pub fn record(&self) -> &CanonicalRecord {
        &self.record
    }

    /// The long-layout `{series}` column is allowed
    pub fn allows_long_series(&self) -> bool {
        self.series_long
    }

    /// The wide-layout `{series}_{period}` column is allowed
    pub fn allows_wide_period(&self, period: i32) -> bool {
        self.series_wide.contains(&period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Series, Value};
    use std::collections::BTreeMap;

    fn record() -> CanonicalRecord {
        let mut r = CanonicalRecord::new("P1")
            .with_coords(-33.9, 151.2)
            .with_field("owner_name", Value::Str("Jane Citizen".into()))
            .with_field("zone", Value::Str("R2".into()))
            .with_field("land_area", Value::Float(556.1));
        r.series = Some(Series {
            name: "land_value".into(),
            points: BTreeMap::from([(2020, Value::Int(700_000))]),
        });
        r
    }

    #[test]
    fn drops_unlisted_fields() {
        let policy = PrivacyPolicy::new(["zone", "land_area", "land_value*"]);
        let filtered = policy.apply(record());
        let names: Vec<_> = filtered.record().fields.keys().map(String::as_str).collect();
        assert_eq!(names, ["land_area", "zone"]);
        assert!(filtered.record().series.is_some());
    }

    #[test]
    fn owner_name_never_survives_exclusion() {
        let policy = PrivacyPolicy::new(["zone"]);
        let filtered = policy.apply(record());
        assert!(filtered.record().field("owner_name").is_none());
        assert!(!format!("{filtered:?}").contains("owner_name"));
    }

    #[test]
    fn series_dropped_when_not_allowed() {
        let policy = PrivacyPolicy::new(["zone"]);
        assert!(policy.apply(record()).record().series.is_none());
    }

    #[test]
    fn exact_series_entry_allows_long_column_only() {
        let filtered = PrivacyPolicy::new(["zone", "land_value"]).apply(record());
        assert!(filtered.allows_long_series());
        assert!(!filtered.allows_wide_period(2020));
        assert!(filtered.record().series.is_some());
    }

    #[test]
    fn wide_entries_keep_only_their_periods() {
        let mut r = record();
        if let Some(series) = r.series.as_mut() {
            series.points.insert(2021, Value::Int(720_000));
        }
        let filtered = PrivacyPolicy::new(["land_value_2021"]).apply(r);
        assert!(!filtered.allows_long_series());
        assert!(filtered.allows_wide_period(2021));
        let periods: Vec<_> = filtered.record().series.as_ref().unwrap().points.keys().collect();
        assert_eq!(periods, [&2021]);
    }

    #[test]
    fn coordinates_are_structural() {
        let filtered = PrivacyPolicy::new(Vec::<String>::new()).apply(record());
        assert_eq!(filtered.record().latitude, Some(-33.9));
        assert!(filtered.record().fields.is_empty());
    }

    #[test]
    fn structural_names_cannot_be_attributes() {
        let r = CanonicalRecord::new("P2").with_field("lat_grid", Value::Int(5));
        let filtered = PrivacyPolicy::new(["lat_grid", "lat*"]).apply(r);
        assert!(filtered.record().fields.is_empty());
    }

    #[test]
    fn prefix_patterns() {
        let policy = PrivacyPolicy::new(["land_value*", "zone"]);
        assert!(policy.allows("land_value"));
        assert!(policy.allows("land_value_2019"));
        assert!(policy.allows("zone"));
        assert!(!policy.allows("zone_code"));
        assert_eq!(policy.entries(), ["zone", "land_value*"]);
    }

    #[test]
    fn load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "allow = [\"suburb\", \"postcode\"]\n").unwrap();
        let policy = PrivacyPolicy::load(&path).unwrap();
        assert!(policy.allows("suburb"));
        assert!(!policy.allows("owner_name"));
    }

    #[test]
    fn load_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(&path, "deny = [\"owner_name\"]\n").unwrap();
        assert!(matches!(
            PrivacyPolicy::load(&path),
            Err(HarvestError::Config(_))
        ));
    }
}
