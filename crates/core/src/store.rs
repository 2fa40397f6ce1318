//! Access to signed consent records.
//!
//! Persistence of consent instances lives outside this crate. The resolver reaches it only
//! through [`ConsentInstanceStore`], a narrow read-only capability. [`MemoryInstanceStore`] is
//! the in-process implementation used by tests and the command line.

use crate::error::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use edc_consent_types::{Gender, SiteId};

/// A record that a subject signed a consent under a specific definition version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentInstance {
    pub subject_identifier: String,
    pub model: String,
    pub version: String,
    pub consent_datetime: DateTime<Utc>,
    pub dob: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub initials: Option<String>,
    pub site: Option<SiteId>,
}

impl ConsentInstance {
    pub fn new(
        subject_identifier: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
        consent_datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            subject_identifier: subject_identifier.into(),
            model: model.into(),
            version: version.into(),
            consent_datetime,
            dob: None,
            gender: None,
            first_name: None,
            last_name: None,
            initials: None,
            site: None,
        }
    }

    /// Named fields for diagnostic display, in a stable order. Absent values are skipped.
    pub fn display_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("subject_identifier", self.subject_identifier.clone()),
            ("model", self.model.clone()),
            ("version", self.version.clone()),
            ("consent_datetime", self.consent_datetime.to_rfc3339()),
        ];
        if let Some(dob) = self.dob {
            fields.push(("dob", dob.to_string()));
        }
        if let Some(gender) = self.gender {
            fields.push(("gender", gender.to_string()));
        }
        if let Some(initials) = &self.initials {
            fields.push(("initials", initials.clone()));
        }
        if let Some(site) = self.site {
            fields.push(("site", site.to_string()));
        }
        fields
    }
}

/// Lookup key for a consent instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceQuery<'a> {
    pub model: &'a str,
    pub subject_identifier: &'a str,
    pub version: &'a str,
    /// Only instances signed at or before this instant qualify.
    pub not_after: DateTime<Utc>,
}

/// Read-only access to persisted consent instances.
pub trait ConsentInstanceStore {
    /// The most recent instance matching `query`, if any.
    fn find(&self, query: &InstanceQuery<'_>) -> Result<Option<ConsentInstance>, StoreError>;
}

impl<S: ConsentInstanceStore + ?Sized> ConsentInstanceStore for &S {
    fn find(&self, query: &InstanceQuery<'_>) -> Result<Option<ConsentInstance>, StoreError> {
        (**self).find(query)
    }
}

/// In-memory consent instances.
#[derive(Clone, Debug, Default)]
pub struct MemoryInstanceStore {
    instances: Vec<ConsentInstance>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance: ConsentInstance) {
        self.instances.push(instance);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// All instances for a subject, oldest first.
    pub fn for_subject(&self, subject_identifier: &str) -> Vec<&ConsentInstance> {
        let mut found: Vec<&ConsentInstance> = self
            .instances
            .iter()
            .filter(|i| i.subject_identifier == subject_identifier)
            .collect();
        found.sort_by_key(|i| i.consent_datetime);
        found
    }
}

impl FromIterator<ConsentInstance> for MemoryInstanceStore {
    fn from_iter<T: IntoIterator<Item = ConsentInstance>>(iter: T) -> Self {
        Self {
            instances: iter.into_iter().collect(),
        }
    }
}

impl ConsentInstanceStore for MemoryInstanceStore {
    fn find(&self, query: &InstanceQuery<'_>) -> Result<Option<ConsentInstance>, StoreError> {
        Ok(self
            .instances
            .iter()
            .filter(|i| {
                i.model == query.model
                    && i.subject_identifier == query.subject_identifier
                    && i.version == query.version
                    && i.consent_datetime <= query.not_after
            })
            .max_by_key(|i| i.consent_datetime)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn query(not_after: DateTime<Utc>) -> InstanceQuery<'static> {
        InstanceQuery {
            model: "meta.subjectconsent",
            subject_identifier: "12345",
            version: "1.0",
            not_after,
        }
    }

    #[test]
    fn find_returns_latest_instance_not_after_cutoff() {
        let store: MemoryInstanceStore = [
            ConsentInstance::new("12345", "meta.subjectconsent", "1.0", day(5)),
            ConsentInstance::new("12345", "meta.subjectconsent", "1.0", day(20)),
            ConsentInstance::new("12345", "meta.subjectconsent", "2.0", day(60)),
            ConsentInstance::new("99999", "meta.subjectconsent", "1.0", day(1)),
        ]
        .into_iter()
        .collect();

        let found = store.find(&query(day(30))).unwrap().expect("instance");
        assert_eq!(found.consent_datetime, day(20));

        let found = store.find(&query(day(10))).unwrap().expect("instance");
        assert_eq!(found.consent_datetime, day(5));

        assert!(store.find(&query(day(4))).unwrap().is_none());
    }

    #[test]
    fn display_fields_skip_absent_values() {
        let mut instance = ConsentInstance::new("12345", "meta.subjectconsent", "1.0", day(5));
        instance.dob = NaiveDate::from_ymd_opt(1990, 1, 2);

        let fields = instance.display_fields();
        let keys: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["subject_identifier", "model", "version", "consent_datetime", "dob"]
        );
        assert_eq!(fields[4].1, "1990-01-02");
    }

    #[test]
    fn for_subject_orders_oldest_first() {
        let mut store = MemoryInstanceStore::new();
        store.insert(ConsentInstance::new("12345", "m", "2.0", day(60)));
        store.insert(ConsentInstance::new("12345", "m", "1.0", day(5)));

        let versions: Vec<&str> = store
            .for_subject("12345")
            .iter()
            .map(|i| i.version.as_str())
            .collect();
        assert_eq!(versions, vec!["1.0", "2.0"]);
        assert_eq!(store.len(), 2);
    }
}
