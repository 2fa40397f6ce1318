//! Consent definitions.
//!
//! A [`ConsentDefinition`] describes one version of a consent document: the model it governs,
//! the window during which it is the version to sign, who is eligible to sign it, and which
//! earlier versions it supersedes. Definitions are built once from configuration and never
//! mutated.

use crate::constants::{
    DEFAULT_AGE_IS_ADULT, DEFAULT_AGE_MAX, DEFAULT_AGE_MIN, DEFAULT_SUBJECT_TYPE,
};
use crate::datetime::age_in_years;
use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, NaiveDate, Utc};
use edc_consent_types::{Gender, NonEmptyText, SiteId};
use std::collections::BTreeSet;
use std::fmt;

/// Country and site applicability of a consent definition.
///
/// An unscoped definition applies at every site in every country.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    country: Option<String>,
    sites: Option<BTreeSet<SiteId>>,
}

impl Scope {
    /// A scope that applies everywhere.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to a country. Country names compare case-insensitively.
    pub fn with_country(mut self, country: impl AsRef<str>) -> Self {
        let country = country.as_ref().trim().to_lowercase();
        self.country = (!country.is_empty()).then_some(country);
        self
    }

    /// Restrict to a set of sites. An empty iterator leaves the scope unrestricted by site.
    pub fn with_sites(mut self, sites: impl IntoIterator<Item = SiteId>) -> Self {
        let sites: BTreeSet<SiteId> = sites.into_iter().collect();
        self.sites = (!sites.is_empty()).then_some(sites);
        self
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn sites(&self) -> Option<&BTreeSet<SiteId>> {
        self.sites.as_ref()
    }

    pub fn is_scoped(&self) -> bool {
        self.country.is_some() || self.sites.is_some()
    }

    /// Returns true if some site could fall under both scopes.
    pub fn intersects(&self, other: &Scope) -> bool {
        let countries_meet = match (&self.country, &other.country) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let sites_meet = match (&self.sites, &other.sites) {
            (Some(a), Some(b)) => !a.is_disjoint(b),
            _ => true,
        };
        countries_meet && sites_meet
    }

    /// Returns true if this scope applies to the given site and country filters.
    ///
    /// A filter that is `None` places no restriction.
    pub fn applies_to(&self, site: Option<SiteId>, country: Option<&str>) -> bool {
        let site_ok = match (site, &self.sites) {
            (Some(site), Some(sites)) => sites.contains(&site),
            _ => true,
        };
        let country_ok = match (country, &self.country) {
            (Some(wanted), Some(own)) => wanted.trim().to_lowercase() == *own,
            _ => true,
        };
        site_ok && country_ok
    }

    /// Stable textual key, empty when unscoped.
    pub fn key(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(country) = &self.country {
            parts.push(country.clone());
        }
        if let Some(sites) = &self.sites {
            let sites: Vec<String> = sites.iter().map(ToString::to_string).collect();
            parts.push(sites.join("."));
        }
        parts.join("-")
    }
}

/// One immutable version of a consent document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsentDefinition {
    model: NonEmptyText,
    version: NonEmptyText,
    name: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    gender: BTreeSet<Gender>,
    age_min: u32,
    age_max: u32,
    age_is_adult: u32,
    subject_type: String,
    updates_versions: Vec<String>,
    scope: Scope,
}

impl ConsentDefinition {
    /// Start building a definition for `model` at `version`.
    pub fn builder(
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> ConsentDefinitionBuilder {
        ConsentDefinitionBuilder::new(model, version)
    }

    pub fn model(&self) -> &str {
        self.model.as_str()
    }

    pub fn version(&self) -> &str {
        self.version.as_str()
    }

    /// Unique registry key: `<model>-<version>`, suffixed with the scope key when scoped.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> String {
        format!("{} v{}", self.model, self.version)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn gender(&self) -> &BTreeSet<Gender> {
        &self.gender
    }

    pub fn age_min(&self) -> u32 {
        self.age_min
    }

    pub fn age_max(&self) -> u32 {
        self.age_max
    }

    pub fn age_is_adult(&self) -> u32 {
        self.age_is_adult
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    /// Versions this definition supersedes, in declared order.
    pub fn updates_versions(&self) -> &[String] {
        &self.updates_versions
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Returns true if this definition declares that it supersedes `version`.
    pub fn updates(&self, version: &str) -> bool {
        self.updates_versions.iter().any(|v| v == version)
    }

    /// Returns true if `ts` lies within `[start, end]`, inclusive at both ends.
    pub fn valid_for_datetime(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Check that a consent was signed within this definition's window.
    pub fn check_consent_datetime(&self, consent_datetime: DateTime<Utc>) -> ConsentResult<()> {
        if self.valid_for_datetime(consent_datetime) {
            return Ok(());
        }
        Err(ConsentError::ConsentDatetimeOutOfPeriod {
            definition: self.name.clone(),
            consent_datetime,
        })
    }

    /// Check that a subject with `dob` and `gender` may sign this consent at `consent_datetime`.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::GenderNotEligible`] if `gender` is not in the definition's set.
    /// - [`ConsentError::AgeOutOfRange`] if the age in completed years at consent is outside
    ///   `[age_min, age_max]`, or `dob` is after `consent_datetime`.
    pub fn check_eligibility(
        &self,
        dob: NaiveDate,
        gender: Gender,
        consent_datetime: DateTime<Utc>,
    ) -> ConsentResult<()> {
        if !self.gender.contains(&gender) {
            return Err(ConsentError::GenderNotEligible {
                definition: self.name.clone(),
                gender: gender.to_string(),
            });
        }

        let age = age_in_years(dob, consent_datetime);
        match age {
            Some(age) if (self.age_min..=self.age_max).contains(&age) => Ok(()),
            _ => Err(ConsentError::AgeOutOfRange {
                definition: self.name.clone(),
                age: age.unwrap_or(0),
                age_min: self.age_min,
                age_max: self.age_max,
            }),
        }
    }

    /// Returns true if a subject born on `dob` needs a guardian to consent at `at`.
    pub fn requires_guardian(&self, dob: NaiveDate, at: DateTime<Utc>) -> bool {
        age_in_years(dob, at).map_or(true, |age| age < self.age_is_adult)
    }
}

impl fmt::Display for ConsentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} - {}]",
            self.name,
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// Builder for [`ConsentDefinition`]. Validation happens in [`ConsentDefinitionBuilder::build`].
#[derive(Clone, Debug)]
pub struct ConsentDefinitionBuilder {
    model: String,
    version: String,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    gender: Vec<String>,
    age_min: u32,
    age_max: u32,
    age_is_adult: u32,
    subject_type: String,
    updates_versions: Vec<String>,
    scope: Scope,
}

impl ConsentDefinitionBuilder {
    fn new(model: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            version: version.into(),
            start: None,
            end: None,
            gender: Vec::new(),
            age_min: DEFAULT_AGE_MIN,
            age_max: DEFAULT_AGE_MAX,
            age_is_adult: DEFAULT_AGE_IS_ADULT,
            subject_type: DEFAULT_SUBJECT_TYPE.to_owned(),
            updates_versions: Vec::new(),
            scope: Scope::all(),
        }
    }

    pub fn period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    /// Gender codes (`M`, `F`). Codes are checked in [`build`](Self::build).
    pub fn gender<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.gender = codes.into_iter().map(|c| c.as_ref().to_owned()).collect();
        self
    }

    pub fn age_range(mut self, age_min: u32, age_max: u32) -> Self {
        self.age_min = age_min;
        self.age_max = age_max;
        self
    }

    pub fn age_is_adult(mut self, age_is_adult: u32) -> Self {
        self.age_is_adult = age_is_adult;
        self
    }

    pub fn subject_type(mut self, subject_type: impl Into<String>) -> Self {
        self.subject_type = subject_type.into();
        self
    }

    pub fn updates_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.updates_versions = versions
            .into_iter()
            .map(|v| v.as_ref().trim().to_owned())
            .collect();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Validate and build the definition.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::InvalidDefinition`] for a blank model, version or update reference, a
    ///   missing or inverted period, or inconsistent age bounds.
    /// - [`ConsentError::InvalidGender`] if no gender codes were given or any code is unknown.
    pub fn build(self) -> ConsentResult<ConsentDefinition> {
        let model = NonEmptyText::new(&self.model)
            .map_err(|_| ConsentError::InvalidDefinition("model is required".into()))?;
        let version = NonEmptyText::new(&self.version).map_err(|_| {
            ConsentError::InvalidDefinition(format!("version is required for {model}"))
        })?;

        let scope_key = self.scope.key();
        let name = if scope_key.is_empty() {
            format!("{model}-{version}")
        } else {
            format!("{model}-{version}-{scope_key}")
        };

        let (start, end) = match (self.start, self.end) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                return Err(ConsentError::InvalidDefinition(format!(
                    "{name}: start and end are required"
                )))
            }
        };
        if start >= end {
            return Err(ConsentError::InvalidDefinition(format!(
                "{name}: start {start} must be before end {end}"
            )));
        }

        if self.gender.is_empty() {
            return Err(ConsentError::InvalidGender {
                definition: name,
                reason: "at least one gender is required".into(),
            });
        }
        let gender = self
            .gender
            .iter()
            .map(|code| code.parse::<Gender>())
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|e| ConsentError::InvalidGender {
                definition: name.clone(),
                reason: e.to_string(),
            })?;

        if self.age_min > self.age_max {
            return Err(ConsentError::InvalidDefinition(format!(
                "{name}: age_min {} is greater than age_max {}",
                self.age_min, self.age_max
            )));
        }
        if self.age_is_adult > self.age_max {
            return Err(ConsentError::InvalidDefinition(format!(
                "{name}: age_is_adult {} is greater than age_max {}",
                self.age_is_adult, self.age_max
            )));
        }

        if self.updates_versions.iter().any(|v| v.is_empty()) {
            return Err(ConsentError::InvalidDefinition(format!(
                "{name}: updates_versions contains a blank version"
            )));
        }

        let subject_type = NonEmptyText::new(&self.subject_type)
            .map(|s| s.as_str().to_owned())
            .map_err(|_| {
                ConsentError::InvalidDefinition(format!("{name}: subject_type is required"))
            })?;

        Ok(ConsentDefinition {
            model,
            version,
            name,
            start,
            end,
            gender,
            age_min: self.age_min,
            age_max: self.age_max,
            age_is_adult: self.age_is_adult,
            subject_type,
            updates_versions: self.updates_versions,
            scope: self.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(n)
    }

    fn v1() -> ConsentDefinition {
        ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .gender(["M", "F"])
            .build()
            .expect("valid definition")
    }

    #[test]
    fn derives_name_and_display_name() {
        let cdef = v1();
        assert_eq!(cdef.name(), "meta.subjectconsent-1.0");
        assert_eq!(cdef.display_name(), "meta.subjectconsent v1.0");
        assert_eq!(cdef.age_min(), DEFAULT_AGE_MIN);
        assert_eq!(cdef.subject_type(), DEFAULT_SUBJECT_TYPE);
    }

    #[test]
    fn scoped_name_carries_scope_key() {
        let cdef = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .gender(["F"])
            .scope(
                Scope::all()
                    .with_country("Uganda")
                    .with_sites([SiteId(20), SiteId(10)]),
            )
            .build()
            .expect("valid definition");
        assert_eq!(cdef.name(), "meta.subjectconsent-1.0-uganda-10.20");
    }

    #[test]
    fn valid_for_datetime_is_inclusive_at_both_ends() {
        let cdef = v1();
        assert!(cdef.valid_for_datetime(day(0)));
        assert!(cdef.valid_for_datetime(day(25)));
        assert!(cdef.valid_for_datetime(day(50)));
        assert!(!cdef.valid_for_datetime(day(0) - Duration::seconds(1)));
        assert!(!cdef.valid_for_datetime(day(50) + Duration::seconds(1)));
    }

    #[test]
    fn rejects_empty_gender() {
        let err = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .build()
            .expect_err("should reject empty gender");
        assert!(matches!(err, ConsentError::InvalidGender { .. }));
    }

    #[test]
    fn rejects_unknown_gender_code() {
        let err = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .gender(["M", "Z"])
            .build()
            .expect_err("should reject Z");
        assert!(matches!(err, ConsentError::InvalidGender { reason, .. } if reason.contains("Z")));
    }

    #[test]
    fn rejects_inverted_age_range() {
        let err = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .gender(["M"])
            .age_range(65, 18)
            .build()
            .expect_err("should reject age range");
        assert!(matches!(err, ConsentError::InvalidDefinition(msg) if msg.contains("age_min")));
    }

    #[test]
    fn rejects_missing_version_and_period() {
        let err = ConsentDefinition::builder("meta.subjectconsent", "  ")
            .period(day(0), day(50))
            .gender(["M"])
            .build()
            .expect_err("should reject blank version");
        assert!(matches!(err, ConsentError::InvalidDefinition(msg) if msg.contains("version")));

        let err = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .gender(["M"])
            .build()
            .expect_err("should reject missing period");
        assert!(matches!(err, ConsentError::InvalidDefinition(msg) if msg.contains("start")));

        let err = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(10), day(10))
            .gender(["M"])
            .build()
            .expect_err("should reject empty period");
        assert!(matches!(err, ConsentError::InvalidDefinition(_)));
    }

    #[test]
    fn eligibility_checks_gender_and_age() {
        let cdef = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .gender(["F"])
            .age_range(16, 64)
            .build()
            .unwrap();
        let at = day(10);
        let dob = NaiveDate::from_ymd_opt(1990, 5, 1).unwrap();

        assert!(cdef.check_eligibility(dob, Gender::Female, at).is_ok());
        assert!(matches!(
            cdef.check_eligibility(dob, Gender::Male, at),
            Err(ConsentError::GenderNotEligible { .. })
        ));

        let too_young = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap();
        assert!(matches!(
            cdef.check_eligibility(too_young, Gender::Female, at),
            Err(ConsentError::AgeOutOfRange { age: 14, .. })
        ));

        let unborn = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert!(matches!(
            cdef.check_eligibility(unborn, Gender::Female, at),
            Err(ConsentError::AgeOutOfRange { age: 0, .. })
        ));
    }

    #[test]
    fn minors_require_a_guardian() {
        let cdef = ConsentDefinition::builder("meta.subjectconsent", "1.0")
            .period(day(0), day(50))
            .gender(["M", "F"])
            .age_range(16, 64)
            .age_is_adult(18)
            .build()
            .unwrap();
        let at = day(10);

        assert!(cdef.requires_guardian(NaiveDate::from_ymd_opt(2007, 6, 1).unwrap(), at));
        assert!(!cdef.requires_guardian(NaiveDate::from_ymd_opt(2000, 6, 1).unwrap(), at));
    }

    #[test]
    fn consent_datetime_must_fall_within_window() {
        let cdef = v1();
        assert!(cdef.check_consent_datetime(day(50)).is_ok());
        assert!(matches!(
            cdef.check_consent_datetime(day(51)),
            Err(ConsentError::ConsentDatetimeOutOfPeriod { .. })
        ));
    }

    #[test]
    fn scopes_intersect_unless_disjoint() {
        let everywhere = Scope::all();
        let uganda = Scope::all().with_country("uganda");
        let tanzania = Scope::all().with_country("Tanzania");
        let sites_a = Scope::all().with_sites([SiteId(10), SiteId(20)]);
        let sites_b = Scope::all().with_sites([SiteId(30)]);

        assert!(everywhere.intersects(&uganda));
        assert!(!uganda.intersects(&tanzania));
        assert!(!sites_a.intersects(&sites_b));
        assert!(sites_a.intersects(&uganda));

        assert!(uganda.applies_to(None, Some("UGANDA")));
        assert!(!uganda.applies_to(None, Some("tanzania")));
        assert!(sites_a.applies_to(Some(SiteId(10)), None));
        assert!(!sites_a.applies_to(Some(SiteId(30)), None));
    }

    #[test]
    fn country_filter_folds_non_ascii_case() {
        let scope = Scope::all().with_country("Côte d'Ivoire");
        assert_eq!(scope.country(), Some("côte d'ivoire"));
        assert!(scope.applies_to(None, Some("CÔTE D'IVOIRE")));
        assert!(scope.applies_to(None, Some("  côte d'ivoire ")));
        assert!(!scope.applies_to(None, Some("cote d'ivoire")));
    }
}
