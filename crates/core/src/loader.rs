//! YAML configuration for consent definitions and consent instances.
//!
//! Responsibilities:
//! - Define strict wire models for the definitions file and the instances file
//! - Translate wire models into validated domain types
//! - Surface the path of the failing field on schema mismatch
//!
//! Timestamps are RFC 3339 strings and must carry an offset; version strings must be quoted so
//! `1.0` is not read as a number.
//!
//! Definitions file:
//!
//! ```yaml
//! protocol:
//!   name: META
//!   study_open: "2024-01-01T00:00:00Z"
//!   study_close: "2026-12-31T23:59:59Z"
//! definitions:
//!   - model: meta.subjectconsent
//!     version: "1.0"
//!     start: "2024-01-01T00:00:00Z"
//!     end: "2024-12-31T23:59:59Z"
//!     gender: [M, F]
//!     age_min: 18
//!     age_max: 64
//! ```

use crate::config::ProtocolConfig;
use crate::constants::{DEFAULT_AGE_MAX, DEFAULT_AGE_MIN};
use crate::datetime::parse_aware_datetime;
use crate::definition::{ConsentDefinition, Scope};
use crate::registry::ConsentRegistry;
use crate::store::{ConsentInstance, MemoryInstanceStore};
use crate::{ConsentError, ConsentResult};
use chrono::NaiveDate;
use edc_consent_types::{Gender, SiteId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

/// Protocol and definitions read from a definitions file.
#[derive(Clone, Debug)]
pub struct LoadedDefinitions {
    pub protocol: ProtocolConfig,
    pub definitions: Vec<ConsentDefinition>,
}

impl LoadedDefinitions {
    /// Register every definition, in file order, into a new registry.
    pub fn into_registry(self) -> ConsentResult<ConsentRegistry> {
        let mut registry = ConsentRegistry::new(self.protocol);
        registry.register_all(self.definitions)?;
        Ok(registry)
    }
}

/// Parse a definitions file from YAML text.
pub fn parse_definitions(yaml_text: &str) -> ConsentResult<LoadedDefinitions> {
    let wire: DefinitionsFileWire = deserialize(yaml_text, "consent definitions")?;

    let protocol = ProtocolConfig::new(
        wire.protocol.name,
        parse_aware_datetime(&wire.protocol.study_open)?,
        parse_aware_datetime(&wire.protocol.study_close)?,
    )?;

    let definitions = wire
        .definitions
        .into_iter()
        .map(definition_from_wire)
        .collect::<ConsentResult<Vec<_>>>()?;

    Ok(LoadedDefinitions {
        protocol,
        definitions,
    })
}

/// Read and parse a definitions file.
pub fn load_definitions(path: &Path) -> ConsentResult<LoadedDefinitions> {
    let text = std::fs::read_to_string(path)?;
    let loaded = parse_definitions(&text)?;
    tracing::info!(
        "loaded {} consent definitions from {}",
        loaded.definitions.len(),
        path.display()
    );
    Ok(loaded)
}

/// Parse a list of consent instances from YAML text.
pub fn parse_instances(yaml_text: &str) -> ConsentResult<MemoryInstanceStore> {
    let wire: Vec<InstanceWire> = deserialize(yaml_text, "consent instances")?;
    wire.into_iter()
        .map(instance_from_wire)
        .collect::<ConsentResult<MemoryInstanceStore>>()
}

/// Read and parse a consent instances file.
pub fn load_instances(path: &Path) -> ConsentResult<MemoryInstanceStore> {
    let text = std::fs::read_to_string(path)?;
    let store = parse_instances(&text)?;
    tracing::info!(
        "loaded {} consent instances from {}",
        store.len(),
        path.display()
    );
    Ok(store)
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionsFileWire {
    protocol: ProtocolWire,
    #[serde(default)]
    definitions: Vec<DefinitionWire>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtocolWire {
    name: String,
    study_open: String,
    study_close: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DefinitionWire {
    model: String,
    version: String,
    start: String,
    end: String,
    #[serde(default)]
    gender: Vec<String>,
    age_min: Option<u32>,
    age_max: Option<u32>,
    age_is_adult: Option<u32>,
    subject_type: Option<String>,
    #[serde(default)]
    updates_versions: Vec<String>,
    country: Option<String>,
    #[serde(default)]
    sites: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstanceWire {
    subject_identifier: String,
    model: String,
    version: String,
    consent_datetime: String,
    dob: Option<NaiveDate>,
    gender: Option<Gender>,
    first_name: Option<String>,
    last_name: Option<String>,
    initials: Option<String>,
    site: Option<u32>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn deserialize<T: DeserializeOwned>(yaml_text: &str, what: &str) -> ConsentResult<T> {
    let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>"
        } else {
            path.as_str()
        };
        ConsentError::InvalidYaml(format!("{what} schema mismatch at {path}: {source}"))
    })
}

fn definition_from_wire(wire: DefinitionWire) -> ConsentResult<ConsentDefinition> {
    let start = parse_aware_datetime(&wire.start)?;
    let end = parse_aware_datetime(&wire.end)?;

    let mut scope = Scope::all().with_sites(wire.sites.into_iter().map(SiteId));
    if let Some(country) = wire.country {
        scope = scope.with_country(country);
    }

    let mut builder = ConsentDefinition::builder(wire.model, wire.version)
        .period(start, end)
        .gender(wire.gender)
        .updates_versions(wire.updates_versions)
        .scope(scope);

    if wire.age_min.is_some() || wire.age_max.is_some() {
        builder = builder.age_range(
            wire.age_min.unwrap_or(DEFAULT_AGE_MIN),
            wire.age_max.unwrap_or(DEFAULT_AGE_MAX),
        );
    }
    if let Some(age_is_adult) = wire.age_is_adult {
        builder = builder.age_is_adult(age_is_adult);
    }
    if let Some(subject_type) = wire.subject_type {
        builder = builder.subject_type(subject_type);
    }

    builder.build()
}

fn instance_from_wire(wire: InstanceWire) -> ConsentResult<ConsentInstance> {
    let consent_datetime = parse_aware_datetime(&wire.consent_datetime)?;
    let mut instance = ConsentInstance::new(
        wire.subject_identifier,
        wire.model,
        wire.version,
        consent_datetime,
    );
    instance.dob = wire.dob;
    instance.gender = wire.gender;
    instance.first_name = wire.first_name;
    instance.last_name = wire.last_name;
    instance.initials = wire.initials;
    instance.site = wire.site.map(SiteId);
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConsentQuery;
    use crate::store::{ConsentInstanceStore, InstanceQuery};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    const DEFINITIONS: &str = r#"protocol:
  name: META
  study_open: "2024-01-01T00:00:00Z"
  study_close: "2026-12-31T23:59:59Z"
definitions:
  - model: meta.subjectconsent
    version: "1.0"
    start: "2024-01-01T00:00:00Z"
    end: "2024-12-31T23:59:59Z"
    gender: [M, F]
    age_min: 16
  - model: meta.subjectconsent
    version: "2.0"
    start: "2025-01-01T00:00:00+00:00"
    end: "2025-12-31T23:59:59Z"
    gender: [M, F]
    updates_versions: ["1.0"]
    country: Uganda
    sites: [10, 20]
"#;

    #[test]
    fn parses_definitions_into_registry() {
        let loaded = parse_definitions(DEFINITIONS).expect("parse definitions");
        assert_eq!(loaded.protocol.name(), "META");
        assert_eq!(loaded.definitions.len(), 2);
        assert_eq!(loaded.definitions[0].age_min(), 16);
        assert_eq!(loaded.definitions[0].age_max(), 110);

        let registry = loaded.into_registry().expect("register");
        let query = ConsentQuery::new()
            .model("meta.subjectconsent")
            .report_datetime(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap())
            .site(SiteId(20));
        let cdef = registry.get_consent_definition(&query).expect("resolve");
        assert_eq!(cdef.name(), "meta.subjectconsent-2.0-uganda-10.20");
        assert_eq!(cdef.updates_versions(), ["1.0".to_string()]);
    }

    #[test]
    fn rejects_unknown_keys_with_path() {
        let input = DEFINITIONS.replace("    age_min: 16", "    age_minimum: 16");
        let err = parse_definitions(&input).expect_err("unknown key");
        match err {
            ConsentError::InvalidYaml(msg) => {
                assert!(msg.contains("definitions[0]"), "{msg}");
                assert!(msg.contains("age_minimum"), "{msg}");
            }
            other => panic!("expected InvalidYaml error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_naive_timestamps() {
        let input = DEFINITIONS.replace(
            r#"end: "2024-12-31T23:59:59Z""#,
            r#"end: "2024-12-31T23:59:59""#,
        );
        let err = parse_definitions(&input).expect_err("naive end");
        assert!(matches!(err, ConsentError::NaiveDatetime(_)));
    }

    #[test]
    fn rejects_unknown_gender_code() {
        let input = DEFINITIONS.replacen("gender: [M, F]", "gender: [M, X]", 1);
        let err = parse_definitions(&input).expect_err("unknown gender");
        assert!(matches!(err, ConsentError::InvalidGender { .. }));
    }

    #[test]
    fn registry_errors_surface_from_into_registry() {
        let input = DEFINITIONS.replace(r#"["1.0"]"#, r#"["0.9"]"#);
        let loaded = parse_definitions(&input).expect("parse");
        let err = loaded.into_registry().expect_err("bad update reference");
        assert!(matches!(err, ConsentError::ConsentVersionSequence { .. }));
    }

    #[test]
    fn loads_files_from_disk() {
        let temp = TempDir::new().unwrap();
        let defs_path = temp.path().join("consents.yaml");
        let instances_path = temp.path().join("instances.yaml");
        fs::write(&defs_path, DEFINITIONS).unwrap();
        fs::write(
            &instances_path,
            r#"- subject_identifier: "12345"
  model: meta.subjectconsent
  version: "1.0"
  consent_datetime: "2024-02-01T09:30:00+03:00"
  dob: 1990-05-01
  gender: F
  initials: EB
  site: 10
"#,
        )
        .unwrap();

        let loaded = load_definitions(&defs_path).expect("load definitions");
        assert_eq!(loaded.definitions.len(), 2);

        let store = load_instances(&instances_path).expect("load instances");
        let found = store
            .find(&InstanceQuery {
                model: "meta.subjectconsent",
                subject_identifier: "12345",
                version: "1.0",
                not_after: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            })
            .unwrap()
            .expect("instance");
        assert_eq!(
            found.consent_datetime,
            Utc.with_ymd_and_hms(2024, 2, 1, 6, 30, 0).unwrap()
        );
        assert_eq!(found.gender, Some(Gender::Female));
        assert_eq!(found.site, Some(SiteId(10)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let temp = TempDir::new().unwrap();
        let err = load_definitions(&temp.path().join("absent.yaml")).expect_err("missing file");
        assert!(matches!(err, ConsentError::Io(_)));
    }
}
