//! The consent definition registry.
//!
//! [`ConsentRegistry`] is owned by the application's composition root and passed by reference
//! to whatever needs it. Registration takes `&mut self`; lookups take `&self`, so once startup
//! has finished the registry can be shared freely.
//!
//! Definitions are kept in registration order. That order is the only version order the
//! registry knows about: when several definitions of the same scope match a query and no version
//! was asked for, the one registered last wins.

use crate::config::ProtocolConfig;
use crate::definition::ConsentDefinition;
use crate::validator::ConsentDefinitionValidator;
use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, Utc};
use edc_consent_types::SiteId;
use std::collections::HashMap;
use std::fmt;

/// Filters for a registry lookup. Unset fields do not filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsentQuery {
    pub model: Option<String>,
    pub report_datetime: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub site: Option<SiteId>,
    pub country: Option<String>,
}

impl ConsentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn report_datetime(mut self, report_datetime: DateTime<Utc>) -> Self {
        self.report_datetime = Some(report_datetime);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn site(mut self, site: SiteId) -> Self {
        self.site = Some(site);
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

impl fmt::Display for ConsentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(model) = &self.model {
            parts.push(format!("model={model}"));
        }
        if let Some(ts) = &self.report_datetime {
            parts.push(format!("report_datetime={}", ts.to_rfc3339()));
        }
        if let Some(version) = &self.version {
            parts.push(format!("version={version}"));
        }
        if let Some(site) = &self.site {
            parts.push(format!("site={site}"));
        }
        if let Some(country) = &self.country {
            parts.push(format!("country={country}"));
        }
        if parts.is_empty() {
            f.write_str("<any>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// Registry of consent definitions for one protocol.
#[derive(Clone, Debug)]
pub struct ConsentRegistry {
    protocol: ProtocolConfig,
    definitions: Vec<ConsentDefinition>,
    by_name: HashMap<String, usize>,
}

impl ConsentRegistry {
    pub fn new(protocol: ProtocolConfig) -> Self {
        Self {
            protocol,
            definitions: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// Validate and store a definition.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::AlreadyRegistered`] if a definition with the same name exists.
    /// - Any error from [`ConsentDefinitionValidator::validate`].
    pub fn register(&mut self, cdef: ConsentDefinition) -> ConsentResult<()> {
        if self.by_name.contains_key(cdef.name()) {
            return Err(ConsentError::AlreadyRegistered(cdef.name().to_owned()));
        }

        ConsentDefinitionValidator::new(&self.protocol, &self.definitions).validate(&cdef)?;

        tracing::debug!(
            definition = cdef.name(),
            start = %cdef.start(),
            end = %cdef.end(),
            "registered consent definition"
        );
        self.by_name
            .insert(cdef.name().to_owned(), self.definitions.len());
        self.definitions.push(cdef);
        Ok(())
    }

    /// Register definitions in order, stopping at the first failure.
    ///
    /// Definitions registered before the failure stay registered.
    pub fn register_all(
        &mut self,
        cdefs: impl IntoIterator<Item = ConsentDefinition>,
    ) -> ConsentResult<()> {
        for cdef in cdefs {
            self.register(cdef)?;
        }
        Ok(())
    }

    /// Remove every registered definition, keeping the protocol.
    pub fn reset(&mut self) {
        self.definitions.clear();
        self.by_name.clear();
    }

    pub fn get(&self, name: &str) -> Option<&ConsentDefinition> {
        self.by_name.get(name).map(|&i| &self.definitions[i])
    }

    /// All definitions in registration order.
    pub fn all(&self) -> &[ConsentDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// All definitions matching `query`, in registration order.
    ///
    /// Filters apply in order: model, report datetime, version, then site and country.
    pub fn get_consent_definitions(&self, query: &ConsentQuery) -> Vec<&ConsentDefinition> {
        self.definitions
            .iter()
            .filter(|d| query.model.as_deref().map_or(true, |m| d.model() == m))
            .filter(|d| {
                query
                    .report_datetime
                    .map_or(true, |ts| d.valid_for_datetime(ts))
            })
            .filter(|d| query.version.as_deref().map_or(true, |v| d.version() == v))
            .filter(|d| d.scope().applies_to(query.site, query.country.as_deref()))
            .collect()
    }

    /// Exactly one definition matching `query`.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::ConsentDefinitionDoesNotExist`] if nothing matches.
    /// - [`ConsentError::SiteConsent`] if the matches differ in model or scope, so the caller
    ///   must add a model, site or country to choose between them.
    ///
    /// Matches that share both model and scope resolve to the one registered last.
    pub fn get_consent_definition(&self, query: &ConsentQuery) -> ConsentResult<&ConsentDefinition> {
        let matches = self.get_consent_definitions(query);

        let Some(latest) = matches.last().copied() else {
            return Err(ConsentError::ConsentDefinitionDoesNotExist(query.to_string()));
        };

        if matches
            .iter()
            .any(|d| d.model() != latest.model() || d.scope() != latest.scope())
        {
            let names: Vec<&str> = matches.iter().map(|d| d.name()).collect();
            return Err(ConsentError::SiteConsent(format!(
                "more than one consent definition matches {query}: {}. \
                 Specify a model, site or country",
                names.join(", ")
            )));
        }

        Ok(latest)
    }

    /// The definition of `model` in force at `report_datetime`.
    pub fn get_consent_for_period(
        &self,
        model: &str,
        report_datetime: DateTime<Utc>,
    ) -> ConsentResult<&ConsentDefinition> {
        self.get_consent_definition(
            &ConsentQuery::new()
                .model(model)
                .report_datetime(report_datetime),
        )
    }

    /// The definition in force at `report_datetime`, across all models.
    pub fn get_by_datetime(&self, report_datetime: DateTime<Utc>) -> ConsentResult<&ConsentDefinition> {
        self.get_consent_definition(&ConsentQuery::new().report_datetime(report_datetime))
    }

    /// The most recently registered definition of `model`.
    pub fn latest_for_model(&self, model: &str) -> Option<&ConsentDefinition> {
        self.definitions.iter().rev().find(|d| d.model() == model)
    }

    /// Definitions of the same model that declare they supersede `cdef`.
    pub fn updated_by(&self, cdef: &ConsentDefinition) -> Vec<&ConsentDefinition> {
        self.definitions
            .iter()
            .filter(|d| {
                d.model() == cdef.model()
                    && d.scope().intersects(cdef.scope())
                    && d.updates(cdef.version())
            })
            .collect()
    }

    /// The registered definition of `model` at `version` whose scope meets `near`.
    pub(crate) fn find_version(
        &self,
        near: &ConsentDefinition,
        version: &str,
    ) -> Option<&ConsentDefinition> {
        self.definitions.iter().rev().find(|d| {
            d.model() == near.model()
                && d.version() == version
                && d.scope().intersects(near.scope())
        })
    }
}

impl fmt::Display for ConsentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} - {})",
            self.protocol.name(),
            self.protocol.study_open().to_rfc3339(),
            self.protocol.study_close().to_rfc3339()
        )?;
        for cdef in &self.definitions {
            write!(f, "  {cdef}")?;
            if !cdef.updates_versions().is_empty() {
                write!(f, " updates {}", cdef.updates_versions().join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
