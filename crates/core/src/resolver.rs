//! Per-subject consent checks.
//!
//! [`ConsentResolver`] answers whether a subject holds a signed consent covering a report
//! datetime for a model. It resolves the governing definition through the registry and then
//! queries the consent-instance store. Nothing is written.
//!
//! When the governing definition supersedes earlier versions, [`ChainPolicy`] decides whether a
//! consent signed under one of those versions still counts.

use crate::definition::ConsentDefinition;
use crate::registry::ConsentRegistry;
use crate::store::{ConsentInstance, ConsentInstanceStore, InstanceQuery};
use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, Utc};
use edc_consent_types::NonEmptyText;
use std::collections::HashSet;

/// How consents signed under superseded versions are treated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChainPolicy {
    /// Only a consent signed under the governing version counts. Subjects re-consent.
    #[default]
    Strict,
    /// A consent signed under a superseded version counts if it was signed no later than the
    /// governing definition's start. Superseded versions are walked depth first in declared
    /// order.
    AcceptPriorVersions,
}

/// Outcome of a successful consent check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConsent<'r> {
    /// The definition governing the report datetime.
    pub definition: &'r ConsentDefinition,
    /// The signed consent that satisfied the check.
    pub instance: ConsentInstance,
}

impl ResolvedConsent<'_> {
    /// Returns true if the consent was signed under a superseded version.
    pub fn via_prior_version(&self) -> bool {
        self.instance.version != self.definition.version()
    }
}

pub struct ConsentResolver<'r, S> {
    registry: &'r ConsentRegistry,
    store: S,
    policy: ChainPolicy,
}

impl<'r, S: ConsentInstanceStore> ConsentResolver<'r, S> {
    pub fn new(registry: &'r ConsentRegistry, store: S) -> Self {
        Self {
            registry,
            store,
            policy: ChainPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ChainPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ChainPolicy {
        self.policy
    }

    /// Require a consent covering `report_datetime` for `model`.
    ///
    /// # Errors
    ///
    /// - [`ConsentError::InvalidSubjectIdentifier`] if the identifier is blank.
    /// - Registry lookup errors if no single definition governs the datetime.
    /// - [`ConsentError::NotConsented`] if no qualifying instance exists.
    /// - [`ConsentError::Store`] if the store fails.
    pub fn require_consent(
        &self,
        subject_identifier: &str,
        model: &str,
        report_datetime: DateTime<Utc>,
    ) -> ConsentResult<ResolvedConsent<'r>> {
        let subject = subject(subject_identifier)?;
        let definition = self.registry.get_consent_for_period(model, report_datetime)?;
        self.check(&subject, definition, report_datetime)
    }

    /// Require a consent under an already-resolved definition.
    ///
    /// Useful when the caller resolved the definition with site or country filters.
    pub fn require_consent_for_definition(
        &self,
        subject_identifier: &str,
        definition: &'r ConsentDefinition,
        report_datetime: DateTime<Utc>,
    ) -> ConsentResult<ResolvedConsent<'r>> {
        let subject = subject(subject_identifier)?;
        self.check(&subject, definition, report_datetime)
    }

    /// Like [`require_consent`](Self::require_consent), mapping a missing consent to `false`.
    pub fn is_consented(
        &self,
        subject_identifier: &str,
        model: &str,
        report_datetime: DateTime<Utc>,
    ) -> ConsentResult<bool> {
        match self.require_consent(subject_identifier, model, report_datetime) {
            Ok(_) => Ok(true),
            Err(ConsentError::NotConsented { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The most recent consent signed under any version `definition` directly supersedes.
    pub fn previous_consent(
        &self,
        subject_identifier: &str,
        definition: &ConsentDefinition,
    ) -> ConsentResult<Option<ConsentInstance>> {
        let subject = subject(subject_identifier)?;
        let mut latest: Option<ConsentInstance> = None;

        for version in definition.updates_versions() {
            let found = self.find(definition.model(), &subject, version, definition.end())?;
            if let Some(found) = found {
                let newer = latest
                    .as_ref()
                    .map_or(true, |l| found.consent_datetime > l.consent_datetime);
                if newer {
                    latest = Some(found);
                }
            }
        }
        Ok(latest)
    }

    fn check(
        &self,
        subject: &NonEmptyText,
        definition: &'r ConsentDefinition,
        report_datetime: DateTime<Utc>,
    ) -> ConsentResult<ResolvedConsent<'r>> {
        let direct = self.find(
            definition.model(),
            subject,
            definition.version(),
            report_datetime,
        )?;
        if let Some(instance) = direct {
            return Ok(ResolvedConsent {
                definition,
                instance,
            });
        }

        if self.policy == ChainPolicy::AcceptPriorVersions {
            let cutoff = report_datetime.min(definition.start());
            let mut visited = HashSet::new();
            if let Some(instance) = self.walk_chain(subject, definition, cutoff, &mut visited)? {
                tracing::debug!(
                    subject = subject.as_str(),
                    definition = definition.name(),
                    version = instance.version.as_str(),
                    "accepted consent under superseded version"
                );
                return Ok(ResolvedConsent {
                    definition,
                    instance,
                });
            }
        }

        Err(ConsentError::NotConsented {
            model: definition.model().to_owned(),
            version: definition.version().to_owned(),
            subject_identifier: subject.to_string(),
            report_datetime,
        })
    }

    fn walk_chain(
        &self,
        subject: &NonEmptyText,
        from: &ConsentDefinition,
        cutoff: DateTime<Utc>,
        visited: &mut HashSet<String>,
    ) -> ConsentResult<Option<ConsentInstance>> {
        for version in from.updates_versions() {
            if !visited.insert(version.clone()) {
                continue;
            }
            if let Some(instance) = self.find(from.model(), subject, version, cutoff)? {
                return Ok(Some(instance));
            }
            if let Some(prior) = self.registry.find_version(from, version) {
                if let Some(instance) = self.walk_chain(subject, prior, cutoff, visited)? {
                    return Ok(Some(instance));
                }
            }
        }
        Ok(None)
    }

    fn find(
        &self,
        model: &str,
        subject: &NonEmptyText,
        version: &str,
        not_after: DateTime<Utc>,
    ) -> ConsentResult<Option<ConsentInstance>> {
        self.store
            .find(&InstanceQuery {
                model,
                subject_identifier: subject.as_str(),
                version,
                not_after,
            })
            .map_err(ConsentError::Store)
    }
}

fn subject(subject_identifier: &str) -> ConsentResult<NonEmptyText> {
    NonEmptyText::new(subject_identifier).map_err(|_| ConsentError::InvalidSubjectIdentifier)
}
