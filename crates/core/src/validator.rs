//! Registration-time validation of consent definitions.
//!
//! A new definition is checked against the protocol study period and against the definitions
//! already registered for the same model. Checks run in a fixed order so the reported error is
//! deterministic: study period, overlap, version uniqueness, supersession.

use crate::config::ProtocolConfig;
use crate::datetime::truncate_to_seconds;
use crate::definition::ConsentDefinition;
use crate::{ConsentError, ConsentResult};

/// Validates a definition against the protocol and the already-registered definitions.
pub struct ConsentDefinitionValidator<'a> {
    protocol: &'a ProtocolConfig,
    registered: &'a [ConsentDefinition],
}

impl<'a> ConsentDefinitionValidator<'a> {
    pub fn new(protocol: &'a ProtocolConfig, registered: &'a [ConsentDefinition]) -> Self {
        Self {
            protocol,
            registered,
        }
    }

    /// Run every check against `cdef`, stopping at the first failure.
    pub fn validate(&self, cdef: &ConsentDefinition) -> ConsentResult<()> {
        self.check_study_period(cdef)?;
        self.check_overlap(cdef)?;
        self.check_version(cdef)?;
        self.check_updates_versions(cdef)?;
        Ok(())
    }

    /// Registered definitions of the same model whose scope could apply to the same site.
    fn peers<'b>(
        &'b self,
        cdef: &'b ConsentDefinition,
    ) -> impl Iterator<Item = &'a ConsentDefinition> + 'b {
        self.registered
            .iter()
            .filter(move |d| d.model() == cdef.model() && d.scope().intersects(cdef.scope()))
    }

    /// Both ends of the consent window must lie within the study period, compared at second
    /// resolution.
    pub fn check_study_period(&self, cdef: &ConsentDefinition) -> ConsentResult<()> {
        let open = truncate_to_seconds(self.protocol.study_open());
        let close = truncate_to_seconds(self.protocol.study_close());
        let start = truncate_to_seconds(cdef.start());
        let end = truncate_to_seconds(cdef.end());

        let failure = if start < open {
            Some(format!("start {start} is before study open {open}"))
        } else if start > close {
            Some(format!("start {start} is after study close {close}"))
        } else if end < open {
            Some(format!("end {end} is before study open {open}"))
        } else if end > close {
            Some(format!("end {end} is after study close {close}"))
        } else {
            None
        };

        match failure {
            Some(reason) => Err(ConsentError::ConsentPeriod {
                definition: cdef.name().to_owned(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Fails if the window intersects the window of any peer, including full containment in
    /// either direction.
    pub fn check_overlap(&self, cdef: &ConsentDefinition) -> ConsentResult<()> {
        let clash = self
            .peers(cdef)
            .find(|d| cdef.start() <= d.end() && d.start() <= cdef.end());

        match clash {
            Some(existing) => Err(ConsentError::ConsentPeriodOverlap {
                definition: cdef.name().to_owned(),
                existing: existing.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn check_version(&self, cdef: &ConsentDefinition) -> ConsentResult<()> {
        if let Some(existing) = self.peers(cdef).find(|d| d.version() == cdef.version()) {
            return Err(ConsentError::ConsentVersionSequence {
                definition: cdef.name().to_owned(),
                reason: format!(
                    "version {} is already registered as {}",
                    cdef.version(),
                    existing.name()
                ),
            });
        }
        Ok(())
    }

    /// Every superseded version must already be registered for the model.
    pub fn check_updates_versions(&self, cdef: &ConsentDefinition) -> ConsentResult<()> {
        for version in cdef.updates_versions() {
            if version == cdef.version() {
                return Err(ConsentError::ConsentVersionSequence {
                    definition: cdef.name().to_owned(),
                    reason: format!("version {version} cannot update itself"),
                });
            }
            if !self.peers(cdef).any(|d| d.version() == version) {
                return Err(ConsentError::ConsentVersionSequence {
                    definition: cdef.name().to_owned(),
                    reason: format!(
                        "updates version {version}, which is not registered for {}",
                        cdef.model()
                    ),
                });
            }
        }
        Ok(())
    }
}
