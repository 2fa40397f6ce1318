//! Protocol configuration.
//!
//! The protocol study period is resolved once at process startup and then passed into the
//! registry. Environment variables are read by the binary, not during lookups; this module only
//! parses the values it is handed.

use crate::datetime::parse_aware_datetime;
use crate::{ConsentError, ConsentResult};
use chrono::{DateTime, Utc};

/// Protocol-wide study period within which every consent window must fall.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolConfig {
    name: String,
    study_open: DateTime<Utc>,
    study_close: DateTime<Utc>,
}

impl ProtocolConfig {
    /// Create a new `ProtocolConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsentError::InvalidConfig`] if the name is blank or the study does not close
    /// after it opens.
    pub fn new(
        name: impl Into<String>,
        study_open: DateTime<Utc>,
        study_close: DateTime<Utc>,
    ) -> ConsentResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConsentError::InvalidConfig(
                "protocol name cannot be empty".into(),
            ));
        }
        if study_open >= study_close {
            return Err(ConsentError::InvalidConfig(format!(
                "study open {study_open} must be before study close {study_close}"
            )));
        }

        Ok(Self {
            name: name.trim().to_owned(),
            study_open,
            study_close,
        })
    }

    /// Build a `ProtocolConfig`, letting optional environment values override the open and close
    /// datetimes.
    ///
    /// Empty or whitespace-only values are treated as absent.
    pub fn with_env_overrides(
        self,
        study_open: Option<String>,
        study_close: Option<String>,
    ) -> ConsentResult<Self> {
        let open = datetime_from_env_value(study_open)?.unwrap_or(self.study_open);
        let close = datetime_from_env_value(study_close)?.unwrap_or(self.study_close);
        Self::new(self.name, open, close)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn study_open(&self) -> DateTime<Utc> {
        self.study_open
    }

    pub fn study_close(&self) -> DateTime<Utc> {
        self.study_close
    }
}

/// Parse an optional timezone-aware datetime from an environment value.
///
/// Returns `Ok(None)` if `value` is `None` or blank.
pub fn datetime_from_env_value(value: Option<String>) -> ConsentResult<Option<DateTime<Utc>>> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(|v| parse_aware_datetime(&v))
        .transpose()
}
