//! Constants used throughout the consent core crate.
//!
//! Defaults mirror the values used on the standard consent case report forms.

/// Default minimum age, in completed years, at consent.
pub const DEFAULT_AGE_MIN: u32 = 18;

/// Default maximum age, in completed years, at consent.
pub const DEFAULT_AGE_MAX: u32 = 110;

/// Default age, in completed years, from which no guardian is required.
pub const DEFAULT_AGE_IS_ADULT: u32 = 18;

/// Default subject type for a consent definition.
pub const DEFAULT_SUBJECT_TYPE: &str = "subject";

/// Environment variable naming the consent definitions YAML file.
pub const DEFINITIONS_FILE_ENV: &str = "EDC_CONSENT_DEFINITIONS";

/// Environment variable overriding the protocol study open datetime.
pub const STUDY_OPEN_ENV: &str = "EDC_STUDY_OPEN";

/// Environment variable overriding the protocol study close datetime.
pub const STUDY_CLOSE_ENV: &str = "EDC_STUDY_CLOSE";
