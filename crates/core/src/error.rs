use chrono::{DateTime, Utc};

/// Boxed error returned by external consent-instance stores.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("naive datetime not allowed, a timezone offset is required: '{0}'")]
    NaiveDatetime(String),
    #[error("invalid datetime: '{0}'")]
    InvalidDatetime(String),
    #[error("invalid gender for consent definition {definition}: {reason}")]
    InvalidGender { definition: String, reason: String },
    #[error("invalid consent definition: {0}")]
    InvalidDefinition(String),

    #[error("consent period for {definition} falls outside the study period: {reason}")]
    ConsentPeriod { definition: String, reason: String },
    #[error("consent period for {definition} overlaps with {existing}")]
    ConsentPeriodOverlap { definition: String, existing: String },
    #[error("consent version sequence error for {definition}: {reason}")]
    ConsentVersionSequence { definition: String, reason: String },
    #[error("consent definition already registered: {0}")]
    AlreadyRegistered(String),

    #[error("consent definition does not exist for {0}")]
    ConsentDefinitionDoesNotExist(String),
    #[error("site consent error: {0}")]
    SiteConsent(String),

    #[error(
        "subject {subject_identifier} has not consented to {model} v{version} \
         (report datetime {report_datetime})"
    )]
    NotConsented {
        model: String,
        version: String,
        subject_identifier: String,
        report_datetime: DateTime<Utc>,
    },
    #[error("subject identifier is required")]
    InvalidSubjectIdentifier,

    #[error("consent datetime {consent_datetime} is not within the period of {definition}")]
    ConsentDatetimeOutOfPeriod {
        definition: String,
        consent_datetime: DateTime<Utc>,
    },
    #[error("age {age} is not within {age_min}-{age_max} for {definition}")]
    AgeOutOfRange {
        definition: String,
        age: u32,
        age_min: u32,
        age_max: u32,
    },
    #[error("gender {gender} is not eligible for {definition}")]
    GenderNotEligible { definition: String, gender: String },
    #[error("initials do not match full name: {0}")]
    InitialsMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid YAML: {0}")]
    InvalidYaml(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("consent instance store error: {0}")]
    Store(#[source] StoreError),
}

pub type ConsentResult<T> = std::result::Result<T, ConsentError>;
