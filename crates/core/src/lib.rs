//! # EDC Consent Core
//!
//! Consent definition registry and consent resolution for clinical trial data capture.
//!
//! This crate contains:
//! - Versioned, immutable consent definitions with validity windows and eligibility rules
//! - Registration-time validation against the study period and previously registered versions
//! - Lookup of the definition in force for a model at a report datetime
//! - Per-subject checks that a signed consent covers a report datetime
//!
//! **No persistence concerns**: consent instances are read through [`ConsentInstanceStore`],
//! implemented by whatever storage the application uses.
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use edc_consent_core::{
//!     ConsentDefinition, ConsentInstance, ConsentRegistry, ConsentResolver,
//!     MemoryInstanceStore, ProtocolConfig,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let open = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let close = Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).unwrap();
//! let mut registry = ConsentRegistry::new(ProtocolConfig::new("META", open, close)?);
//!
//! registry.register(
//!     ConsentDefinition::builder("meta.subjectconsent", "1.0")
//!         .period(open, Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap())
//!         .gender(["M", "F"])
//!         .build()?,
//! )?;
//!
//! let mut store = MemoryInstanceStore::new();
//! store.insert(ConsentInstance::new(
//!     "12345",
//!     "meta.subjectconsent",
//!     "1.0",
//!     Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
//! ));
//!
//! let resolver = ConsentResolver::new(&registry, &store);
//! let report_datetime = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
//! assert!(resolver.is_consented("12345", "meta.subjectconsent", report_datetime)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod datetime;
pub mod definition;
pub mod error;
pub mod identity;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod validator;

pub use config::ProtocolConfig;
pub use datetime::parse_aware_datetime;
pub use definition::{ConsentDefinition, ConsentDefinitionBuilder, Scope};
pub use error::{ConsentError, ConsentResult, StoreError};
pub use identity::verify_initials_against_full_name;
pub use loader::{load_definitions, load_instances, LoadedDefinitions};
pub use registry::{ConsentQuery, ConsentRegistry};
pub use resolver::{ChainPolicy, ConsentResolver, ResolvedConsent};
pub use store::{ConsentInstance, ConsentInstanceStore, InstanceQuery, MemoryInstanceStore};
pub use validator::ConsentDefinitionValidator;

pub use edc_consent_types::{Gender, NonEmptyText, SiteId};
