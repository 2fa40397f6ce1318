use anyhow::Context;
use clap::{Parser, Subcommand};
use edc_consent_core::constants::{DEFINITIONS_FILE_ENV, STUDY_CLOSE_ENV, STUDY_OPEN_ENV};
use edc_consent_core::{
    load_definitions, load_instances, parse_aware_datetime, verify_initials_against_full_name,
    ChainPolicy, ConsentQuery, ConsentRegistry, ConsentResolver, SiteId,
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "edc-consent")]
#[command(about = "Consent definition registry CLI")]
struct Cli {
    /// Consent definitions YAML file (defaults to $EDC_CONSENT_DEFINITIONS)
    #[arg(long, global = true)]
    definitions: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the definitions file and list the registry
    List,
    /// Show the consent definition in force
    Resolve {
        /// Consent model label
        model: String,
        /// Report datetime (RFC 3339, with offset)
        report_datetime: String,
        /// Pin a version
        #[arg(long)]
        version: Option<String>,
        /// Site identifier
        #[arg(long)]
        site: Option<u32>,
        /// Country
        #[arg(long)]
        country: Option<String>,
    },
    /// Check that a subject has consented for a report datetime
    Check {
        /// Subject identifier
        subject_identifier: String,
        /// Consent model label
        model: String,
        /// Report datetime (RFC 3339, with offset)
        report_datetime: String,
        /// Consent instances YAML file
        #[arg(long)]
        instances: PathBuf,
        /// Site identifier
        #[arg(long)]
        site: Option<u32>,
        /// Country
        #[arg(long)]
        country: Option<String>,
        /// Accept a consent signed under a superseded version
        #[arg(long)]
        accept_prior: bool,
    },
    /// Verify initials against first and last name
    Initials {
        first_name: String,
        last_name: String,
        initials: String,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("edc_consent=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::List) => {
            let registry = load_registry(cli.definitions)?;
            print!("{registry}");
        }
        Some(Commands::Resolve {
            model,
            report_datetime,
            version,
            site,
            country,
        }) => {
            let registry = load_registry(cli.definitions)?;
            let query = ConsentQuery::new()
                .model(model)
                .report_datetime(parse_aware_datetime(&report_datetime)?);
            let mut query = narrow(query, site, country);
            query.version = version;

            let cdef = registry.get_consent_definition(&query)?;
            println!("{cdef}");
            println!("  display name: {}", cdef.display_name());
            println!(
                "  ages: {}-{} (adult at {})",
                cdef.age_min(),
                cdef.age_max(),
                cdef.age_is_adult()
            );
            let genders: Vec<&str> = cdef.gender().iter().map(|g| g.code()).collect();
            println!("  gender: {}", genders.join(", "));
            if !cdef.updates_versions().is_empty() {
                println!("  updates: {}", cdef.updates_versions().join(", "));
            }
        }
        Some(Commands::Check {
            subject_identifier,
            model,
            report_datetime,
            instances,
            site,
            country,
            accept_prior,
        }) => {
            let registry = load_registry(cli.definitions)?;
            let store = load_instances(&instances)
                .with_context(|| format!("failed to load {}", instances.display()))?;
            let policy = if accept_prior {
                ChainPolicy::AcceptPriorVersions
            } else {
                ChainPolicy::Strict
            };

            let report_datetime = parse_aware_datetime(&report_datetime)?;
            let query = ConsentQuery::new()
                .model(model)
                .report_datetime(report_datetime);
            let definition = registry.get_consent_definition(&narrow(query, site, country))?;

            let resolver = ConsentResolver::new(&registry, &store).with_policy(policy);
            let resolved = resolver.require_consent_for_definition(
                &subject_identifier,
                definition,
                report_datetime,
            )?;

            println!(
                "Subject {} is consented under {}",
                subject_identifier,
                resolved.definition.display_name()
            );
            for (field, value) in resolved.instance.display_fields() {
                println!("  {field}: {value}");
            }
        }
        Some(Commands::Initials {
            first_name,
            last_name,
            initials,
        }) => {
            verify_initials_against_full_name(&first_name, &last_name, &initials)?;
            println!("Initials {initials} match {first_name} {last_name}");
        }
        None => {
            println!("Use 'edc-consent --help' for commands");
        }
    }

    Ok(())
}

/// Narrow a registry query by site and country when given.
fn narrow(mut query: ConsentQuery, site: Option<u32>, country: Option<String>) -> ConsentQuery {
    query.site = site.map(SiteId);
    query.country = country;
    query
}

/// Load the definitions file, apply study period overrides from the environment, and register.
fn load_registry(definitions: Option<PathBuf>) -> anyhow::Result<ConsentRegistry> {
    let path = match definitions {
        Some(path) => path,
        None => std::env::var(DEFINITIONS_FILE_ENV)
            .map(PathBuf::from)
            .with_context(|| format!("pass --definitions or set {DEFINITIONS_FILE_ENV}"))?,
    };

    let mut loaded = load_definitions(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    loaded.protocol = loaded.protocol.with_env_overrides(
        std::env::var(STUDY_OPEN_ENV).ok(),
        std::env::var(STUDY_CLOSE_ENV).ok(),
    )?;

    let registry = loaded.into_registry()?;
    tracing::info!(
        "registered {} consent definitions for {}",
        registry.len(),
        registry.protocol().name()
    );
    Ok(registry)
}
