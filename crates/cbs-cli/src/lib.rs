//! `cbs` command-line surface
//!
//! Each subcommand reads a manifest or a form state from disk, runs it
//! through the sync engine and writes the result to the given writer.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cbs_engine::{EngineConfig, FormState, SyncEngine};
use cbs_manifest::ManifestDocument;
use cbs_schema::SchemaSource;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

/// Keep a connector builder form and its declarative manifest in sync
#[derive(Debug, Parser)]
#[command(name = "cbs", version, about)]
pub struct Cli {
    /// Declarative component schema to validate against instead of the bundled one
    #[arg(long, global = true, env = "CBS_SCHEMA_PATH")]
    pub schema_path: Option<PathBuf>,

    /// Skip JSON Schema validation of derived manifests
    #[arg(long, global = true, env = "CBS_SKIP_SCHEMA_VALIDATION")]
    pub skip_schema_validation: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert a manifest into form state
    ToForm {
        /// Manifest file (YAML or JSON)
        manifest: PathBuf,
    },
    /// Derive the manifest for a saved form state
    ToManifest {
        /// Form state file (JSON)
        form: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
    /// Validate a manifest as the form would, printing errors by field path
    Validate {
        /// Manifest file (YAML or JSON)
        manifest: PathBuf,
        /// JSON object of testing values
        #[arg(long)]
        testing_values: Option<PathBuf>,
    },
    /// Rename a user input and every config reference to it
    RenameInput {
        /// Manifest file (YAML or JSON)
        manifest: PathBuf,
        /// Current input key
        from: String,
        /// New input key
        to: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },
    /// Show the schema documentation for a definition path
    Describe {
        /// Dotted path such as `BearerAuthenticator.api_token`
        path: String,
    },
}

impl Cli {
    /// Engine configuration from the global options
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let source = self
            .schema_path
            .clone()
            .map_or(SchemaSource::Bundled, SchemaSource::Path);
        EngineConfig::new()
            .with_schema_source(source)
            .with_schema_validation(!self.skip_schema_validation)
    }
}

/// Install the global tracing subscriber, honouring `RUST_LOG`
pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(err) = installed {
        eprintln!("tracing already initialized: {err}");
    }
}

/// Run one command
///
/// Returns `false` when the command ran but found the input invalid.
///
/// # Errors
/// Returns error if a file cannot be read or parsed, or the engine rejects
/// the request
pub fn run(cli: &Cli, out: &mut impl Write) -> Result<bool> {
    match &cli.command {
        Command::ToForm { manifest } => {
            let manifest = read_manifest(manifest)?;
            let engine = SyncEngine::from_manifest(cli.engine_config().with_schema_validation(false), &manifest)?;
            write_json(out, &serde_json::to_value(engine.state())?)?;
            Ok(true)
        }
        Command::ToManifest { form, format } => {
            let text = read(form)?;
            let state: FormState = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a form state", form.display()))?;
            let manifest = cbs_engine::form_to_manifest(&state.values);
            write_manifest(out, manifest, *format)?;
            Ok(true)
        }
        Command::Validate { manifest, testing_values } => {
            let manifest = read_manifest(manifest)?;
            let mut engine = SyncEngine::from_manifest(cli.engine_config(), &manifest)?;
            if let Some(path) = testing_values {
                let Value::Object(values) = read_manifest(path)? else {
                    bail!("{} must hold a JSON object", path.display());
                };
                for (key, value) in values {
                    engine.set_testing_value(&key, value);
                }
            }
            let report = engine.validation();
            tracing::info!("{} validation errors", report.error_count());
            write_json(out, &serde_json::to_value(&report.errors_by_path)?)?;
            Ok(report.is_valid())
        }
        Command::RenameInput {
            manifest,
            from,
            to,
            format,
        } => {
            let manifest = read_manifest(manifest)?;
            let mut engine = SyncEngine::from_manifest(cli.engine_config(), &manifest)?;
            let Some(mut input) = engine.values().input(from).cloned() else {
                bail!("no declared input '{from}'");
            };
            to.clone_into(&mut input.key);
            engine.update_input(from, input)?;
            write_manifest(out, engine.manifest().clone(), *format)?;
            Ok(true)
        }
        Command::Describe { path } => {
            let registry = cbs_schema::init(&cli.engine_config().schema_source)?;
            let descriptor = registry.describe(path);
            if descriptor.is_empty() {
                tracing::warn!("nothing documented at {}", path);
            }
            write_json(out, &serde_json::to_value(descriptor)?)?;
            Ok(true)
        }
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

fn read_manifest(path: &Path) -> Result<Value> {
    let text = read(path)?;
    let document = ManifestDocument::parse(&text).with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(document.into_value())
}

fn write_json(out: &mut impl Write, value: &Value) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_manifest(out: &mut impl Write, manifest: Value, format: OutputFormat) -> Result<()> {
    let document = ManifestDocument::new(manifest);
    let text = match format {
        OutputFormat::Json => document.to_json()?,
        OutputFormat::Yaml => document.to_yaml()?,
    };
    writeln!(out, "{text}")?;
    Ok(())
}
