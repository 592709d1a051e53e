//! source-mapper CLI - manage System Models and bank Mappings, test-run mappings
//!
//! JSON files in, pretty JSON out on stdout. Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use source_mapper::{
    db, AppConfig, CsvHeaderProvider, FieldSetProvider, Mapping, MappingStore, SchemaRegistry,
    StoreError, SystemModel, TestRunner,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ACTOR: &str = "cli";

#[derive(Parser)]
#[command(name = "source-mapper")]
#[command(version, about = "Map bank source files onto standardized system models", long_about = None)]
struct Cli {
    /// Config file (default: ./source-mapper.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override database.path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage System Models
    Models {
        #[command(subcommand)]
        action: ModelsCommand,
    },

    /// Manage bank Mappings
    Mappings {
        #[command(subcommand)]
        action: MappingsCommand,
    },

    /// Run a stored mapping against a JSON record, a JSON array of records, or a CSV file
    Test {
        mapping_id: String,
        input: PathBuf,
    },

    /// Derive a source field set from a CSV header row
    InferFields {
        csv: PathBuf,

        /// Column delimiter
        #[arg(short, long, default_value_t = ',')]
        delimiter: char,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ModelsCommand {
    List,
    Show { id: String },
    /// Create or update models from a JSON file (one model or an array)
    Import { file: PathBuf },
    Delete { id: String },
    /// Add the built-in models that are missing
    Seed,
}

#[derive(Subcommand)]
enum MappingsCommand {
    List {
        #[arg(long)]
        bank: Option<String>,
    },
    Show { id: String },
    /// Create or update mappings from a JSON file (one mapping or an array)
    Import { file: PathBuf },
    Delete { id: String },
    /// Report mappings whose references a model no longer satisfies
    Revalidate { model_id: String },
}

/// Loaded state: database plus hydrated registry and store
struct App {
    conn: Connection,
    registry: Arc<SchemaRegistry>,
    store: MappingStore,
    config: AppConfig,
}

impl App {
    fn open(config: AppConfig) -> Result<Self> {
        let conn = db::open_database(&config.database.path, config.database.wal)?;

        let registry = Arc::new(SchemaRegistry::new());
        registry.load(db::list_system_models(&conn)?);
        if config.registry.seed_defaults {
            for model in registry.seed_defaults() {
                db::upsert_system_model(&conn, &model, ACTOR)?;
            }
        }

        let store = MappingStore::new(registry.clone());
        store.load(db::list_mappings(&conn)?);

        info!(
            models = registry.count(),
            mappings = store.count(),
            "Loaded {}",
            config.database.path.display()
        );
        Ok(App {
            conn,
            registry,
            store,
            config,
        })
    }

    fn runner(&self) -> TestRunner {
        TestRunner::new(self.registry.clone()).fail_on_drift(self.config.runner.fail_on_drift)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    setup_logging(&config.logging.filter);

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
            Ok(())
        }
        Commands::InferFields { csv, delimiter } => infer_fields(&csv, delimiter),
        Commands::Models { action } => run_models(&App::open(config)?, action),
        Commands::Mappings { action } => run_mappings(&App::open(config)?, action),
        Commands::Test { mapping_id, input } => run_test(&App::open(config)?, &mapping_id, &input),
    }
}

fn setup_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_models(app: &App, action: ModelsCommand) -> Result<()> {
    match action {
        ModelsCommand::List => print_json(&app.registry.list()),
        ModelsCommand::Show { id } => match app.registry.get(&id) {
            Some(model) => print_json(&model),
            None => bail!("System model not found: {}", id),
        },
        ModelsCommand::Import { file } => {
            let mut saved = Vec::new();
            for model in read_one_or_many::<SystemModel>(&file)? {
                let result = if !model.id.is_empty() && app.registry.get(&model.id).is_some() {
                    let id = model.id.clone();
                    app.registry.update(&id, model)
                } else {
                    app.registry.create(model)
                };
                let model = check(result)?;
                db::upsert_system_model(&app.conn, &model, ACTOR)?;

                let stale = app.store.revalidate_against(&model.id);
                if !stale.is_empty() {
                    warn!(model = %model.id, "{} mapping(s) no longer match this model", stale.len());
                }
                saved.push(model);
            }
            print_json(&saved)
        }
        ModelsCommand::Delete { id } => {
            let removed = check(app.registry.delete(&id))?;
            db::delete_system_model(&app.conn, &id, ACTOR)?;

            let orphaned = app.store.revalidate_against(&id);
            if !orphaned.is_empty() {
                warn!(model = %id, "{} mapping(s) still reference the deleted model", orphaned.len());
            }
            print_json(&removed)
        }
        ModelsCommand::Seed => {
            let seeded = app.registry.seed_defaults();
            for model in &seeded {
                db::upsert_system_model(&app.conn, model, ACTOR)?;
            }
            print_json(&seeded)
        }
    }
}

fn run_mappings(app: &App, action: MappingsCommand) -> Result<()> {
    match action {
        MappingsCommand::List { bank } => match bank {
            Some(bank) => print_json(&app.store.list_by_bank(&bank)),
            None => print_json(&app.store.list()),
        },
        MappingsCommand::Show { id } => match app.store.get(&id) {
            Some(mapping) => print_json(&mapping),
            None => bail!("Mapping not found: {}", id),
        },
        MappingsCommand::Import { file } => {
            let mut saved = Vec::new();
            for mapping in read_one_or_many::<Mapping>(&file)? {
                let result = if !mapping.id.is_empty() && app.store.get(&mapping.id).is_some() {
                    let id = mapping.id.clone();
                    app.store.update(&id, mapping)
                } else {
                    app.store.create(mapping)
                };
                let mapping = check(result)?;
                db::upsert_mapping(&app.conn, &mapping, ACTOR)?;
                saved.push(mapping);
            }
            print_json(&saved)
        }
        MappingsCommand::Delete { id } => {
            let removed = check(app.store.delete(&id))?;
            db::delete_mapping(&app.conn, &id, ACTOR)?;
            print_json(&removed)
        }
        MappingsCommand::Revalidate { model_id } => {
            let stale: Vec<Value> = app
                .store
                .revalidate_against(&model_id)
                .into_iter()
                .map(|s| {
                    serde_json::json!({
                        "mapping_id": s.mapping_id,
                        "mapping_name": s.mapping_name,
                        "errors": s.error.errors,
                    })
                })
                .collect();
            print_json(&stale)
        }
    }
}

fn run_test(app: &App, mapping_id: &str, input: &Path) -> Result<()> {
    let mapping = app
        .store
        .get(mapping_id)
        .with_context(|| format!("Mapping not found: {}", mapping_id))?;
    let runner = app.runner();

    let records = if input.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
        Value::Array(CsvHeaderProvider::new().read_records(input)?)
    } else {
        read_json::<Value>(input)?
    };

    match records {
        Value::Array(records) => {
            let mut results = Vec::with_capacity(records.len());
            for result in runner.run_batch(&mapping, &records)? {
                results.push(result?);
            }
            print_json(&results)
        }
        record => print_json(&runner.run(&mapping, &record)?),
    }
}

fn infer_fields(csv: &Path, delimiter: char) -> Result<()> {
    if !delimiter.is_ascii() {
        bail!("Delimiter must be a single ASCII character");
    }
    let provider = CsvHeaderProvider::new().with_delimiter(delimiter as u8);
    print_json(&provider.infer_fields(csv)?)
}

// ============================================================================
// HELPERS
// ============================================================================

/// Surface validation sub-errors as JSON before failing
fn check<T>(result: Result<T, StoreError>) -> Result<T> {
    result.map_err(|e| {
        if let Some(validation) = e.validation() {
            if let Ok(json) = serde_json::to_string_pretty(validation) {
                eprintln!("{}", json);
            }
        }
        e.into()
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn read_one_or_many<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    match read_json::<Value>(path)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).with_context(|| format!("Invalid entry in {}", path.display())))
            .collect(),
        item => Ok(vec![serde_json::from_value(item)
            .with_context(|| format!("Invalid entry in {}", path.display()))?]),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
