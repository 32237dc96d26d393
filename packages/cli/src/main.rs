#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the capeeco loader.
//!
//! ```text
//! capeeco_cli --step setup|load|index|intersect|all [--table <dataset>] [--resume-from <suburb>]
//! ```
//!
//! Uses `indicatif-log-bridge` (via [`capeeco_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress` so that log lines
//! and progress bars never fight for the terminal.

mod pipeline;

use std::path::{Path, PathBuf};
use std::str::FromStr as _;

use capeeco_database::db::DatabaseConfig;
use capeeco_dataset_models::Dataset;
use capeeco_dataset_models::config::{ConfigError, LoaderConfig};
use capeeco_spatial::partition::Partition;
use clap::{Parser, ValueEnum};

/// Pipeline step to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Step {
    /// Create the database, enable `PostGIS`, apply migrations
    Setup,
    /// Stage, validate and promote datasets
    Load,
    /// Create indexes and refresh planner statistics
    Index,
    /// Rebuild parcel overlap and urban edge tables
    Intersect,
    /// Setup, load, index and intersect in order
    All,
}

#[derive(Debug, Parser)]
#[command(name = "capeeco_cli", about = "Cape Town spatial data loader")]
struct Cli {
    /// Pipeline step to run
    #[arg(long, value_enum)]
    step: Step,

    /// Load a single dataset (e.g. `parcels`, `urban_edges`); only valid with `--step load`
    #[arg(long, value_parser = parse_dataset)]
    table: Option<Dataset>,

    /// TOML file overriding data directory, batch sizes and per-dataset CRS
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resume the overlap computation at this suburb without truncating
    #[arg(long)]
    resume_from: Option<String>,
}

impl Cli {
    /// Rejects flag combinations clap cannot express.
    fn validate(&self) -> Result<(), String> {
        if self.table.is_some() && self.step != Step::Load {
            return Err("--table can only be used with --step load".to_string());
        }
        if self.resume_from.is_some() && self.step != Step::Intersect {
            return Err("--resume-from can only be used with --step intersect".to_string());
        }
        Ok(())
    }

    fn resume_partition(&self) -> Option<Partition> {
        self.resume_from.as_deref().map(Partition::from_key)
    }
}

fn parse_dataset(s: &str) -> Result<Dataset, String> {
    Dataset::from_str(s).map_err(|_| {
        let names: Vec<String> = Dataset::ALL.iter().map(ToString::to_string).collect();
        format!("unknown dataset '{s}' (expected one of: {})", names.join(", "))
    })
}

/// Reads `path` (or the defaults) and applies the `CAPEECO_DATA_DIR`
/// override.
fn load_config(path: Option<&Path>, data_dir: Option<String>) -> Result<LoaderConfig, ConfigError> {
    let mut config = match path {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(dir) = data_dir.filter(|d| !d.trim().is_empty()) {
        config.data_dir = PathBuf::from(dir);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = capeeco_cli_utils::init_logger();
    let cli = Cli::parse();
    cli.validate()?;

    let config = load_config(cli.config.as_deref(), std::env::var("CAPEECO_DATA_DIR").ok())?;
    let db_config = DatabaseConfig::from_env();

    let datasets = cli.table.map_or_else(|| Dataset::ALL.to_vec(), |d| vec![d]);
    let resume_from = cli.resume_partition();

    match cli.step {
        Step::Setup => pipeline::setup(&db_config).await?,
        Step::Load => pipeline::load(&multi, &db_config, &config, &datasets).await?,
        Step::Index => pipeline::index(&multi, &db_config).await?,
        Step::Intersect => pipeline::intersect(&multi, &db_config, &config, resume_from).await?,
        Step::All => pipeline::all(&multi, &db_config, &config).await?,
    }

    Ok(())
}
