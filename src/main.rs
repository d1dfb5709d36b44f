use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nvd_mirror::config::Config;
use nvd_mirror::store::SqliteStore;
use nvd_mirror::update::MainUpdater;

#[derive(Parser)]
#[command(name = "nvd-mirror")]
#[command(about = "Local mirror of NVD vulnerability intelligence", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Incrementally update sources (all of them by default)
    Update {
        /// Source names to update (cpe, cve, cwe, capec, epss)
        sources: Vec<String>,
    },
    /// Rebuild sources from scratch
    Populate {
        /// Source names to populate (cpe, cve, cwe, capec, epss)
        sources: Vec<String>,
    },
    /// Set up a fresh mirror: full populate followed by a full update
    Initialize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error loading configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let updater = match build_updater(config) {
        Ok(updater) => updater,
        Err(err) => {
            eprintln!("Error opening the mirror store: {err}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Commands::Update { sources } => updater.update(source_filter(&sources)).await,
        Commands::Populate { sources } => updater.populate(source_filter(&sources)).await,
        Commands::Initialize => updater.initialize().await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::from_env()),
    }
}

fn build_updater(config: Config) -> anyhow::Result<MainUpdater<SqliteStore>> {
    let store = Arc::new(SqliteStore::open(&config.store)?);
    MainUpdater::new(store, config)
}

fn source_filter(sources: &[String]) -> Option<&[String]> {
    if sources.is_empty() {
        None
    } else {
        Some(sources)
    }
}
