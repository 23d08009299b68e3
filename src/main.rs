use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use report_sieve::reader::is_spreadsheet;
use report_sieve::{run_import, RunOutcome, SieveConfig, SieveError};

#[derive(Parser)]
#[command(name = "report-sieve", version, about = "Classify and import transfer-report workbooks")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write per-label CSV files under this directory
    #[arg(long)]
    csv_dir: Option<PathBuf>,

    /// Import rows into this SQLite database
    #[arg(long)]
    database: Option<PathBuf>,

    /// Print the run summary as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Workbooks, or directories containing workbooks
    #[arg(required = true)]
    sources: Vec<PathBuf>,
}

/// Expands directories into their spreadsheet files, sorted by name.
fn collect_sources(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, SieveError> {
    let mut sources = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                .map_err(|e| SieveError::Config(format!("Cannot list {}: {e}", input.display())))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_spreadsheet(p))
                .collect();
            found.sort();
            sources.extend(found);
        } else {
            sources.push(input.clone());
        }
    }
    Ok(sources)
}

fn load_config(path: Option<&Path>, cli: &Cli) -> Result<SieveConfig, SieveError> {
    let mut config = match path {
        Some(path) => SieveConfig::read(path)?,
        None => SieveConfig::default(),
    };
    if let Some(dir) = &cli.csv_dir {
        config.output.csv_dir = Some(dir.clone());
    }
    if let Some(db) = &cli.database {
        config.store.database = Some(db.clone());
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = async {
        let config = load_config(cli.config.as_deref(), &cli)?;
        let sources = collect_sources(&cli.sources)?;
        run_import(config, sources).await
    }
    .await;

    match result {
        Ok(summary) => {
            if cli.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{json}"),
                    Err(e) => tracing::error!("Failed to serialize summary: {e}"),
                }
            }
            match summary.outcome {
                RunOutcome::Success => ExitCode::SUCCESS,
                RunOutcome::PartialSuccess => ExitCode::from(2),
                RunOutcome::Failed => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            tracing::error!(kind = %e.kind(), "{e}");
            ExitCode::FAILURE
        }
    }
}
