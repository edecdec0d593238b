//! Sentinela CLI
//!
//! Batch entry points for the wafer fault-model lifecycle.
//!
//! # Usage
//!
//! ```bash
//! # Train on a directory of raw sensor files
//! sentinela train raw_data/ --config sentinela.yaml
//!
//! # Score a prediction batch with the current champion
//! sentinela predict incoming/ --config sentinela.yaml
//!
//! # Validate the configuration
//! sentinela validate --config sentinela.yaml
//!
//! # Show the promoted generations
//! sentinela slots --config sentinela.yaml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sentinela::pipeline::{PredictionPipeline, TrainingPipeline};
use sentinela::run::RunRegistry;
use sentinela::store::registry::{ModelRegistry, Slot};
use sentinela::store::LocalFsStore;
use sentinela::PipelineConfig;

#[derive(Parser)]
#[command(name = "sentinela", about = "Wafer sensor-fault model lifecycle", version)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "sentinela.yaml", global = true)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate, merge, and train on a directory of raw files.
    Train {
        /// Directory holding the raw sensor CSV files.
        inbox: PathBuf,
    },
    /// Score a directory of raw files with the current champion.
    Predict {
        /// Directory holding the raw sensor CSV files.
        inbox: PathBuf,
    },
    /// Check the configuration and schema files.
    Validate,
    /// Show which generation each slot points at.
    Slots,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Train { inbox } => run_train(&cli.config, &inbox),
        Command::Predict { inbox } => run_predict(&cli.config, &inbox),
        Command::Validate => run_validate(&cli.config),
        Command::Slots => run_slots(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &PathBuf) -> Result<PipelineConfig, String> {
    let config = PipelineConfig::load(path).map_err(|e| format!("Config error: {e}"))?;
    config
        .validate()
        .map_err(|e| format!("Config error: {e}"))?;
    Ok(config)
}

fn run_train(config_path: &PathBuf, inbox: &PathBuf) -> Result<(), String> {
    let config = load_config(config_path)?;
    let store = LocalFsStore::new(&config.store_root);
    let runs = RunRegistry::new();
    let report = TrainingPipeline::new(&config, &runs, &store)
        .run(inbox)
        .map_err(|e| format!("Training error: {e}"))?;

    println!("Run {} finished: {:?}", report.run_id, report.outcome);
    println!(
        "  Files: {} accepted, {} rejected",
        report.accepted_files, report.rejected_files
    );
    for (cluster, (family, auc)) in report.winners.iter().enumerate() {
        println!("  Cluster {cluster}: {family} (test AUC {auc:.4})");
    }
    match report.promoted_to {
        Some(slot) => println!("  Promoted to {}", slot.name()),
        None => println!("  Remote sync failed; artifacts kept locally"),
    }
    Ok(())
}

fn run_predict(config_path: &PathBuf, inbox: &PathBuf) -> Result<(), String> {
    let config = load_config(config_path)?;
    let store = LocalFsStore::new(&config.store_root);
    let runs = RunRegistry::new();
    let report = PredictionPipeline::new(&config, &runs, &store)
        .run(inbox)
        .map_err(|e| format!("Prediction error: {e}"))?;

    println!("Run {} finished: {:?}", report.run_id, report.outcome);
    println!(
        "  Files: {} accepted, {} rejected",
        report.accepted_files, report.rejected_files
    );
    println!("  Rows scored: {}", report.scored_rows);
    match report.drift {
        Some(verdict) if verdict.drift_detected => println!(
            "  Drift detected: {:.0}% of monitored columns shifted",
            verdict.share_of_drifted_columns * 100.0
        ),
        Some(_) => println!("  No drift detected"),
        None => println!("  Drift check skipped"),
    }
    Ok(())
}

fn run_validate(config_path: &PathBuf) -> Result<(), String> {
    let config = load_config(config_path)?;
    sentinela::validate::SchemaSpec::load(&config.schema_path)
        .map_err(|e| format!("Schema error: {e}"))?;
    println!("Configuration is valid");
    Ok(())
}

fn run_slots(config_path: &PathBuf) -> Result<(), String> {
    let config = load_config(config_path)?;
    let store = LocalFsStore::new(&config.store_root);
    let registry = ModelRegistry::new(&store);
    for slot in [Slot::Champion, Slot::Challenger] {
        match registry.current(slot).map_err(|e| e.to_string())? {
            Some(pointer) => println!(
                "{}: run {} (promoted {})",
                slot.name(),
                pointer.run_id,
                pointer.promoted_at
            ),
            None => println!("{}: empty", slot.name()),
        }
    }
    Ok(())
}
