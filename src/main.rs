use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use siamese_oneshot::logging::init_logging;
use siamese_oneshot::{select_device, Config, TrainerController, TrainingEvent};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "siamese")]
#[command(about = "Train and evaluate Siamese networks for one-shot recognition", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model, resuming from the latest checkpoint if the config asks for it
    Train {
        /// Configuration file path
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,
    },

    /// Evaluate a checkpoint on the held-out test trials
    Test {
        /// Configuration file path
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Use the best checkpoint
        #[arg(long, conflicts_with = "latest")]
        best: bool,

        /// Use the most recent checkpoint
        #[arg(long)]
        latest: bool,
    },

    /// Validate configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json)?;

    match cli.command {
        Commands::Train { config } => train(config).await?,
        Commands::Test {
            config,
            best,
            latest,
        } => {
            let choice = match (best, latest) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            test(config, choice).await?
        }
        Commands::Config { file } => validate_config(file)?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::from_file(path)
        .with_context(|| format!("Failed to load configuration file {}", path.display()))?;
    info!("Configuration loaded from {}", path.display());
    Ok(config)
}

async fn train(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let device = select_device(config.use_gpu)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_events(rx));

    let outcome = tokio::task::spawn_blocking(move || {
        let mut controller = TrainerController::new(config, device)?.with_event_monitoring(tx);
        controller.train()
    })
    .await
    .context("Training task panicked")?
    .context("Training failed")?;

    reporter.await.context("Event reporter panicked")?;
    info!(
        "Done: {} epochs ({:?}), best valid acc {:.3} @ epoch {}",
        outcome.epochs_run, outcome.stop_reason, outcome.best_score, outcome.best_epoch
    );
    Ok(())
}

async fn test(config_path: PathBuf, best: Option<bool>) -> Result<()> {
    let config = load_config(&config_path)?;
    let best = best.unwrap_or(config.best);
    let device = select_device(config.use_gpu)?;

    let report = tokio::task::spawn_blocking(move || {
        let mut controller = TrainerController::new(config, device)?;
        controller.test_checkpoint(best)
    })
    .await
    .context("Test task panicked")?
    .context("Test failed")?;

    println!(
        "Test Acc: {}/{} ({:.2}%)",
        report.correct,
        report.total,
        report.percentage()
    );
    Ok(())
}

fn validate_config(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    println!("Configuration is valid");
    println!("  Run: {}", config.num_model);
    println!("  Data: {}", config.data_dir.display());
    println!("  Checkpoints: {}", config.checkpoint_dir().display());
    println!("  Logs: {}", config.run_logs_dir().display());
    println!(
        "  Training: {} epochs, {} pairs per epoch in batches of {}, patience {}",
        config.epochs, config.num_train, config.batch_size, config.train_patience
    );
    println!(
        "  Evaluation: {}-way, {} validation / {} test trials",
        config.way, config.valid_trials, config.test_trials
    );
    Ok(())
}

async fn report_events(mut rx: mpsc::UnboundedReceiver<TrainingEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TrainingEvent::EpochStarted { epoch, total_epochs } => {
                debug!("epoch {}/{} started", epoch + 1, total_epochs)
            }
            TrainingEvent::BatchCompleted {
                global_step,
                loss,
                average_loss,
                ..
            } => debug!("step {global_step}: loss {loss:.4} (avg {average_loss:.4})"),
            TrainingEvent::ValidationCompleted { epoch, accuracy } => {
                debug!("epoch {epoch}: val acc {accuracy:.3}")
            }
            TrainingEvent::CheckpointSaved { path, is_best } => {
                info!("Saved {}{}", path.display(), if is_best { " (best)" } else { "" })
            }
            TrainingEvent::EarlyStopping {
                epoch,
                epochs_without_improvement,
            } => warn!("Early stop at epoch {epoch} after {epochs_without_improvement} epochs without improvement"),
            TrainingEvent::PhaseChanged { .. }
            | TrainingEvent::TrialEvaluated { .. }
            | TrainingEvent::EpochCompleted { .. }
            | TrainingEvent::TrainingCompleted { .. } => {}
        }
    }
}
