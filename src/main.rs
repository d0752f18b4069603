use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use deedflow::config::{self, Settings};
use deedflow::pipeline::deed::{BatchMode, DeedProcessingService};
use deedflow::pipeline::engine::{RunHandle, RunStats, RunSummary, StageStatus};

#[derive(Parser)]
#[command(name = "deedflow")]
#[command(about = "Batch OCR and structured extraction for scanned sale deeds")]
#[command(version)]
struct Cli {
    /// Data directory holding the pipeline folders (overrides DEEDFLOW_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the PDFs waiting in newly_uploaded/
    Process {
        /// Run every step in one worker pool instead of the OCR/model pipeline
        #[arg(long)]
        legacy: bool,
        /// Process at most this many documents
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Read missing registration fees from the images in left_over_reg_fee/
    ResolveFees,
    /// Move quarantined PDFs from failed/ back to newly_uploaded/
    RequeueFailed,
    /// Write the quarantined PDFs into a .tar.gz archive
    BundleFailed {
        output: PathBuf,
    },
    /// Show how many files each pipeline folder holds
    Folders,
    /// Print the stored record of one deed as JSON
    Show {
        document_id: String,
    },
    /// Print the effective configuration as JSON
    Config,
}

const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    deedflow::init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::from_env()?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }
    tracing::info!(
        version = config::APP_VERSION,
        data_dir = %settings.data_dir.display(),
        "deedflow starting"
    );

    if let Commands::Config = cli.command {
        return print_json(&settings);
    }

    let service = DeedProcessingService::from_settings(settings)?;

    match cli.command {
        Commands::Process { legacy, limit } => {
            let mode = if legacy {
                BatchMode::Legacy
            } else {
                BatchMode::Pipeline
            };
            if let Err(e) = service.check_connection() {
                tracing::warn!(error = %e, "Model server check failed; documents may fail");
            }
            let handle = service.start_batch(mode, limit)?;
            let summary = monitor(handle, || service.batch_stats())?;
            report(&summary);
        }
        Commands::ResolveFees => {
            let handle = service.start_vision()?;
            let summary = monitor(handle, || service.vision_stats())?;
            report(&summary);
        }
        Commands::RequeueFailed => {
            let moved = service.requeue_failed()?;
            println!("Requeued {moved} document(s)");
        }
        Commands::BundleFailed { output } => {
            let count = service.bundle_failed(&output)?;
            println!("Bundled {count} document(s) into {}", output.display());
        }
        Commands::Folders => {
            for folder in service.folder_stats() {
                println!("{:<20} {:>6}  {}", folder.name, folder.files, folder.path.display());
            }
        }
        Commands::Show { document_id } => match service.get_deed(&document_id)? {
            Some(record) => print_json(&record)?,
            None => {
                eprintln!("No deed stored for {document_id}");
                std::process::exit(1);
            }
        },
        Commands::Config => {}
    }

    Ok(())
}

/// Log progress until the run finishes, then return its summary.
fn monitor<P>(
    handle: RunHandle<P>,
    stats: impl Fn() -> RunStats,
) -> Result<RunSummary<P>, Box<dyn std::error::Error>> {
    let mut last = None;
    while !handle.is_finished() {
        let snapshot = stats();
        let progress = (snapshot.processed, snapshot.active_total(), snapshot.queued.clone());
        if last.as_ref() != Some(&progress) {
            tracing::info!(
                processed = snapshot.processed,
                total = snapshot.total,
                successful = snapshot.successful,
                failed = snapshot.failed,
                stopped = snapshot.stopped,
                active = snapshot.active_total(),
                queued = ?snapshot.queued,
                current = snapshot.current_item.as_deref().unwrap_or("-"),
                "Progress"
            );
            last = Some(progress);
        }
        thread::sleep(MONITOR_INTERVAL);
    }
    Ok(handle.wait()?)
}

fn report<P>(summary: &RunSummary<P>) {
    println!(
        "Run {}: {} item(s) in {} ms, {} succeeded, {} failed, {} stopped",
        summary.run_id,
        summary.total,
        summary.duration_ms,
        summary.successful,
        summary.failed,
        summary.stopped
    );
    for result in summary.with_status(StageStatus::Failed) {
        println!(
            "  failed  {} [{}]: {}",
            result.item.id,
            result.stage,
            result.error.as_deref().unwrap_or("")
        );
    }
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
