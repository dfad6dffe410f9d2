//! CLI entry point for the harvester tool.

use std::io::{self, BufRead, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use harvest_core::{HarvestConfig, HarvestCoordinator, ManifestProducer, RunSummary};
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};

mod cli;
mod progress;

use cli::Args;

/// Where manifest lines come from.
enum InputSource {
    Inline(Vec<String>),
    File(std::fs::File),
    Stdin,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let source = match input_source(&args) {
        Ok(Some(source)) => source,
        Ok(None) => {
            info!("No input provided. Pipe URLs or manifest lines via stdin or pass them as args.");
            info!("Example: echo 'https://example.com/photo.jpg' | harvester -o media");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    let coordinator = match start(&args) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    let summary = run(&args, coordinator, source).await;
    if !args.quiet {
        println!("{summary}");
        if summary.retried > 0 || summary.cancelled > 0 {
            println!(
                "retried {} | cancelled {}",
                summary.retried, summary.cancelled
            );
        }
    }

    if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn input_source(args: &Args) -> Result<Option<InputSource>> {
    let source = if !args.inputs.is_empty() {
        Some(InputSource::Inline(args.inputs.clone()))
    } else if let Some(path) = &args.input {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open input file {}", path.display()))?;
        Some(InputSource::File(file))
    } else if !io::stdin().is_terminal() {
        Some(InputSource::Stdin)
    } else {
        None
    };
    Ok(source)
}

/// Resolves configuration and prepares the destination.
fn start(args: &Args) -> Result<HarvestCoordinator> {
    let mut config = match &args.config {
        Some(path) => HarvestConfig::load(path)?,
        None => match HarvestConfig::load_default()? {
            Some((path, config)) => {
                debug!(path = %path.display(), "loaded default config");
                config
            }
            None => HarvestConfig::default(),
        },
    };
    args.apply_to(&mut config);

    let coordinator = HarvestCoordinator::start(&config).context("cannot start run")?;
    info!(destination = %config.destination_dir.display(), "Harvester starting");
    Ok(coordinator)
}

async fn run(args: &Args, coordinator: HarvestCoordinator, source: InputSource) -> RunSummary {
    let ctrl_c = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                coordinator.cancel();
            }
        })
    };

    let (progress, stop) = progress::spawn_progress_ui(
        !args.quiet,
        io::stderr().is_terminal(),
        coordinator.clone(),
    );

    let producer = {
        let producer = ManifestProducer::new(coordinator.clone());
        tokio::spawn(async move {
            let outcome = match source {
                InputSource::Inline(lines) => Ok(producer.run(lines).await),
                InputSource::Stdin => Ok(producer.run_receiver(spawn_stdin_reader()).await),
                InputSource::File(file) => {
                    let file = tokio::fs::File::from_std(file);
                    producer.run_reader(BufReader::new(file)).await
                }
            };
            if let Err(e) = outcome {
                error!(error = %e, "reading input failed");
            }
        })
    };

    let summary = coordinator.wait_finished().await;

    stop.store(true, std::sync::atomic::Ordering::SeqCst);
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    // A cancelled run may leave the producer waiting on input.
    producer.abort();
    if let Err(e) = producer.await
        && e.is_panic()
    {
        warn!(error = %e, "producer task panicked");
    }
    ctrl_c.abort();

    summary
}

/// Reads stdin on a plain thread so a blocked read cannot hold up runtime
/// shutdown after an interrupt.
fn spawn_stdin_reader() -> tokio::sync::mpsc::Receiver<String> {
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "reading stdin failed");
                    break;
                }
            }
        }
    });
    rx
}
