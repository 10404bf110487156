use anyhow::{Context, Result};
use clap::Parser;
use inkfeed::config::{Config, DEFAULT_SETTINGS_PATH};
use inkfeed::events::{emit_run_events, HostEvent};
use inkfeed::gate::Cancellation;
use inkfeed::pipeline::{self, RunSummary, ServerOutcome};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "inkfeed",
    version,
    about = "Fetches RSS/Atom feeds and packages them as EPUB e-books"
)]
struct Args {
    /// Settings file
    #[arg(long, short, value_name = "FILE", default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Directory archives are written under
    #[arg(long, short, value_name = "DIR", default_value = "library")]
    output: PathBuf,

    /// Override `concurrent-requests` from the settings file
    #[arg(long, value_name = "N")]
    concurrent_requests: Option<usize>,

    /// Override `worker-count` from the settings file
    #[arg(long, value_name = "N")]
    worker_count: Option<usize>,

    /// Print JSON-lines host events on stdout instead of a text summary
    #[arg(long)]
    emit_events: bool,

    /// Library root that event paths are reported relative to (defaults to --output)
    #[arg(long, value_name = "DIR")]
    library: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is reserved for the summary or host events.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inkfeed=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let result = run(&args).await;
    if let Err(e) = &result {
        if args.emit_events {
            notify_host(&format!("Feed download failed: {e}"));
        }
    }
    result
}

async fn run(args: &Args) -> Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load settings from '{}'", args.config.display()))?;
    if let Some(n) = args.concurrent_requests {
        config.concurrent_requests = n;
    }
    if let Some(n) = args.worker_count {
        config.worker_count = n;
    }

    std::fs::create_dir_all(&args.output).with_context(|| {
        format!(
            "Failed to create output directory '{}'",
            args.output.display()
        )
    })?;

    let cancel = Cancellation::new();
    spawn_shutdown_listener(cancel.clone());

    let summary = pipeline::run(&config, &args.output, cancel)
        .await
        .context("Run could not start")?;

    if args.emit_events {
        let library = args.library.as_ref().unwrap_or(&args.output);
        let mut stdout = std::io::stdout().lock();
        emit_run_events(&mut stdout, &summary, library).context("Failed to write host events")?;
    } else {
        print_summary(&summary).context("Failed to write summary")?;
    }

    Ok(())
}

fn notify_host(message: &str) {
    if let Ok(line) = HostEvent::notify(message).to_json() {
        println!("{line}");
    }
}

/// Cancels the run on Ctrl-C, or SIGTERM on Unix.
fn spawn_shutdown_listener(cancel: Cancellation) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        tracing::warn!("Shutdown requested, cancelling in-flight requests");
        cancel.cancel();
    });
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_summary(summary: &RunSummary) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();

    for report in &summary.reports {
        let name = report.display_name();
        match &report.outcome {
            ServerOutcome::Succeeded | ServerOutcome::Partial { .. } => {
                let archive = report.archive.as_ref();
                let path = archive
                    .map(|a| a.path.display().to_string())
                    .unwrap_or_default();
                let chapters = archive.map_or(0, |a| a.chapters);
                let marker = if matches!(report.outcome, ServerOutcome::Succeeded) {
                    "ok     "
                } else {
                    "partial"
                };
                writeln!(out, "{marker} {name} -> {path} ({chapters} entries)")?;
                if let ServerOutcome::Partial { degradations } = &report.outcome {
                    for degradation in degradations {
                        writeln!(out, "          {degradation}")?;
                    }
                }
            }
            ServerOutcome::Failed { error } => writeln!(out, "failed  {name}: {error}")?,
            ServerOutcome::Skipped { reason } => writeln!(out, "skipped {name}: {reason}")?,
        }
    }

    writeln!(out, "{}", summary.headline())?;
    out.flush()
}
