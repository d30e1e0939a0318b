use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use op_tracker::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "op-watch", version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Cli {
    /// Platform API endpoint (overrides OPTRACK_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Poll interval in milliseconds (overrides OPTRACK_POLL_INTERVAL_MS)
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Follow an operation until it finishes
    #[command(alias = "w")]
    Watch {
        #[arg(value_enum)]
        kind: KindArg,
        id: String,
    },
    /// Start an operation and follow it
    #[command(alias = "t")]
    Trigger {
        #[arg(value_enum)]
        kind: KindArg,
        name: String,
        /// Backup to restore from, app to back up, ...
        #[arg(long)]
        target: Option<String>,
    },
    /// Abort a running operation
    #[command(alias = "c")]
    Cancel {
        #[arg(value_enum)]
        kind: KindArg,
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Backup,
    Restore,
    ImageRewrite,
    ProviderReconcile,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Backup => OperationKind::Backup,
            KindArg::Restore => OperationKind::Restore,
            KindArg::ImageRewrite => OperationKind::ImageRewrite,
            KindArg::ProviderReconcile => OperationKind::ProviderReconcile,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::from_env().context("invalid OPTRACK_* configuration")?;
    if let Some(url) = cli.base_url {
        config.base_url = url;
    }
    if let Some(ms) = cli.interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    config.validate()?;

    let poll_interval = config.poll_interval;
    let session = Arc::new(TokenSession::new(config.auth_token.clone()));
    let tracker = OperationTracker::new(config, session.clone())?;
    let mut events = tracker.subscribe();

    let id = match cli.cmd {
        Commands::Watch { kind, id } => {
            tracker.watch(kind.into(), &id)?;
            id
        }
        Commands::Trigger { kind, name, target } => {
            let mut request = TriggerRequest::new(name);
            if let Some(target) = target {
                request = request.with_target(target);
            }
            let id = tracker.trigger(kind.into(), request).await.context("trigger failed")?;
            println!("triggered {} {}", OperationKind::from(kind), id);
            id
        }
        Commands::Cancel { kind, id } => {
            tracker.watch(kind.into(), &id)?;

            match tracker.cancel(&id).await.context("cancel failed")? {
                CancelOutcome::Canceled(record) => println!("{}: {}", id, record.phase),
                CancelOutcome::AlreadyTerminal(record) => println!("{} already finished: {}", id, record.phase),
                CancelOutcome::AlreadyInFlight => println!("{}: cancel already requested", id),
            }
            tracker.shutdown();
            return Ok(());
        }
    };

    let mut last_line = String::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(record) if record.id == id => {
                    let line = ProgressAggregator::summarize(&record).status_line();
                    if line != last_line {
                        println!("{}: {}", id, line);
                        last_line = line;
                    }
                    if record.is_terminal() {
                        for message in record.display_messages() {
                            println!("  {}", message);
                        }
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status updates dropped"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(poll_interval * 2) => {
                if !tracker.is_watching(&id) {
                    break;
                }
                if let Some(failures) = tracker.consecutive_failures(&id).filter(|f| *f > 0) {
                    warn!(failures, "having trouble reaching the server");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, no longer watching {}", id);
                break;
            }
        }
    }

    tracker.shutdown();
    if !session.is_session_valid() {
        bail!("session expired");
    }
    Ok(())
}
