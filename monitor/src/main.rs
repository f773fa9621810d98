use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use trainwatch_monitor::{
    chart::{svg::render_panel, AxisHint, ChartProjector},
    client::{HttpBackend, TrainingBackend},
    config::{ChartConfig, MonitorConfig},
    control::TrainingControl,
    poller::{MonitorEvent, Notice, PollerHandle, StatusPoller},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/monitor.yaml")]
    config: String,

    /// Log level, overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Training server base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Keep polling while the backend is idle
    #[arg(long)]
    active: bool,

    /// Directory that receives loss.svg and reward.svg
    #[arg(long, value_name = "DIR")]
    charts: Option<PathBuf>,

    /// Start a run with the JSON training configuration in FILE
    #[arg(long, value_name = "FILE", conflicts_with = "stop")]
    start: Option<PathBuf>,

    /// Ask the server to stop the running job
    #[arg(long)]
    stop: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = MonitorConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    if let Some(base_url) = args.base_url {
        config.server.base_url = base_url;
    }
    if args.active {
        config.polling.start_active = true;
    }
    if let Some(dir) = args.charts {
        config.chart.output_dir = Some(dir);
    }
    config.validate().context("invalid configuration")?;

    // Initialize logging
    init_logging(args.log_level.as_deref().unwrap_or(&config.logging.level))?;

    info!("Starting trainwatch monitor for {}", config.server.base_url);

    let backend: Arc<dyn TrainingBackend> =
        Arc::new(HttpBackend::new(&config.server).context("failed to build HTTP client")?);
    let (poller, handle) = StatusPoller::new(backend.clone(), &config);
    let events_task = tokio::spawn(log_events(handle.subscribe_events()));
    let poller_task = poller.spawn();

    let render_task = config.chart.output_dir.clone().map(|dir| {
        info!("Writing charts to {}", dir.display());
        tokio::spawn(render_charts(handle.clone(), config.chart.clone(), dir))
    });

    // Failures are reported as notices through the event log.
    let control = TrainingControl::new(backend, handle.clone());
    if let Some(path) = &args.start {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let training_config: Value = serde_json::from_str(&raw)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let _ = control.start(&training_config).await;
    } else if args.stop {
        let _ = control.stop().await;
    }

    // Wait for shutdown signal
    wait_for_shutdown().await;

    info!("Shutting down trainwatch monitor");
    handle.shutdown();
    if let Err(e) = poller_task.await {
        error!("Status poller task failed: {}", e);
    }
    if let Some(task) = render_task {
        task.abort();
    }
    events_task.abort();
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))
}

async fn log_events(mut events: broadcast::Receiver<MonitorEvent>) {
    loop {
        match events.recv().await {
            Ok(MonitorEvent::TrainingStarted { job_id, status, .. }) => {
                info!("Training started: job {} ({})", job_label(job_id.as_ref()), status);
            }
            Ok(MonitorEvent::TrainingEnded {
                job_id,
                status,
                reason,
                message,
                ..
            }) => {
                info!(
                    ?reason,
                    "Training ended: job {} ({}) {}",
                    job_label(job_id.as_ref()),
                    status,
                    message.as_deref().unwrap_or("")
                );
            }
            Ok(MonitorEvent::JobChanged { previous, current }) => {
                info!("Job changed: {} -> {}", job_label(previous.as_ref()), current);
            }
            Ok(MonitorEvent::ConnectionLost { error }) => {
                warn!("Disconnected from training server: {}", error);
            }
            Ok(MonitorEvent::ConnectionRestored) => info!("Reconnected to training server"),
            Ok(MonitorEvent::Notice(Notice::Info(message))) => info!("{}", message),
            Ok(MonitorEvent::Notice(Notice::Error(message))) => error!("{}", message),
            Err(RecvError::Lagged(skipped)) => warn!("Event log fell behind, {} events skipped", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn job_label(job_id: Option<&trainwatch_common::JobId>) -> &str {
    job_id.map(|id| id.as_str()).unwrap_or("<none>")
}

/// Re-renders both panels on a fixed tick, independent of the poll cadence.
async fn render_charts(handle: PollerHandle, chart: ChartConfig, dir: PathBuf) {
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        error!("Cannot create chart directory {}: {}", dir.display(), e);
        return;
    }

    let projector = ChartProjector::new(&chart);
    let mut ticker = interval(chart.render_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rendered: Option<Option<DateTime<Utc>>> = None;

    loop {
        ticker.tick().await;
        let snapshot = handle.snapshot();
        if rendered == Some(snapshot.updated_at) {
            continue;
        }

        let dashboard =
            projector.project_dashboard(&snapshot.history, AxisHint::from_stats(&snapshot.stats));
        for panel in dashboard.panels() {
            let path = dir.join(panel.kind().file_name());
            if let Err(e) = tokio::fs::write(&path, render_panel(panel, projector.canvas())).await {
                warn!("Failed to write {}: {}", path.display(), e);
            }
        }
        debug!(points = snapshot.history.len(), "charts rendered");
        rendered = Some(snapshot.updated_at);
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
