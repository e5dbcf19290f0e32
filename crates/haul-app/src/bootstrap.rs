//! Wiring from configuration to a running transfer service.

use std::path::Path;
use std::sync::Arc;

use haul_backends::{NativeAdapter, RemoteAdapter, TorrentAdapter};
use haul_config::{HaulConfig, LogOutput, LoggingSettings};
use haul_core::{ProgressReporter, TransferPhase, TransferStatus};
use haul_events::{Event, EventBus};
use haul_runtime::{
    EventBusReporter, FanoutReporter, ThrottledReporter, TracingReporter, TransferService,
};
use haul_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, build_sha};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::cli::FetchArgs;
use crate::console::ConsoleRenderer;
use crate::error::{AppError, AppResult};

/// Everything a command needs to drive transfers.
pub struct App {
    /// Loaded configuration.
    pub config: HaulConfig,
    /// Transfer service with every backend attached.
    pub service: TransferService,
    /// Lifecycle event bus.
    pub events: EventBus,
    /// Metrics registry shared by the runtime.
    pub metrics: Metrics,
}

/// Map the configured log output onto a subscriber format.
#[must_use]
pub const fn log_format(output: LogOutput) -> LogFormat {
    match output {
        LogOutput::Auto => LogFormat::infer(),
        LogOutput::Pretty => LogFormat::Pretty,
        LogOutput::Json => LogFormat::Json,
    }
}

/// Subscriber settings derived from the logging section.
#[must_use]
pub fn logging_config(settings: &LoggingSettings) -> LoggingConfig<'_> {
    LoggingConfig {
        level: &settings.level,
        format: log_format(settings.format),
        build_sha: build_sha(),
    }
}

/// Load configuration from `path` (if any) plus `HAUL_*` overrides.
///
/// # Errors
///
/// Returns [`AppError::Config`] when the file cannot be read or a value is invalid.
pub fn load_config(path: Option<&Path>) -> AppResult<HaulConfig> {
    HaulConfig::load(path).map_err(|err| AppError::config("config.load", err))
}

/// Build adapters, reporters, and the transfer service from `config`.
///
/// # Errors
///
/// Returns an error if metrics registration or any adapter construction fails.
pub fn build(config: HaulConfig) -> AppResult<App> {
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("metrics.new", err))?;
    let events = EventBus::new();

    let native = NativeAdapter::new(&config.native)
        .map_err(|err| AppError::transfer("native.new", err))?;
    let torrent = TorrentAdapter::new(&config.torrent)
        .map_err(|err| AppError::transfer("torrent.new", err))?;
    let remote = RemoteAdapter::new(&config.remote)
        .map_err(|err| AppError::transfer("remote.new", err))?;

    let sinks = FanoutReporter::new()
        .with(Arc::new(EventBusReporter::new(events.clone(), metrics.clone())))
        .with(Arc::new(TracingReporter));
    let reporter: Arc<dyn ProgressReporter> = Arc::new(ThrottledReporter::new(
        Arc::new(sinks),
        config.controller.report_interval,
    ));

    let service = TransferService::new(config.controller.clone(), reporter, metrics.clone())
        .with_events(events.clone())
        .with_adapter(Arc::new(native))
        .with_adapter(Arc::new(torrent))
        .with_adapter(Arc::new(remote));

    Ok(App {
        config,
        service,
        events,
        metrics,
    })
}

/// Run `haul fetch`: start one transfer, print its progress, and return its final status.
///
/// Ctrl-C cancels the transfer and waits for cleanup before returning.
///
/// # Errors
///
/// Returns an error if configuration, logging, or transfer admission fails.
pub async fn run_fetch(
    config_path: Option<&Path>,
    args: &FetchArgs,
) -> AppResult<TransferStatus> {
    let config = load_config(config_path)?;
    haul_telemetry::init_logging(&logging_config(&config.logging))
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = GlobalContextGuard::new("fetch");

    let app = build(config)?;
    let request = args.to_request(&app.config.download_root)?;
    let mut stream = app.events.subscribe(None);
    let transfer_id = app
        .service
        .start_transfer(request)
        .map_err(|err| AppError::transfer("service.start_transfer", err))?;
    info!(transfer_id = %transfer_id, "fetch started");

    let watched = transfer_id.as_uuid();
    let printer = tokio::spawn(async move {
        let mut renderer = ConsoleRenderer::new(watched);
        while let Some(envelope) = stream.next().await {
            if let Some(line) = renderer.render(&envelope.event) {
                println!("{line}");
            }
            if matches!(envelope.event, Event::Removed { transfer_id } if transfer_id == watched) {
                break;
            }
        }
    });

    let status = tokio::select! {
        status = app.service.wait(transfer_id) => status,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| AppError::io("signal.ctrl_c", err))?;
            warn!(transfer_id = %transfer_id, "interrupt received; cancelling");
            if let Err(err) = app.service.cancel_transfer(transfer_id) {
                debug!(error = %err, "transfer already finished");
            }
            app.service.wait(transfer_id).await
        }
    }
    .map_err(|err| AppError::transfer("service.wait", err))?;

    app.service.shutdown().await;
    if let Err(err) = printer.await {
        warn!(error = %err, "progress printer ended abnormally");
    }
    match app.metrics.render() {
        Ok(rendered) => debug!(metrics = %rendered, "final metrics"),
        Err(err) => debug!(error = %err, "metrics render failed"),
    }
    Ok(status)
}

/// Process exit code for a terminal phase.
#[must_use]
pub const fn exit_code(phase: TransferPhase) -> u8 {
    match phase {
        TransferPhase::Finished => 0,
        TransferPhase::Cancelled => 130,
        TransferPhase::Pending | TransferPhase::Running | TransferPhase::Failed => 1,
    }
}
