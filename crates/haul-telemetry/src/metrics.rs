//! Prometheus-backed transfer metrics.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Labels are restricted to backend names and fixed outcome strings so
//!   cardinality stays bounded.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// How a transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Payload delivered.
    Finished,
    /// Backend or controller failure.
    Failed,
    /// Caller cancelled.
    Cancelled,
}

impl TransferOutcome {
    const fn label(self) -> &'static str {
        match self {
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Metrics registry shared by the transfer runtime.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    transfers_started_total: IntCounterVec,
    transfers_finished_total: IntCounterVec,
    backend_retries_total: IntCounterVec,
    poll_errors_total: IntCounterVec,
    events_emitted_total: IntCounterVec,
    report_failures_total: IntCounter,
    report_throttled_total: IntCounter,
    active_transfers: IntGauge,
}

/// Point-in-time view of the headline gauges and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Transfers currently registered.
    pub active_transfers: i64,
    /// Progress reports dropped after exhausting retries.
    pub report_failures_total: u64,
    /// Emissions deferred because the reporter signalled a rate limit.
    pub report_throttled_total: u64,
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

impl Metrics {
    /// Construct a registry with the transfer collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built
    /// or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("haul".into()), None)
            .map_err(|source| TelemetryError::MetricsCollector {
                name: "registry",
                source,
            })?;

        let transfers_started_total = counter_vec(
            "transfers_started_total",
            "Transfers admitted by backend",
            &["backend"],
        )?;
        let transfers_finished_total = counter_vec(
            "transfers_finished_total",
            "Transfers that reached a terminal phase",
            &["backend", "outcome"],
        )?;
        let backend_retries_total = counter_vec(
            "backend_retries_total",
            "Transient backend failures retried with backoff",
            &["backend", "operation"],
        )?;
        let poll_errors_total = counter_vec(
            "poll_errors_total",
            "Status queries that failed",
            &["backend"],
        )?;
        let events_emitted_total = counter_vec(
            "events_emitted_total",
            "Transfer events published by type",
            &["type"],
        )?;
        let report_failures_total = IntCounter::with_opts(Opts::new(
            "report_failures_total",
            "Progress reports dropped after exhausting retries",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "report_failures_total",
            source,
        })?;
        let report_throttled_total = IntCounter::with_opts(Opts::new(
            "report_throttled_total",
            "Emissions deferred because the reporter was rate limited",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "report_throttled_total",
            source,
        })?;
        let active_transfers = IntGauge::with_opts(Opts::new(
            "active_transfers",
            "Transfers currently registered",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "active_transfers",
            source,
        })?;

        register(&registry, "transfers_started_total", &transfers_started_total)?;
        register(&registry, "transfers_finished_total", &transfers_finished_total)?;
        register(&registry, "backend_retries_total", &backend_retries_total)?;
        register(&registry, "poll_errors_total", &poll_errors_total)?;
        register(&registry, "events_emitted_total", &events_emitted_total)?;
        register(&registry, "report_failures_total", &report_failures_total)?;
        register(&registry, "report_throttled_total", &report_throttled_total)?;
        register(&registry, "active_transfers", &active_transfers)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                transfers_started_total,
                transfers_finished_total,
                backend_retries_total,
                poll_errors_total,
                events_emitted_total,
                report_failures_total,
                report_throttled_total,
                active_transfers,
            }),
        })
    }

    /// Count a transfer admitted for `backend`.
    pub fn inc_started(&self, backend: &str) {
        self.inner
            .transfers_started_total
            .with_label_values(&[backend])
            .inc();
    }

    /// Count a transfer reaching a terminal phase.
    pub fn inc_finished(&self, backend: &str, outcome: TransferOutcome) {
        self.inner
            .transfers_finished_total
            .with_label_values(&[backend, outcome.label()])
            .inc();
    }

    /// Count a transient failure that will be retried.
    pub fn inc_retry(&self, backend: &str, operation: &str) {
        self.inner
            .backend_retries_total
            .with_label_values(&[backend, operation])
            .inc();
    }

    /// Count a failed status query.
    pub fn inc_poll_error(&self, backend: &str) {
        self.inner
            .poll_errors_total
            .with_label_values(&[backend])
            .inc();
    }

    /// Count a published event by kind.
    pub fn inc_event(&self, kind: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count a progress report abandoned after retries.
    pub fn inc_report_failure(&self) {
        self.inner.report_failures_total.inc();
    }

    /// Count an emission deferred by a reporter rate limit.
    pub fn inc_report_throttled(&self) {
        self.inner.report_throttled_total.inc();
    }

    /// Set the active transfer gauge.
    pub fn set_active_transfers(&self, count: usize) {
        self.inner
            .active_transfers
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or the buffer is not
    /// valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the headline values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_transfers: self.inner.active_transfers.get(),
            report_failures_total: self.inner.report_failures_total.get(),
            report_throttled_total: self.inner.report_throttled_total.get(),
        }
    }
}
