//! Logging and metrics for devinfo.
//!
//! [`init`] installs the process-wide `tracing` subscriber. [`MetricsRecorder`]
//! is the seam the client reports call metrics through; [`NoopMetricsRecorder`]
//! is the default and a Prometheus recorder is available behind the
//! `prometheus` feature.

use std::fmt;

use time::format_description::{self, OwnedFormatItem};
use time::UtcOffset;
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::prelude::*;

#[cfg(feature = "prometheus")]
pub use crate::prometheus_impl::PrometheusMetricsRecorder;

/// Telemetry failures.
///
/// Kept independent of `devinfo-core` so the crate has no domain dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// A log level or filter expression did not parse.
    InvalidLevel(String),

    /// The global subscriber could not be installed.
    SubscriberInit(String),

    /// A metric could not be created, registered or encoded.
    Metrics(String),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, detail) = match self {
            Self::InvalidLevel(detail) => ("invalid log level", detail),
            Self::SubscriberInit(detail) => ("cannot install log subscriber", detail),
            Self::Metrics(detail) => ("metrics error", detail),
        };
        write!(f, "{}: {}", what, detail)
    }
}

impl std::error::Error for TelemetryError {}

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Interface for recording call-level metrics.
///
/// Labels are plain strings so that this crate stays independent of the
/// client's domain types:
///
/// - `endpoint`: the service authority, e.g. `10.0.0.5:50051`.
/// - `outcome`: `succeeded` or the failure kind (`timeout`, `no_data`, ...).
pub trait MetricsRecorder: Send + Sync + 'static {
    /// Record that a call has been issued.
    fn record_call_start(&self, endpoint: &str);

    /// Record that a call has reached its terminal outcome.
    fn record_call_end(&self, endpoint: &str, outcome: &str, latency_secs: Option<f64>);

    /// Record an error that is not tied to a single call outcome
    /// (e.g. `connect`, `discarded_signal`).
    fn record_error(&self, endpoint: Option<&str>, kind: &str);

    /// Record the current number of in-flight calls.
    fn set_in_flight(&self, count: u64);
}

/// A no-op metrics recorder that does nothing.
#[derive(Debug, Clone, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn record_call_start(&self, _endpoint: &str) {}

    fn record_call_end(&self, _endpoint: &str, _outcome: &str, _latency_secs: Option<f64>) {}

    fn record_error(&self, _endpoint: Option<&str>, _kind: &str) {}

    fn set_in_flight(&self, _count: u64) {}
}

#[cfg(feature = "prometheus")]
pub mod prometheus_impl {
    use super::*;

    use prometheus::core::Collector;
    use prometheus::{
        Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
    };

    const NAMESPACE: &str = "devinfo";

    fn metrics_err(err: prometheus::Error) -> TelemetryError {
        TelemetryError::Metrics(err.to_string())
    }

    fn register<C>(registry: &Registry, collector: prometheus::Result<C>) -> Result<C>
    where
        C: Collector + Clone + 'static,
    {
        let collector = collector.map_err(metrics_err)?;
        registry
            .register(Box::new(collector.clone()))
            .map_err(metrics_err)?;
        Ok(collector)
    }

    /// Records call metrics into its own Prometheus registry.
    #[derive(Clone)]
    pub struct PrometheusMetricsRecorder {
        registry: Registry,
        calls_total: IntCounterVec,
        call_latency_seconds: HistogramVec,
        in_flight: IntGauge,
        errors_total: IntCounterVec,
    }

    impl PrometheusMetricsRecorder {
        pub fn try_new() -> Result<Self> {
            let registry = Registry::new();
            let opts = |name: &str, help: &str| Opts::new(name, help).namespace(NAMESPACE);

            let calls_total = register(
                &registry,
                IntCounterVec::new(
                    opts("calls_total", "Device calls that reached a terminal outcome"),
                    &["endpoint", "outcome"],
                ),
            )?;
            let call_latency_seconds = register(
                &registry,
                HistogramVec::new(
                    HistogramOpts::from(opts(
                        "call_latency_seconds",
                        "Time from issuing a device call to its outcome",
                    )),
                    &["endpoint"],
                ),
            )?;
            let in_flight = register(
                &registry,
                IntGauge::with_opts(opts("in_flight_calls", "Device calls currently in flight")),
            )?;
            let errors_total = register(
                &registry,
                IntCounterVec::new(
                    opts("errors_total", "Client-side errors by kind"),
                    &["endpoint", "kind"],
                ),
            )?;

            Ok(Self {
                registry,
                calls_total,
                call_latency_seconds,
                in_flight,
                errors_total,
            })
        }

        /// Access the underlying Prometheus registry.
        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        /// Encode all metrics in the Prometheus text exposition format.
        pub fn render(&self) -> Result<String> {
            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            encoder
                .encode(&self.registry.gather(), &mut buffer)
                .map_err(metrics_err)?;
            String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
        }
    }

    impl MetricsRecorder for PrometheusMetricsRecorder {
        fn record_call_start(&self, _endpoint: &str) {
            // in_flight is maintained by the caller via set_in_flight.
        }

        fn record_call_end(&self, endpoint: &str, outcome: &str, latency_secs: Option<f64>) {
            self.calls_total
                .with_label_values(&[endpoint, outcome])
                .inc();

            if let Some(lat) = latency_secs {
                self.call_latency_seconds
                    .with_label_values(&[endpoint])
                    .observe(lat);
            }
        }

        fn record_error(&self, endpoint: Option<&str>, kind: &str) {
            let endpoint_label = endpoint.unwrap_or("_unknown");
            self.errors_total
                .with_label_values(&[endpoint_label, kind])
                .inc();
        }

        fn set_in_flight(&self, count: u64) {
            self.in_flight.set(count as i64);
        }
    }

}

const DEFAULT_FILTER: &str = "info";
const TIMESTAMP_FORMAT: &str =
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3][offset_hour sign:mandatory]:[offset_minute]";

/// Install the global `tracing` subscriber. Call once, early in `main`.
///
/// Filter precedence: `level` if given, then `RUST_LOG`, then `info`.
/// `level` may be a bare level (`debug`) or a filter expression
/// (`info,devinfo_client=trace`).
pub fn init(level: Option<&str>) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = select_filter(level, rust_log.as_deref())?;

    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_timer(local_timer()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}

fn select_filter(level: Option<&str>, rust_log: Option<&str>) -> Result<EnvFilter> {
    match (level, rust_log) {
        (Some(level), _) => parse_level_filter(level),
        (None, Some(env)) if !env.trim().is_empty() => parse_level_filter(env),
        _ => Ok(EnvFilter::new(DEFAULT_FILTER)),
    }
}

fn parse_level_filter(expr: &str) -> Result<EnvFilter> {
    let expr = expr.trim();
    if expr.parse::<Level>().is_ok() {
        return Ok(EnvFilter::new(expr));
    }
    EnvFilter::builder()
        .parse(expr)
        .map_err(|e| TelemetryError::InvalidLevel(format!("'{}': {}", expr, e)))
}

// UTC when the local offset is unavailable (e.g. multi-threaded at startup).
fn local_timer() -> Result<OffsetTime<OwnedFormatItem>> {
    let format = format_description::parse_owned::<1>(TIMESTAMP_FORMAT)
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    Ok(OffsetTime::new(offset, format))
}
