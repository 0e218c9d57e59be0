use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use devinfo_client::DeviceInfoClient;
use devinfo_config::{load_default, load_from_path, ClientConfig, DevinfoConfig, EndpointConfig};
use devinfo_core::{CallOutcome, DeviceInfo, DevinfoError};
use devinfo_telemetry::{MetricsRecorder, NoopMetricsRecorder, PrometheusMetricsRecorder};
use tracing::{error, info, warn};

const EXIT_CONFIG: i32 = 1;
const EXIT_CALL_FAILED: i32 = 2;

/// devinfo - query a device's attributes from the device information service
///
/// Configuration discovery rules:
/// 1. If `--config PATH` is provided, that path is used.
/// 2. Otherwise, `devinfo_config::load_default()` probes
///    `/etc/devinfo/devinfo.toml` and `./devinfo.toml`.
/// 3. If neither exists, `--endpoint` alone is enough to run a query.
#[derive(Debug, Parser)]
#[command(
    name = "devinfo",
    version,
    about = "Query device attributes over gRPC",
    disable_help_subcommand = true
)]
struct Cli {
    /// Device identifier to query.
    #[arg(value_name = "DEVICE_ID", default_value = "CPE123")]
    device_id: String,

    /// Path to configuration file (TOML).
    #[arg(long = "config", short = 'c', value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (overrides the config file and RUST_LOG).
    ///
    /// Accepts standard tracing levels or a filter expression such as
    /// "info,devinfo_client=debug".
    #[arg(long = "log-level", short = 'L', value_name = "LEVEL")]
    log_level: Option<String>,

    /// Service endpoint URI, e.g. http://18.221.226.156:50051. Overrides
    /// `[endpoint]` from the config file.
    #[arg(long = "endpoint", short = 'e', value_name = "URI")]
    endpoint: Option<String>,

    /// Per-call timeout in milliseconds; 0 waits indefinitely.
    #[arg(long = "timeout-ms", value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Validate configuration and exit.
    #[arg(long = "check-config", action = ArgAction::SetTrue)]
    check_config: bool,

    /// Print the effective configuration and exit.
    #[arg(long = "print-config", action = ArgAction::SetTrue)]
    print_config: bool,

    /// Print the outcome as JSON.
    #[arg(long = "json", action = ArgAction::SetTrue)]
    json: bool,

    /// Print every state change of the call, not only the final outcome.
    #[arg(long = "watch", action = ArgAction::SetTrue)]
    watch: bool,

    /// Print Prometheus metrics after the call.
    #[arg(long = "print-metrics", action = ArgAction::SetTrue)]
    print_metrics: bool,
}

fn main() {
    let cli = Cli::parse();

    let loaded = load_config(&cli);

    // CLI level wins over the config file; RUST_LOG applies when neither is set.
    let level = cli.log_level.clone().or_else(|| {
        loaded
            .as_ref()
            .ok()
            .and_then(|cfg| cfg.log_level().map(str::to_string))
    });
    if let Err(err) = devinfo_telemetry::init(level.as_deref()) {
        eprintln!("devinfo: failed to initialise telemetry: {}", err);
        process::exit(EXIT_CONFIG);
    }

    let config = match loaded {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load configuration: {}", err);
            process::exit(EXIT_CONFIG);
        }
    };

    if let Err(err) = config.validate() {
        error!("configuration validation failed: {}", err);
        process::exit(EXIT_CONFIG);
    }

    if cli.check_config {
        info!("configuration is valid");
        return;
    }

    if cli.print_config {
        print_config_summary(&config);
        return;
    }

    let prometheus = if config.metrics_enabled() {
        match PrometheusMetricsRecorder::try_new() {
            Ok(recorder) => Some(Arc::new(recorder)),
            Err(err) => {
                warn!("metrics disabled: {}", err);
                None
            }
        }
    } else {
        None
    };
    let metrics: Arc<dyn MetricsRecorder> = match &prometheus {
        Some(recorder) => recorder.clone(),
        None => Arc::new(NoopMetricsRecorder),
    };

    let code = match run_query_blocking(&cli, &config, metrics) {
        Ok(outcome) => {
            if let Err(err) = print_outcome(&outcome, cli.json) {
                error!("failed to render outcome: {:#}", err);
            }
            match outcome {
                CallOutcome::Succeeded(_) => 0,
                _ => EXIT_CALL_FAILED,
            }
        }
        Err(err) => {
            error!("{:#}", err);
            EXIT_CONFIG
        }
    };

    if cli.print_metrics {
        match prometheus.as_ref().map(|recorder| recorder.render()) {
            Some(Ok(text)) => print!("{}", text),
            Some(Err(err)) => error!("failed to render metrics: {}", err),
            None => warn!("metrics are disabled; nothing to print"),
        }
    }

    if code != 0 {
        process::exit(code);
    }
}

/// Load configuration and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<DevinfoConfig, DevinfoError> {
    let mut cfg = match &cli.config {
        Some(path) => load_from_path(path)?,
        None => match load_default() {
            Ok(cfg) => cfg,
            Err(DevinfoError::ConfigNotFound(_)) if cli.endpoint.is_some() => DevinfoConfig {
                endpoint: EndpointConfig::default(),
                client: ClientConfig::default(),
                telemetry: None,
            },
            Err(err) => return Err(err),
        },
    };

    apply_overrides(&mut cfg, cli.endpoint.as_deref(), cli.timeout_ms);
    Ok(cfg)
}

fn apply_overrides(cfg: &mut DevinfoConfig, endpoint: Option<&str>, timeout_ms: Option<u64>) {
    if let Some(uri) = endpoint {
        cfg.endpoint = EndpointConfig {
            uri: Some(uri.to_string()),
            ..EndpointConfig::default()
        };
    }
    if let Some(ms) = timeout_ms {
        cfg.client.timeout_ms = ms;
    }
}

/// Run one query on a fresh Tokio runtime and return its terminal outcome.
fn run_query_blocking(
    cli: &Cli,
    config: &DevinfoConfig,
    metrics: Arc<dyn MetricsRecorder>,
) -> anyhow::Result<CallOutcome> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    rt.block_on(async move {
        let client = DeviceInfoClient::from_config(config, metrics)?;
        client
            .connect()
            .await
            .with_context(|| format!("failed to connect to {}", client.endpoint()))?;

        let mut updates = client.state().subscribe();
        let handle = client.request_device_info(&cli.device_id).await?;

        if cli.watch {
            while let Some(outcome) = updates.changed().await {
                println!("{}", outcome);
                if outcome.is_terminal() {
                    break;
                }
            }
        }

        let outcome = handle.outcome().await;
        client.close().await;
        Ok::<_, anyhow::Error>(outcome)
    })
}

fn print_outcome(outcome: &CallOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    match outcome {
        CallOutcome::Succeeded(info) => {
            println!("serial_number = {}", DeviceInfo::reported(&info.serial_number));
            println!("ip_address    = {}", DeviceInfo::reported(&info.ip_address));
            println!("status        = {}", DeviceInfo::reported(&info.status));
            println!("manufacturer  = {}", DeviceInfo::reported(&info.manufacturer));
        }
        other => println!("{}", other),
    }
    Ok(())
}

fn print_config_summary(cfg: &DevinfoConfig) {
    println!("devinfo configuration summary:");
    match cfg.endpoint.to_endpoint() {
        Ok(endpoint) => {
            println!("  endpoint           = {}", endpoint);
            println!("  endpoint.secure    = {}", endpoint.is_secure());
        }
        Err(err) => println!("  endpoint           = <invalid: {}>", err),
    }
    match cfg.client.call_timeout() {
        Some(timeout) => println!("  client.timeout     = {}ms", timeout.as_millis()),
        None => println!("  client.timeout     = <none>"),
    }
    println!(
        "  client.connect_timeout = {}ms",
        cfg.client.connect_timeout().as_millis()
    );
    println!("  client.supersede   = {:?}", cfg.client.supersede);
    println!(
        "  telemetry.log_level = {}",
        cfg.log_level().unwrap_or("<default>")
    );
    println!("  telemetry.metrics  = {}", cfg.metrics_enabled());
}
