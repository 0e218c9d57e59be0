//! Configuration loading and types for devinfo.
//!
//! This crate is responsible for:
//! - Defining the configuration model consumed by the client and the CLI
//! - Loading configuration from TOML files
//! - Providing a simple default search strategy (`/etc/devinfo/devinfo.toml`, `./devinfo.toml`)
//!
//! Where the device service lives is configuration; the client core never
//! hard-codes an endpoint.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use devinfo_core::{DevinfoError, Endpoint, Result, SupersedePolicy};

/// Root configuration struct for devinfo.
#[derive(Debug, Clone, Deserialize)]
pub struct DevinfoConfig {
    /// Where the device service is reachable.
    pub endpoint: EndpointConfig,

    /// Call behaviour (timeouts, supersede policy).
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

impl DevinfoConfig {
    /// Perform basic structural validation of the configuration.
    ///
    /// This does not contact the service; it only checks for obviously
    /// invalid or inconsistent values.
    pub fn validate(&self) -> Result<()> {
        self.endpoint.to_endpoint()?;

        if self.client.connect_timeout_ms == 0 {
            return Err(DevinfoError::invalid_config(
                "client.connect_timeout_ms",
                "client.connect_timeout_ms must be greater than zero",
            ));
        }

        if let Some(level) = self
            .telemetry
            .as_ref()
            .and_then(|t| t.log_level.as_deref())
        {
            if level.trim().is_empty() {
                return Err(DevinfoError::invalid_config(
                    "telemetry.log_level",
                    "telemetry.log_level must not be empty when set",
                ));
            }
        }

        Ok(())
    }

    /// Effective log level from the telemetry section, if any.
    pub fn log_level(&self) -> Option<&str> {
        self.telemetry.as_ref().and_then(|t| t.log_level.as_deref())
    }

    /// Whether metrics are enabled (the default).
    pub fn metrics_enabled(&self) -> bool {
        self.telemetry
            .as_ref()
            .map(|t| !t.disable_metrics)
            .unwrap_or(true)
    }
}

/// Device service location.
///
/// Either `uri` or `host` + `port` (+ optional `secure`) must be given, not both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointConfig {
    /// Full URI, e.g. `http://18.221.226.156:50051`. The scheme selects
    /// plaintext (`http`, `grpc`) or TLS (`https`, `grpcs`).
    #[serde(default)]
    pub uri: Option<String>,

    /// Host name or address.
    #[serde(default)]
    pub host: Option<String>,

    /// TCP port.
    #[serde(default)]
    pub port: Option<u16>,

    /// Use transport-level encryption. Defaults to `false` (plaintext).
    #[serde(default)]
    pub secure: bool,
}

impl EndpointConfig {
    /// Build a validated [`Endpoint`] from this section.
    pub fn to_endpoint(&self) -> Result<Endpoint> {
        match (&self.uri, &self.host) {
            (Some(_), Some(_)) => Err(DevinfoError::invalid_config(
                "endpoint",
                "set either endpoint.uri or endpoint.host/port, not both",
            )),
            (Some(uri), None) => Endpoint::from_uri(uri)
                .map_err(|e| DevinfoError::invalid_config("endpoint.uri", e.to_string())),
            (None, Some(host)) => {
                let port = self.port.ok_or_else(|| {
                    DevinfoError::invalid_config(
                        "endpoint.port",
                        "endpoint.port is required when endpoint.host is set",
                    )
                })?;
                Endpoint::new(host.as_str(), port, self.secure)
                    .map_err(|e| DevinfoError::invalid_config("endpoint", e.to_string()))
            }
            (None, None) => Err(DevinfoError::invalid_config(
                "endpoint",
                "endpoint.uri or endpoint.host must be set",
            )),
        }
    }
}

/// Call behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Per-call deadline in milliseconds. `0` disables the deadline.
    ///
    /// Defaults to 30000.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Deadline for establishing the transport, in milliseconds.
    ///
    /// Defaults to 5000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// What to do with an in-flight call when a newer one starts.
    #[serde(default)]
    pub supersede: SupersedePolicy,
}

impl ClientConfig {
    /// The per-call deadline, or `None` when disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            supersede: SupersedePolicy::default(),
        }
    }
}

/// Logging and metrics configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or filter expression (e.g. `info`, `info,devinfo_client=debug`).
    #[serde(default)]
    pub log_level: Option<String>,

    /// Disable metrics recording.
    #[serde(default)]
    pub disable_metrics: bool,
}

/// Parse configuration from a TOML string.
pub fn from_toml_str(contents: &str) -> Result<DevinfoConfig> {
    toml::from_str(contents)
        .map_err(|err| DevinfoError::config(format!("failed to parse config: {}", err)))
}

/// Load configuration from a specific file path.
///
/// This function parses TOML into [`DevinfoConfig`] and maps errors into
/// [`DevinfoError::ConfigNotFound`] / [`DevinfoError::InvalidConfig`] as appropriate.
pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<DevinfoConfig> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            DevinfoError::ConfigNotFound(path_ref.display().to_string())
        } else {
            DevinfoError::config(format!(
                "failed to read config file '{}': {}",
                path_ref.display(),
                err
            ))
        }
    })?;

    let cfg: DevinfoConfig = toml::from_str(&contents).map_err(|err| {
        DevinfoError::invalid_config(
            path_ref.display().to_string(),
            format!("failed to parse config: {}", err),
        )
    })?;

    Ok(cfg)
}

/// Attempt to load configuration using the default search strategy.
///
/// Current strategy (in order):
/// 1. `/etc/devinfo/devinfo.toml`
/// 2. `./devinfo.toml` (in the current working directory)
pub fn load_default() -> Result<DevinfoConfig> {
    let candidates = [
        PathBuf::from("/etc/devinfo/devinfo.toml"),
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("devinfo.toml"),
    ];
    load_first(&candidates)
}

/// Load the first existing file among `candidates`.
///
/// Returns [`DevinfoError::ConfigNotFound`] listing every probed path when none
/// exists.
fn load_first(candidates: &[PathBuf]) -> Result<DevinfoConfig> {
    match candidates.iter().find(|candidate| candidate.exists()) {
        Some(path) => load_from_path(path),
        None => Err(DevinfoError::ConfigNotFound(
            candidates
                .iter()
                .map(|candidate| candidate.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_load_from_path_minimal() {
        let path = PathBuf::from("test_devinfo_config_minimal.toml");
        let _ = fs::remove_file(&path);

        {
            let mut file = fs::File::create(&path).expect("create temp config file");
            writeln!(
                file,
                r#"
[endpoint]
host = "18.221.226.156"
port = 50051
"#
            )
            .expect("write config");
        }

        let cfg = load_from_path(&path).expect("load config");
        let endpoint = cfg.endpoint.to_endpoint().expect("endpoint");

        assert_eq!(endpoint.host(), "18.221.226.156");
        assert_eq!(endpoint.port(), 50051);
        assert!(!endpoint.is_secure());
        assert_eq!(cfg.client.timeout_ms, 30_000);
        assert_eq!(cfg.client.supersede, SupersedePolicy::Cancel);
        assert!(cfg.metrics_enabled());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_no_default_file_is_config_not_found() {
        let candidates = [
            PathBuf::from("/this/definitely/does/not/exist.toml"),
            PathBuf::from("also_missing_devinfo.toml"),
        ];
        match load_first(&candidates) {
            Err(DevinfoError::ConfigNotFound(paths)) => {
                assert!(paths.contains("/this/definitely/does/not/exist.toml"));
                assert!(paths.contains("also_missing_devinfo.toml"));
            }
            other => panic!("expected ConfigNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_load_first_skips_missing_candidates() {
        let path = PathBuf::from("test_devinfo_config_first.toml");
        fs::write(&path, "[endpoint]\nuri = \"http://10.0.0.9:50051\"\n").expect("write config");

        let cfg = load_first(&[PathBuf::from("/this/definitely/does/not/exist.toml"), path.clone()])
            .expect("load config");
        assert_eq!(cfg.endpoint.uri.as_deref(), Some("http://10.0.0.9:50051"));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_errors() {
        let res = load_from_path("/this/definitely/does/not/exist.toml");
        assert!(matches!(res, Err(DevinfoError::ConfigNotFound(_))));
    }

    #[test]
    fn test_full_config_parses() {
        let cfg = from_toml_str(
            r#"
[endpoint]
uri = "https://devices.example.com:8443"

[client]
timeout_ms = 0
connect_timeout_ms = 250
supersede = "detach"

[telemetry]
log_level = "debug"
disable_metrics = true
"#,
        )
        .expect("parse");

        cfg.validate().expect("valid");
        let endpoint = cfg.endpoint.to_endpoint().unwrap();
        assert!(endpoint.is_secure());
        assert_eq!(endpoint.port(), 8443);
        assert_eq!(cfg.client.call_timeout(), None);
        assert_eq!(cfg.client.connect_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.client.supersede, SupersedePolicy::Detach);
        assert_eq!(cfg.log_level(), Some("debug"));
        assert!(!cfg.metrics_enabled());
    }

    #[test]
    fn test_validate_rejects_ambiguous_endpoint() {
        let cfg = from_toml_str(
            r#"
[endpoint]
uri = "http://localhost:50051"
host = "localhost"
port = 50051
"#,
        )
        .expect("parse");

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_port() {
        let cfg = DevinfoConfig {
            endpoint: EndpointConfig {
                uri: None,
                host: Some("localhost".to_string()),
                port: None,
                secure: false,
            },
            client: ClientConfig::default(),
            telemetry: None,
        };

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_connect_timeout() {
        let cfg = DevinfoConfig {
            endpoint: EndpointConfig {
                uri: Some("http://localhost:50051".to_string()),
                ..EndpointConfig::default()
            },
            client: ClientConfig {
                connect_timeout_ms: 0,
                ..ClientConfig::default()
            },
            telemetry: None,
        };

        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_default_call_timeout() {
        let client = ClientConfig::default();
        assert_eq!(client.call_timeout(), Some(Duration::from_secs(30)));
    }
}
