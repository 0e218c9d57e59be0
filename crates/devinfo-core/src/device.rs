//! Endpoint, request and device attribute types.
//!
//! These are the values that flow through a device query: where the device
//! service lives ([`Endpoint`]), what is being asked for ([`DeviceRequest`]) and
//! what comes back ([`DeviceInfo`]).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DevinfoError, Result};

/// Network location of the remote device service.
///
/// An endpoint is immutable once constructed; the fields are only reachable
/// through getters so that a validated endpoint stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    host: String,
    port: u16,
    secure: bool,
}

impl Endpoint {
    /// Create a new endpoint.
    ///
    /// The host must be non-empty and the port must be in `1..=65535`.
    pub fn new<S: Into<String>>(host: S, port: u16, secure: bool) -> Result<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(DevinfoError::InvalidEndpoint(
                "host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(DevinfoError::InvalidEndpoint(format!(
                "port for '{}' must be in 1..=65535",
                host
            )));
        }

        Ok(Self { host, port, secure })
    }

    /// Create an endpoint that uses an unencrypted transport.
    pub fn plaintext<S: Into<String>>(host: S, port: u16) -> Result<Self> {
        Self::new(host, port, false)
    }

    /// Parse an endpoint from a URI such as `http://10.0.0.5:50051`.
    ///
    /// `https` and `grpcs` select transport security, `http` and `grpc` select
    /// plaintext. When the URI has no port, the scheme's well-known port is
    /// used if it has one.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let parsed = url::Url::parse(uri.trim())
            .map_err(|e| DevinfoError::InvalidEndpoint(format!("'{}': {}", uri, e)))?;

        let secure = match parsed.scheme() {
            "https" | "grpcs" => true,
            "http" | "grpc" => false,
            other => {
                return Err(DevinfoError::InvalidEndpoint(format!(
                    "unsupported scheme '{}' in '{}'",
                    other, uri
                )))
            }
        };

        let host = match parsed.host() {
            Some(url::Host::Domain(domain)) => domain.to_string(),
            Some(url::Host::Ipv4(addr)) => addr.to_string(),
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            None => {
                return Err(DevinfoError::InvalidEndpoint(format!(
                    "missing host in '{}'",
                    uri
                )))
            }
        };

        let port = parsed.port_or_known_default().ok_or_else(|| {
            DevinfoError::InvalidEndpoint(format!("missing port in '{}'", uri))
        })?;

        Self::new(host, port, secure)
    }

    /// Host name or address literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether transport-level encryption is used.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The URI a channel to this endpoint is built from.
    pub fn uri(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.authority())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// A request for the attributes of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRequest {
    device_id: String,
}

impl DeviceRequest {
    /// Create a request for the given device identifier (e.g. a CPE id).
    pub fn new<S: Into<String>>(device_id: S) -> Result<Self> {
        let device_id = device_id.into();
        if device_id.trim().is_empty() {
            return Err(DevinfoError::InvalidRequest(
                "device identifier must not be empty".to_string(),
            ));
        }
        Ok(Self { device_id })
    }

    /// The device identifier this request asks about.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Consume the request, returning the identifier.
    pub fn into_device_id(self) -> String {
        self.device_id
    }
}

/// Attributes reported for a device.
///
/// Every field may be empty, which means the service did not report it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: String,
    pub ip_address: String,
    pub status: String,
    pub manufacturer: String,
}

impl DeviceInfo {
    pub fn new<S: Into<String>>(serial_number: S, ip_address: S, status: S, manufacturer: S) -> Self {
        Self {
            serial_number: serial_number.into(),
            ip_address: ip_address.into(),
            status: status.into(),
            manufacturer: manufacturer.into(),
        }
    }

    /// Render a field for display, substituting `unknown` for empty values.
    pub fn reported(field: &str) -> &str {
        if field.is_empty() {
            "unknown"
        } else {
            field
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "serial={} ip={} status={} manufacturer={}",
            Self::reported(&self.serial_number),
            Self::reported(&self.ip_address),
            Self::reported(&self.status),
            Self::reported(&self.manufacturer)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_creation() {
        let endpoint = Endpoint::new("18.221.226.156", 50051, false).unwrap();
        assert_eq!(endpoint.host(), "18.221.226.156");
        assert_eq!(endpoint.port(), 50051);
        assert!(!endpoint.is_secure());
        assert_eq!(endpoint.authority(), "18.221.226.156:50051");
        assert_eq!(endpoint.uri(), "http://18.221.226.156:50051");
    }

    #[test]
    fn test_endpoint_rejects_invalid_values() {
        assert!(Endpoint::new("", 50051, false).is_err());
        assert!(Endpoint::new("   ", 50051, false).is_err());
        assert!(Endpoint::new("localhost", 0, false).is_err());
    }

    #[test]
    fn test_endpoint_from_uri_selects_security() {
        let plain = Endpoint::from_uri("http://10.0.0.5:50051").unwrap();
        assert!(!plain.is_secure());
        assert_eq!(plain.port(), 50051);

        let secure = Endpoint::from_uri("https://devices.example.com").unwrap();
        assert!(secure.is_secure());
        assert_eq!(secure.port(), 443);
        assert_eq!(secure.host(), "devices.example.com");

        let grpc = Endpoint::from_uri("grpc://devices.local:9000").unwrap();
        assert!(!grpc.is_secure());
        assert_eq!(grpc.authority(), "devices.local:9000");
    }

    #[test]
    fn test_endpoint_from_uri_errors() {
        assert!(Endpoint::from_uri("not a uri").is_err());
        assert!(Endpoint::from_uri("ftp://host:21").is_err());
        assert!(Endpoint::from_uri("grpc://host").is_err());
    }

    #[test]
    fn test_ipv6_authority_is_bracketed() {
        let endpoint = Endpoint::from_uri("http://[::1]:50051").unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.authority(), "[::1]:50051");
        assert_eq!(endpoint.to_string(), "http://[::1]:50051");
    }

    #[test]
    fn test_device_request_requires_identifier() {
        let request = DeviceRequest::new("CPE123").unwrap();
        assert_eq!(request.device_id(), "CPE123");
        assert!(DeviceRequest::new("").is_err());
        assert!(DeviceRequest::new("  ").is_err());
    }

    #[test]
    fn test_device_info_display_marks_unknown_fields() {
        let info = DeviceInfo::new("SN1", "", "online", "Acme");
        assert_eq!(
            info.to_string(),
            "serial=SN1 ip=unknown status=online manufacturer=Acme"
        );
    }

    #[test]
    fn test_device_info_serialization() {
        let info = DeviceInfo::new("SN1", "10.0.0.5", "online", "Acme");
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"serial_number\":\"SN1\""));

        let deserialized: DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, info);
    }
}
