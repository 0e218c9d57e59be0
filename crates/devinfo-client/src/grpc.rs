//! tonic-backed [`Connector`] and [`Transport`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::net::lookup_host;
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::{Code, Status};
use tracing::debug;

use devinfo_core::{DevinfoError, Endpoint, ErrorKind, Result};

use crate::proto::{self, DeviceServiceClient};
use crate::transport::{Connector, SignalSender, Transport, TransportError, TransportSignal};

/// Connects to the device service over HTTP/2.
///
/// The address is resolved while connecting so that an unknown host is
/// reported to the caller of `open`. The channel itself connects lazily on the
/// first call; a refused or dropped connection is reported by that call as a
/// transport failure.
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    connect_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Connector for GrpcConnector {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        async move {
            let authority = endpoint.authority();

            let mut addrs = tokio::time::timeout(self.connect_timeout, lookup_host(authority.as_str()))
                .await
                .map_err(|_| DevinfoError::connection(&authority, "address resolution timed out"))?
                .map_err(|e| {
                    DevinfoError::connection(&authority, format!("failed to resolve address: {}", e))
                })?;
            let addr = addrs.next().ok_or_else(|| {
                DevinfoError::connection(&authority, "address resolved to no socket addresses")
            })?;
            debug!(%endpoint, %addr, "resolved device service address");

            let mut builder = tonic::transport::Endpoint::from_shared(endpoint.uri())
                .map_err(|e| DevinfoError::connection(&authority, e.to_string()))?
                .connect_timeout(self.connect_timeout);

            if endpoint.is_secure() {
                let tls = ClientTlsConfig::new()
                    .with_native_roots()
                    .domain_name(endpoint.host());
                builder = builder.tls_config(tls).map_err(|e| {
                    DevinfoError::connection(&authority, format!("invalid TLS configuration: {}", e))
                })?;
            }

            let channel = builder.connect_lazy();
            Ok(Arc::new(GrpcTransport::new(channel)) as Arc<dyn Transport>)
        }
        .boxed()
    }
}

/// Issues `GetDeviceInfo` calls over a shared tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    client: DeviceServiceClient,
}

impl GrpcTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: DeviceServiceClient::new(channel),
        }
    }
}

impl Transport for GrpcTransport {
    fn unary(&self, request: proto::DeviceRequest, signals: SignalSender) -> BoxFuture<'static, ()> {
        let mut client = self.client.clone();
        async move {
            let signal = match client.get_device_info(request).await {
                Ok(response) => TransportSignal::Response(response.into_inner()),
                Err(status) => TransportSignal::Error(classify_status(&status)),
            };
            signals.send(signal);
        }
        .boxed()
    }
}

/// Map a gRPC status onto the client's failure classification.
///
/// Anything that is not clearly a server verdict, a deadline or a
/// cancellation counts as a transport failure; the original message is kept.
pub fn classify_status(status: &Status) -> TransportError {
    let kind = match status.code() {
        Code::Cancelled => ErrorKind::Cancelled,
        Code::DeadlineExceeded => ErrorKind::Timeout,
        Code::Unavailable | Code::Unknown | Code::Ok => ErrorKind::TransportFailure,
        _ => ErrorKind::ServerError,
    };

    let message = if status.message().is_empty() {
        status.code().description().to_string()
    } else {
        status.message().to_string()
    };

    TransportError::new(kind, message)
}
