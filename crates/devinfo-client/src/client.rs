//! High-level client for one device service endpoint.

use std::sync::Arc;

use tracing::info;

use devinfo_config::DevinfoConfig;
use devinfo_core::{DeviceRequest, Endpoint, Result};
use devinfo_telemetry::MetricsRecorder;

use crate::connection::{Connection, ConnectionManager};
use crate::dispatcher::{CallDispatcher, CallHandle, DispatchOptions};
use crate::grpc::GrpcConnector;
use crate::state::ResultState;
use crate::transport::Connector;

/// Ties a [`ConnectionManager`], a [`CallDispatcher`] and a [`ResultState`]
/// together for a single endpoint.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct DeviceInfoClient {
    endpoint: Endpoint,
    connections: ConnectionManager,
    dispatcher: CallDispatcher,
}

impl DeviceInfoClient {
    /// Build a gRPC client from a validated configuration.
    pub fn from_config(cfg: &DevinfoConfig, metrics: Arc<dyn MetricsRecorder>) -> Result<Self> {
        let endpoint = cfg.endpoint.to_endpoint()?;
        let connector = Arc::new(GrpcConnector::new(cfg.client.connect_timeout()));
        Self::new(
            endpoint,
            connector,
            DispatchOptions::from_config(&cfg.client),
            metrics,
        )
    }

    pub fn new(
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        options: DispatchOptions,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Result<Self> {
        let dispatcher = CallDispatcher::builder(ResultState::new())
            .options(options)
            .with_metrics(metrics.clone())
            .build()?;

        Ok(Self {
            endpoint,
            connections: ConnectionManager::new(connector).with_metrics(metrics),
            dispatcher,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The state holding the latest call's outcome.
    pub fn state(&self) -> &ResultState {
        self.dispatcher.state()
    }

    /// Open the connection. Safe to call repeatedly.
    pub async fn connect(&self) -> Result<Connection> {
        self.connections.open(&self.endpoint).await
    }

    /// Query `device_id`, connecting first if necessary.
    ///
    /// The returned handle settles with the call's outcome; the same outcome
    /// lands in [`state`](Self::state) unless a newer call has started.
    pub async fn request_device_info(&self, device_id: &str) -> Result<CallHandle> {
        let request = DeviceRequest::new(device_id)?;
        let connection = self.connect().await?;
        info!(device = device_id, endpoint = %self.endpoint, "requesting device info");
        self.dispatcher.call(&connection, request)
    }

    /// Cancel the latest call if it is still in flight.
    pub fn cancel_latest(&self) -> bool {
        self.dispatcher.cancel_latest()
    }

    /// Close the connection, cancelling in-flight calls.
    pub async fn close(&self) {
        self.connections.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device_signal, sample_endpoint, FakeConnector, Script, ScriptedTransport};
    use devinfo_core::{CallOutcome, DevinfoError, ErrorKind};
    use devinfo_telemetry::NoopMetricsRecorder;

    fn client(transport: Arc<ScriptedTransport>) -> (DeviceInfoClient, Arc<FakeConnector>) {
        let connector = FakeConnector::new(transport);
        let client = DeviceInfoClient::new(
            sample_endpoint(),
            connector.clone(),
            DispatchOptions::default(),
            Arc::new(NoopMetricsRecorder),
        )
        .unwrap();
        (client, connector)
    }

    #[tokio::test]
    async fn test_request_connects_once_and_reuses() {
        let (client, connector) =
            client(ScriptedTransport::new(Script::respond(vec![device_signal("SN1")])));

        let first = client.request_device_info("CPE123").await.unwrap();
        assert!(first.outcome().await.is_terminal());
        let second = client.request_device_info("CPE123").await.unwrap();
        assert!(second.outcome().await.is_terminal());

        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_blank_device_id_is_rejected_before_connecting() {
        let (client, connector) = client(ScriptedTransport::new(Script::Hang));

        let err = client.request_device_info("  ").await.unwrap_err();
        assert!(matches!(err, DevinfoError::InvalidRequest(_)));
        assert_eq!(connector.connects(), 0);
        assert_eq!(client.state().get(), CallOutcome::Idle);
    }

    #[tokio::test]
    async fn test_close_cancels_pending_request() {
        let (client, _) = client(ScriptedTransport::new(Script::Hang));

        let handle = client.request_device_info("CPE123").await.unwrap();
        assert!(client.state().is_loading());

        client.close().await;
        client.close().await;

        assert_eq!(handle.outcome().await.error_kind(), Some(ErrorKind::Cancelled));
        assert!(!client.state().is_loading());
    }

    #[tokio::test]
    async fn test_from_config_uses_configured_endpoint() {
        let cfg = devinfo_config::from_toml_str(
            r#"
            [endpoint]
            uri = "http://18.221.226.156:50051"

            [client]
            timeout_ms = 1500
            "#,
        )
        .unwrap();

        let client = DeviceInfoClient::from_config(&cfg, Arc::new(NoopMetricsRecorder)).unwrap();
        assert_eq!(client.endpoint(), &sample_endpoint());
        assert_eq!(
            client.dispatcher.options().timeout,
            Some(std::time::Duration::from_millis(1500))
        );
    }
}
