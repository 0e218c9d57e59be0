//! RPC client core for the device information service.
//!
//! Three pieces cooperate:
//!
//! - [`ConnectionManager`] owns the long-lived [`Connection`] to the service.
//! - [`CallDispatcher`] issues `GetDeviceInfo` calls over it and settles each
//!   one exactly once: success, failure, cancellation or timeout.
//! - [`ResultState`] holds the outcome of the latest call for whoever renders
//!   it.
//!
//! [`DeviceInfoClient`] wires them together for a single endpoint:
//!
//! ```no_run
//! use std::sync::Arc;
//! use devinfo_client::DeviceInfoClient;
//! use devinfo_client::{DispatchOptions, GrpcConnector};
//! use devinfo_core::Endpoint;
//! use devinfo_telemetry::NoopMetricsRecorder;
//!
//! # async fn run() -> devinfo_core::Result<()> {
//! let client = DeviceInfoClient::new(
//!     Endpoint::plaintext("18.221.226.156", 50051)?,
//!     Arc::new(GrpcConnector::default()),
//!     DispatchOptions::default(),
//!     Arc::new(NoopMetricsRecorder),
//! )?;
//!
//! client.connect().await?;
//! let handle = client.request_device_info("CPE123").await?;
//! println!("{}", handle.outcome().await);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod grpc;
pub mod proto;
pub mod state;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::DeviceInfoClient;
pub use connection::{Connection, ConnectionManager};
pub use dispatcher::{CallDispatcher, CallDispatcherBuilder, CallHandle, CallId, DispatchOptions};
pub use grpc::{classify_status, GrpcConnector, GrpcTransport};
pub use state::{OutcomeSubscription, ResultState};
pub use transport::{Connector, SignalSender, Transport, TransportError, TransportSignal};
