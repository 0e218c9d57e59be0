//! Transport seam between the dispatcher and the wire.
//!
//! A [`Transport`] performs one unary call and reports what happened as
//! [`TransportSignal`]s pushed through a [`SignalSender`]. The dispatcher owns
//! the receiving end and honours only the first signal of a call; anything a
//! transport sends afterwards is dropped.
//!
//! Transports are created by a [`Connector`], which is injected into the
//! connection manager so that tests can substitute scripted transports.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::debug;

use devinfo_core::{DevinfoError, Endpoint, ErrorKind, Result};

use crate::dispatcher::CallId;
use crate::proto;

/// A classified failure reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportError> for DevinfoError {
    fn from(err: TransportError) -> Self {
        DevinfoError::call(err.kind, err.message)
    }
}

/// A completion signal for one call.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// The service answered. The payload may still be absent.
    Response(proto::DeviceResponse),

    /// The call failed.
    Error(TransportError),
}

/// Sending half of a call's signal channel.
#[derive(Debug, Clone)]
pub struct SignalSender {
    call: CallId,
    tx: mpsc::UnboundedSender<TransportSignal>,
}

impl SignalSender {
    pub(crate) fn channel(call: CallId) -> (Self, mpsc::UnboundedReceiver<TransportSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { call, tx }, rx)
    }

    /// The call these signals belong to.
    pub fn call_id(&self) -> CallId {
        self.call
    }

    /// Deliver a signal. Returns `false` if the call has already finished, in
    /// which case the signal is discarded.
    pub fn send(&self, signal: TransportSignal) -> bool {
        match self.tx.send(signal) {
            Ok(()) => true,
            Err(mpsc::error::SendError(signal)) => {
                debug!(call = %self.call, ?signal, "call already finished; discarding transport signal");
                false
            }
        }
    }
}

/// Performs unary device calls over an established connection.
pub trait Transport: Send + Sync + 'static {
    /// Start a call. The returned future drives the call's I/O and must report
    /// its result through `signals`. Dropping the future abandons the call.
    fn unary(&self, request: proto::DeviceRequest, signals: SignalSender) -> BoxFuture<'static, ()>;
}

/// Establishes transports to endpoints.
pub trait Connector: Send + Sync + 'static {
    /// Set up a transport to `endpoint`.
    ///
    /// Fails with `DevinfoError::Connection` when the address cannot be
    /// resolved or the transport cannot be set up.
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Arc<dyn Transport>>>;
}
