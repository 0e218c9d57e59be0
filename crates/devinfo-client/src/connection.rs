//! Connection Manager: one long-lived transport per manager.
//!
//! [`ConnectionManager::open`] hands out the live [`Connection`] for an
//! endpoint, creating it on first use. All calls share that connection.
//! [`ConnectionManager::close`] tears it down, cancelling whatever is still in
//! flight on it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use devinfo_core::{Endpoint, Result};
use devinfo_telemetry::{MetricsRecorder, NoopMetricsRecorder};

use crate::dispatcher::{CallControl, CallId};
use crate::transport::{Connector, Transport};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns at most one live [`Connection`].
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    metrics: Arc<dyn MetricsRecorder>,
    current: tokio::sync::Mutex<Option<Connection>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            metrics: Arc::new(NoopMetricsRecorder),
            current: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Attach a shared `MetricsRecorder` for connection failures.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Return the live connection to `endpoint`, creating it if needed.
    ///
    /// If the live connection points at a different endpoint it is closed
    /// first; its in-flight calls are cancelled. Resolution or setup failures
    /// are returned to the caller and leave no connection behind.
    pub async fn open(&self, endpoint: &Endpoint) -> Result<Connection> {
        let mut current = self.current.lock().await;

        if let Some(conn) = current.as_ref() {
            if conn.endpoint() == endpoint && !conn.is_closed() {
                debug!(connection = conn.id(), %endpoint, "reusing live connection");
                return Ok(conn.clone());
            }
        }

        if let Some(old) = current.take() {
            let cancelled = old.shutdown();
            info!(
                connection = old.id(),
                from = %old.endpoint(),
                to = %endpoint,
                cancelled,
                "replacing connection"
            );
        }

        info!(%endpoint, secure = endpoint.is_secure(), "connecting to device service");
        let transport = match self.connector.connect(endpoint).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(%endpoint, error = %err, "failed to connect to device service");
                self.metrics
                    .record_error(Some(endpoint.authority().as_str()), "connect");
                return Err(err);
            }
        };

        let conn = Connection::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            endpoint.clone(),
            transport,
        );
        info!(connection = conn.id(), %endpoint, "connection ready");

        *current = Some(conn.clone());
        Ok(conn)
    }

    /// Close the live connection, if any.
    ///
    /// In-flight calls finish as `Failed(Cancelled)`. Calling this again is a
    /// no-op.
    pub async fn close(&self) {
        let taken = self.current.lock().await.take();
        match taken {
            Some(conn) => {
                let cancelled = conn.shutdown();
                info!(connection = conn.id(), endpoint = %conn.endpoint(), cancelled, "connection closed");
            }
            None => debug!("close requested with no live connection"),
        }
    }

    /// The live connection, if any.
    pub async fn current(&self) -> Option<Connection> {
        self.current.lock().await.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(conn) = self.current.get_mut().take() {
            let cancelled = conn.shutdown();
            debug!(connection = conn.id(), cancelled, "connection released on drop");
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

/// A shared handle to one transport connection.
///
/// Clones refer to the same connection. Once closed, a connection accepts no
/// new calls.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    id: u64,
    endpoint: Endpoint,
    live: Mutex<Option<Live>>,
}

struct Live {
    transport: Arc<dyn Transport>,
    calls: HashMap<CallId, Arc<CallControl>>,
}

impl Connection {
    pub(crate) fn new(id: u64, endpoint: Endpoint, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                endpoint,
                live: Mutex::new(Some(Live {
                    transport,
                    calls: HashMap::new(),
                })),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner.live).is_none()
    }

    /// Number of calls currently in flight on this connection.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.live)
            .as_ref()
            .map(|live| live.calls.len())
            .unwrap_or(0)
    }

    /// Whether two handles refer to the same connection.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> {
        Arc::downgrade(&self.inner)
    }

    /// Track `call` and return the transport to run it on, or `None` if the
    /// connection is closed.
    pub(crate) fn register(&self, call: Arc<CallControl>) -> Option<Arc<dyn Transport>> {
        let mut live = lock(&self.inner.live);
        let live = live.as_mut()?;
        live.calls.insert(call.id(), call);
        Some(live.transport.clone())
    }

    /// Close the connection: stop accepting calls, cancel the ones in flight
    /// and drop the transport. Returns how many calls were cancelled.
    pub(crate) fn shutdown(&self) -> usize {
        let Some(live) = lock(&self.inner.live).take() else {
            return 0;
        };

        let mut cancelled = 0;
        for call in live.calls.into_values() {
            if call.cancel("connection closed") {
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl ConnectionInner {
    pub(crate) fn deregister(&self, call: CallId) {
        if let Some(live) = lock(&self.live).as_mut() {
            live.calls.remove(&call);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}
