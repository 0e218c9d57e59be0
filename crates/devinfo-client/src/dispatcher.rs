//! Call Dispatcher: issues device calls and settles their outcomes.
//!
//! Every call gets its own [`CallId`], its own signal channel from the
//! transport and its own [`CallHandle`]. A call settles exactly once. Whichever
//! of these happens first wins:
//!
//! - the transport's first signal,
//! - the per-call deadline,
//! - a cancellation (by the caller, by a newer call, or by the connection
//!   closing).
//!
//! Everything after that is discarded. The settled outcome goes to the call's
//! handle and, if the call is still the latest one, to the shared
//! [`ResultState`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use devinfo_config::ClientConfig;
use devinfo_core::{
    CallOutcome, DeviceInfo, DeviceRequest, DevinfoError, ErrorKind, Result, SupersedePolicy,
};
use devinfo_telemetry::{MetricsRecorder, NoopMetricsRecorder};

use crate::connection::{Connection, ConnectionInner};
use crate::state::ResultState;
use crate::transport::{SignalSender, TransportSignal};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Shared by every dispatcher so ids stay unique across dispatchers that
// report into the same `ResultState`.
static NEXT_CALL: AtomicU64 = AtomicU64::new(1);

/// Identifies one call. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    fn next() -> Self {
        Self(NEXT_CALL.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Per-dispatcher call behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Deadline for each call. `None` waits indefinitely.
    pub timeout: Option<Duration>,

    /// What happens to an in-flight call when a newer one starts.
    pub supersede: SupersedePolicy,
}

impl DispatchOptions {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            timeout: cfg.call_timeout(),
            supersede: cfg.supersede,
        }
    }
}

/// Issues calls over a [`Connection`] and tracks the latest one in a
/// [`ResultState`].
pub struct CallDispatcher {
    state: ResultState,
    options: DispatchOptions,
    metrics: Arc<dyn MetricsRecorder>,
    runtime: Handle,
    in_flight: Arc<AtomicU64>,
    latest: Mutex<Option<Arc<CallControl>>>,
}

impl CallDispatcher {
    /// Start building a dispatcher that reports into `state`.
    pub fn builder(state: ResultState) -> CallDispatcherBuilder {
        CallDispatcherBuilder {
            state,
            options: DispatchOptions::default(),
            metrics: None,
            runtime: None,
        }
    }

    /// The state this dispatcher reports the latest call into.
    pub fn state(&self) -> &ResultState {
        &self.state
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Issue `request` on `connection`.
    ///
    /// Returns as soon as the call is in flight; the network round-trip runs
    /// on the dispatcher's runtime. Fails only if the connection is already
    /// closed. Every other failure is reported as the call's outcome.
    pub fn call(&self, connection: &Connection, request: DeviceRequest) -> Result<CallHandle> {
        if connection.is_closed() {
            return Err(DevinfoError::ConnectionClosed(
                connection.endpoint().authority(),
            ));
        }

        let id = CallId::next();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (abort_tx, abort_rx) = oneshot::channel();
        let endpoint = connection.endpoint().authority();

        let control = Arc::new(CallControl {
            id,
            endpoint,
            started: Instant::now(),
            finished: AtomicBool::new(false),
            state: self.state.clone(),
            metrics: self.metrics.clone(),
            in_flight: self.in_flight.clone(),
            connection: connection.downgrade(),
            outcome_tx: Mutex::new(Some(outcome_tx)),
            abort_tx: Mutex::new(Some(abort_tx)),
        });

        self.metrics.record_call_start(&control.endpoint);
        let count = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.set_in_flight(count);

        let superseded = {
            let mut latest = lock(&self.latest);
            self.state.begin(id);
            latest.replace(control.clone())
        };
        debug!(call = %id, device = request.device_id(), endpoint = %control.endpoint, "call in flight");

        if let Some(previous) = superseded {
            if self.options.supersede == SupersedePolicy::Cancel {
                previous.cancel(&format!("superseded by {}", id));
            }
        }

        let Some(transport) = connection.register(control.clone()) else {
            control.cancel("connection closed");
            return Err(DevinfoError::ConnectionClosed(
                connection.endpoint().authority(),
            ));
        };

        let (signals, signal_rx) = SignalSender::channel(id);
        let work = transport.unary(request.into(), signals);
        self.runtime.spawn(drive(
            control.clone(),
            work,
            signal_rx,
            abort_rx,
            self.options.timeout,
        ));

        Ok(CallHandle {
            id,
            control,
            outcome: outcome_rx,
        })
    }

    /// Cancel the latest call if it is still in flight.
    pub fn cancel_latest(&self) -> bool {
        let latest = lock(&self.latest).clone();
        latest
            .map(|call| call.cancel("cancelled by caller"))
            .unwrap_or(false)
    }
}

impl fmt::Debug for CallDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Builder for [`CallDispatcher`].
pub struct CallDispatcherBuilder {
    state: ResultState,
    options: DispatchOptions,
    metrics: Option<Arc<dyn MetricsRecorder>>,
    runtime: Option<Handle>,
}

impl CallDispatcherBuilder {
    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a shared `MetricsRecorder`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run call I/O on `runtime` instead of the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<CallDispatcher> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                DevinfoError::Internal(
                    "no Tokio runtime available; build inside a runtime or pass one with `runtime`"
                        .to_string(),
                )
            })?,
        };

        Ok(CallDispatcher {
            state: self.state,
            options: self.options,
            metrics: self
                .metrics
                .unwrap_or_else(|| Arc::new(NoopMetricsRecorder)),
            runtime,
            in_flight: Arc::new(AtomicU64::new(0)),
            latest: Mutex::new(None),
        })
    }
}

/// The caller's view of one call.
///
/// Dropping the handle does not cancel the call.
#[derive(Debug)]
pub struct CallHandle {
    id: CallId,
    control: Arc<CallControl>,
    outcome: oneshot::Receiver<CallOutcome>,
}

impl CallHandle {
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Cancel the call. Returns `false` if it had already settled.
    pub fn cancel(&self) -> bool {
        self.control.cancel("cancelled by caller")
    }

    pub fn is_finished(&self) -> bool {
        self.control.is_finished()
    }

    /// Wait for the call's terminal outcome.
    pub async fn outcome(self) -> CallOutcome {
        self.outcome.await.unwrap_or_else(|_| {
            CallOutcome::failed(ErrorKind::Cancelled, "call was dropped before it settled")
        })
    }

    /// Wait for the call and return its device payload.
    pub async fn wait(self) -> Result<DeviceInfo> {
        match self.outcome().await {
            CallOutcome::Succeeded(info) => Ok(info),
            CallOutcome::Failed { kind, message } => Err(DevinfoError::call(kind, message)),
            other => Err(DevinfoError::Internal(format!(
                "call settled in non-terminal state '{}'",
                other
            ))),
        }
    }
}

/// Shared per-call bookkeeping. Settles the call at most once.
pub(crate) struct CallControl {
    id: CallId,
    endpoint: String,
    started: Instant,
    finished: AtomicBool,
    state: ResultState,
    metrics: Arc<dyn MetricsRecorder>,
    in_flight: Arc<AtomicU64>,
    connection: Weak<ConnectionInner>,
    outcome_tx: Mutex<Option<oneshot::Sender<CallOutcome>>>,
    abort_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl CallControl {
    pub(crate) fn id(&self) -> CallId {
        self.id
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self, reason: &str) -> bool {
        self.finish(CallOutcome::failed(ErrorKind::Cancelled, reason))
    }

    /// Settle the call with `outcome`. Returns `false` if it was already
    /// settled, in which case `outcome` is discarded.
    fn finish(&self, outcome: CallOutcome) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            debug!(call = %self.id, %outcome, "call already settled; discarding outcome");
            return false;
        }

        let latency = self.started.elapsed().as_secs_f64();
        let label = match &outcome {
            CallOutcome::Failed { kind, message } => {
                warn!(call = %self.id, endpoint = %self.endpoint, %kind, %message, "call failed");
                kind.as_str()
            }
            _ => {
                debug!(call = %self.id, endpoint = %self.endpoint, latency, "call succeeded");
                "succeeded"
            }
        };
        self.metrics
            .record_call_end(&self.endpoint, label, Some(latency));
        let remaining = self
            .in_flight
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1);
        self.metrics.set_in_flight(remaining);

        if let Some(connection) = self.connection.upgrade() {
            connection.deregister(self.id);
        }

        if !self.state.publish(self.id, outcome.clone()) {
            debug!(call = %self.id, "call is no longer the latest; shared state untouched");
        }

        if let Some(tx) = lock(&self.outcome_tx).take() {
            let _ = tx.send(outcome);
        }
        if let Some(tx) = lock(&self.abort_tx).take() {
            let _ = tx.send(());
        }

        true
    }
}

impl fmt::Debug for CallControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallControl")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Run one call to its first signal, deadline or abort.
async fn drive(
    control: Arc<CallControl>,
    work: BoxFuture<'static, ()>,
    mut signals: mpsc::UnboundedReceiver<TransportSignal>,
    abort: oneshot::Receiver<()>,
    timeout: Option<Duration>,
) {
    let work = tokio::spawn(work);
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        _ = abort => None,
        signal = signals.recv() => Some(outcome_from_signal(signal)),
        _ = deadline => Some(CallOutcome::failed(
            ErrorKind::Timeout,
            format!(
                "no response within {}ms",
                timeout.map(|limit| limit.as_millis()).unwrap_or_default()
            ),
        )),
    };

    // Stop the transport's I/O and free whatever it still holds.
    work.abort();
    signals.close();
    while let Ok(extra) = signals.try_recv() {
        warn!(call = %control.id, signal = ?extra, "discarding extra transport signal");
        control
            .metrics
            .record_error(Some(control.endpoint.as_str()), "discarded_signal");
    }

    if let Some(outcome) = outcome {
        control.finish(outcome);
    }
}

fn outcome_from_signal(signal: Option<TransportSignal>) -> CallOutcome {
    match signal {
        Some(TransportSignal::Response(response)) => match response.device {
            Some(device) => CallOutcome::Succeeded(device.into()),
            None => CallOutcome::failed(ErrorKind::NoData, "response did not contain device info"),
        },
        Some(TransportSignal::Error(err)) => CallOutcome::failed(err.kind, err.message),
        None => CallOutcome::failed(
            ErrorKind::TransportFailure,
            "transport finished without a response",
        ),
    }
}
