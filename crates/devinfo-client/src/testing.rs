//! Scripted transports for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use devinfo_core::{DevinfoError, Endpoint, Result};
use devinfo_telemetry::MetricsRecorder;

use crate::proto;
use crate::transport::{Connector, SignalSender, Transport, TransportSignal};

/// What a scripted call does once started.
#[derive(Debug, Clone)]
pub enum Script {
    /// Wait `delay`, then push every signal in order.
    Respond {
        signals: Vec<TransportSignal>,
        delay: Duration,
    },

    /// Push each signal after its delay from a task of its own, so sends
    /// continue after the call has settled and its future was dropped.
    Detached(Vec<(Duration, TransportSignal)>),

    /// Finish without sending anything.
    Silent,

    /// Never finish.
    Hang,
}

impl Script {
    pub fn respond(signals: Vec<TransportSignal>) -> Self {
        Self::respond_after(Duration::ZERO, signals)
    }

    pub fn respond_after(delay: Duration, signals: Vec<TransportSignal>) -> Self {
        Self::Respond { signals, delay }
    }
}

/// A [`Transport`] that plays back per-device scripts.
#[derive(Debug)]
pub struct ScriptedTransport {
    default: Script,
    per_device: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<String>>,
    released: Arc<AtomicUsize>,
    rejected: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(default: Script) -> Arc<Self> {
        Arc::new(Self {
            default,
            per_device: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            released: Arc::new(AtomicUsize::new(0)),
            rejected: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Use `script` for calls about `device_id`.
    pub fn with_device(self: Arc<Self>, device_id: &str, script: Script) -> Arc<Self> {
        self.per_device
            .lock()
            .unwrap()
            .insert(device_id.to_string(), script);
        self
    }

    /// Device ids seen so far, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of call futures that have been dropped, finished or aborted.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Number of signals the dispatcher refused because the call had settled.
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for ScriptedTransport {
    fn unary(&self, request: proto::DeviceRequest, signals: SignalSender) -> BoxFuture<'static, ()> {
        let script = self
            .per_device
            .lock()
            .unwrap()
            .get(&request.cpe_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        self.requests.lock().unwrap().push(request.cpe_id);
        let guard = ReleaseGuard(self.released.clone());
        let rejected = self.rejected.clone();

        async move {
            let _guard = guard;
            match script {
                Script::Respond { signals: queued, delay } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    for signal in queued {
                        signals.send(signal);
                    }
                }
                Script::Detached(steps) => {
                    tokio::spawn(async move {
                        for (delay, signal) in steps {
                            tokio::time::sleep(delay).await;
                            if !signals.send(signal) {
                                rejected.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    });
                }
                Script::Silent => drop(signals),
                Script::Hang => futures::future::pending::<()>().await,
            }
        }
        .boxed()
    }
}

/// A [`Connector`] that hands out one shared scripted transport.
#[derive(Debug)]
pub struct FakeConnector {
    transport: Arc<ScriptedTransport>,
    fail: Option<String>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(transport: Arc<ScriptedTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            fail: None,
            connects: AtomicUsize::new(0),
        })
    }

    /// A connector whose every `connect` fails with `message`.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            transport: ScriptedTransport::new(Script::Hang),
            fail: Some(message.to_string()),
            connects: AtomicUsize::new(0),
        })
    }

    /// Number of successful connects.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        async move {
            if let Some(message) = &self.fail {
                return Err(DevinfoError::connection(endpoint.authority(), message.as_str()));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(self.transport.clone() as Arc<dyn Transport>)
        }
        .boxed()
    }
}

/// A [`MetricsRecorder`] that remembers what it was told.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    call_ends: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl CountingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Outcome labels of finished calls, in order.
    pub fn call_ends(&self) -> Vec<String> {
        self.call_ends.lock().unwrap().clone()
    }

    /// How many errors of `kind` were recorded.
    pub fn errors_of(&self, kind: &str) -> usize {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .filter(|recorded| recorded.as_str() == kind)
            .count()
    }
}

impl MetricsRecorder for CountingMetrics {
    fn record_call_start(&self, _endpoint: &str) {}

    fn record_call_end(&self, _endpoint: &str, outcome: &str, _latency_secs: Option<f64>) {
        self.call_ends.lock().unwrap().push(outcome.to_string());
    }

    fn record_error(&self, _endpoint: Option<&str>, kind: &str) {
        self.errors.lock().unwrap().push(kind.to_string());
    }

    fn set_in_flight(&self, _count: u64) {}
}

/// The endpoint the device service is usually reached at.
pub fn sample_endpoint() -> Endpoint {
    Endpoint::plaintext("18.221.226.156", 50051).unwrap()
}

/// A successful response carrying a device with serial `serial`.
pub fn device_signal(serial: &str) -> TransportSignal {
    TransportSignal::Response(proto::DeviceResponse {
        device: Some(proto::DeviceInfo {
            serial_number: serial.to_string(),
            ip_address: "10.0.0.5".to_string(),
            status: "online".to_string(),
            manufacturer: "Acme".to_string(),
        }),
    })
}

/// Poll `condition` for up to a second.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
