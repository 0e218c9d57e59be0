//! Result State: the shared "latest call" slot.
//!
//! [`ResultState`] holds the outcome of the most recent call and nothing else.
//! It knows nothing about how the outcome is displayed; observers either poll
//! [`ResultState::get`] or await changes through an [`OutcomeSubscription`].
//!
//! Writes go through a `tokio::sync::watch` channel, so a read always sees the
//! most recent completed write.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use devinfo_core::CallOutcome;

use crate::dispatcher::CallId;

#[derive(Debug, Clone, Default)]
struct Slot {
    call: Option<CallId>,
    outcome: CallOutcome,
}

/// Thread-safe holder of the latest [`CallOutcome`].
///
/// Cloning is cheap and every clone refers to the same slot.
#[derive(Debug, Clone)]
pub struct ResultState {
    tx: Arc<watch::Sender<Slot>>,
}

impl ResultState {
    /// Create a state holding [`CallOutcome::Idle`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Overwrite the current outcome. Always succeeds.
    pub fn set(&self, outcome: CallOutcome) {
        self.tx.send_modify(|slot| slot.outcome = outcome);
    }

    /// The latest outcome.
    pub fn get(&self) -> CallOutcome {
        self.tx.borrow().outcome.clone()
    }

    /// `true` iff the latest call is in flight.
    pub fn is_loading(&self) -> bool {
        self.tx.borrow().outcome.is_loading()
    }

    /// The call currently tracked as the latest, if any.
    pub fn current_call(&self) -> Option<CallId> {
        self.tx.borrow().call
    }

    /// Observe future changes.
    pub fn subscribe(&self) -> OutcomeSubscription {
        OutcomeSubscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Make `call` the latest call and mark it in flight.
    pub(crate) fn begin(&self, call: CallId) {
        self.tx.send_modify(|slot| {
            if let Some(previous) = slot.call.filter(|_| slot.outcome.is_loading()) {
                debug!(%call, %previous, "new call supersedes in-flight call");
            }
            slot.call = Some(call);
            slot.outcome = CallOutcome::InFlight;
        });
    }

    /// Record the terminal outcome of `call`.
    ///
    /// Only the latest call may write, and only once out of `InFlight`.
    /// Returns whether the slot was updated.
    pub(crate) fn publish(&self, call: CallId, outcome: CallOutcome) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.call != Some(call) {
                return false;
            }
            if !slot.outcome.can_transition_to(&outcome) {
                warn!(%call, from = %slot.outcome, to = %outcome, "ignoring out-of-order outcome");
                return false;
            }
            slot.outcome = outcome;
            true
        })
    }
}

impl Default for ResultState {
    fn default() -> Self {
        Self::new()
    }
}

/// A push-style view of a [`ResultState`].
///
/// Rapid successive writes may be coalesced: an observer is guaranteed to see
/// the latest outcome, not every intermediate one.
#[derive(Debug)]
pub struct OutcomeSubscription {
    rx: watch::Receiver<Slot>,
}

impl OutcomeSubscription {
    /// The outcome as of now.
    pub fn current(&self) -> CallOutcome {
        self.rx.borrow().outcome.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().outcome.is_loading()
    }

    /// Wait for the next change and return the new outcome.
    ///
    /// Returns `None` once every [`ResultState`] handle has been dropped.
    pub async fn changed(&mut self) -> Option<CallOutcome> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().outcome.clone())
    }
}
