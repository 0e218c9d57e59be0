//! Call outcomes and their classification.
//!
//! A [`CallOutcome`] is the observable state of the latest device query:
//!
//! ```text
//! Idle ──► InFlight ──► Succeeded
//!             ▲    └──► Failed
//!             └──────────── (a new call starts)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::DeviceInfo;

/// Classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or connectivity failure, and any failure that could not be
    /// classified more precisely.
    TransportFailure,

    /// The remote service reported a failure.
    ServerError,

    /// The call succeeded but the response carried no device payload.
    NoData,

    /// The call was cancelled locally (caller, supersede or connection close).
    Cancelled,

    /// The per-call deadline expired.
    Timeout,
}

impl ErrorKind {
    /// A short, stable label suitable for logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportFailure => "transport_failure",
            Self::ServerError => "server_error",
            Self::NoData => "no_data",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of the latest call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallOutcome {
    /// No call has been issued yet.
    #[default]
    Idle,

    /// A call has been issued and has not finished.
    InFlight,

    /// The call finished with a device payload.
    Succeeded(DeviceInfo),

    /// The call finished with a classified failure.
    Failed { kind: ErrorKind, message: String },
}

impl CallOutcome {
    /// Create a failed outcome
    pub fn failed<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    /// `true` iff a call is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::InFlight)
    }

    /// Whether this outcome ends a call.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed { .. })
    }

    /// The device payload of a successful call.
    pub fn device(&self) -> Option<&DeviceInfo> {
        match self {
            Self::Succeeded(info) => Some(info),
            _ => None,
        }
    }

    /// The failure classification of a failed call.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Starting a call is allowed from any state that is not already in
    /// flight; a terminal state is only reachable from `InFlight`.
    pub fn can_transition_to(&self, next: &CallOutcome) -> bool {
        match (self, next) {
            (Self::InFlight, Self::InFlight) => false,
            (_, Self::InFlight) => true,
            (Self::InFlight, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InFlight => write!(f, "in flight"),
            Self::Succeeded(info) => write!(f, "succeeded: {}", info),
            Self::Failed { kind, message } => write!(f, "failed ({}): {}", kind, message),
        }
    }
}

/// What happens to a call that is still in flight when a newer call replaces
/// it as the latest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupersedePolicy {
    /// Cancel the older call.
    #[default]
    Cancel,

    /// Let the older call run to completion in the background. Its result is
    /// still delivered to its own handle but never to the shared state.
    Detach,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceInfo {
        DeviceInfo::new("SN1", "10.0.0.5", "online", "Acme")
    }

    #[test]
    fn test_transitions_follow_state_machine() {
        let idle = CallOutcome::Idle;
        let in_flight = CallOutcome::InFlight;
        let ok = CallOutcome::Succeeded(sample());
        let failed = CallOutcome::failed(ErrorKind::Timeout, "late");

        assert!(idle.can_transition_to(&in_flight));
        assert!(in_flight.can_transition_to(&ok));
        assert!(in_flight.can_transition_to(&failed));
        assert!(ok.can_transition_to(&in_flight));
        assert!(failed.can_transition_to(&in_flight));

        assert!(!idle.can_transition_to(&ok));
        assert!(!in_flight.can_transition_to(&in_flight));
        assert!(!ok.can_transition_to(&failed));
        assert!(!failed.can_transition_to(&ok));
        assert!(!in_flight.can_transition_to(&CallOutcome::Idle));
    }

    #[test]
    fn test_accessors() {
        assert!(CallOutcome::InFlight.is_loading());
        assert!(!CallOutcome::Idle.is_loading());

        let ok = CallOutcome::Succeeded(sample());
        assert!(ok.is_terminal());
        assert_eq!(ok.device(), Some(&sample()));
        assert_eq!(ok.error_kind(), None);

        let failed = CallOutcome::failed(ErrorKind::NoData, "empty");
        assert_eq!(failed.error_kind(), Some(ErrorKind::NoData));
        assert!(failed.device().is_none());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(CallOutcome::Idle.to_string(), "idle");
        assert_eq!(
            CallOutcome::failed(ErrorKind::ServerError, "not found").to_string(),
            "failed (server_error): not found"
        );
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let json = serde_json::to_value(CallOutcome::Succeeded(sample())).unwrap();
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["serial_number"], "SN1");

        let json = serde_json::to_value(CallOutcome::failed(ErrorKind::Cancelled, "closed")).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "cancelled");
    }

    #[test]
    fn test_supersede_policy_parses_lowercase() {
        let policy: SupersedePolicy = serde_json::from_str("\"detach\"").unwrap();
        assert_eq!(policy, SupersedePolicy::Detach);
        assert_eq!(SupersedePolicy::default(), SupersedePolicy::Cancel);
    }
}
