use super::permit::{ApplicationId, ApplicationStatus};
use super::state_machine::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of an audit record.
///
/// Gateway ids come from webhook deliveries and are the idempotency key.
/// Synthetic ids are minted by the engine itself (recovery, admin, payment
/// attempts, sweeps) and live in a separate key space so they can never
/// collide with a gateway id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EventId {
    Gateway(String),
    Synthetic(String),
}

impl EventId {
    pub fn synthetic(prefix: &str) -> Self {
        Self::Synthetic(format!("{}_{}", prefix, Uuid::new_v4().simple()))
    }

    /// Namespaced storage key.
    pub fn key(&self) -> String {
        match self {
            Self::Gateway(id) => format!("gw:{}", id),
            Self::Synthetic(id) => format!("syn:{}", id),
        }
    }

    pub fn gateway_id(&self) -> Option<&str> {
        match self {
            Self::Gateway(id) => Some(id),
            Self::Synthetic(_) => None,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway(id) | Self::Synthetic(id) => f.write_str(id),
        }
    }
}

/// What processing the event did to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EventOutcome {
    Applied {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    NoOp {
        status: ApplicationStatus,
    },
    Rejected {
        status: ApplicationStatus,
        reason: RejectReason,
    },
    /// Recorded without a state-machine trigger.
    Observed,
    /// No application could be matched to the event.
    Unmatched,
}

impl EventOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::NoOp { .. } => "noop",
            Self::Rejected { .. } => "rejected",
            Self::Observed => "observed",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Append-only audit record of a gateway event or an engine action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: EventId,
    pub application_id: Option<ApplicationId>,
    pub event_type: String,
    /// Raw payload snapshot as received or produced.
    pub payload: serde_json::Value,
    pub outcome: EventOutcome,
    pub processed_at: DateTime<Utc>,
}

/// Event data supplied by the caller of a transition; the ledger fills in the
/// outcome and processing time.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_id: EventId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl EventRecord {
    pub fn new(event_id: EventId, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn into_event(
        self,
        application_id: Option<ApplicationId>,
        outcome: EventOutcome,
        processed_at: DateTime<Utc>,
    ) -> PaymentEvent {
        PaymentEvent {
            event_id: self.event_id,
            application_id,
            event_type: self.event_type,
            payload: self.payload,
            outcome,
            processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_and_synthetic_keys_never_collide() {
        let gateway = EventId::Gateway("rcv_1".to_string());
        let synthetic = EventId::Synthetic("rcv_1".to_string());
        assert_ne!(gateway.key(), synthetic.key());
        assert_eq!(gateway.gateway_id(), Some("rcv_1"));
        assert_eq!(synthetic.gateway_id(), None);
    }

    #[test]
    fn test_synthetic_ids_are_prefixed_and_unique() {
        let a = EventId::synthetic("rcv");
        let b = EventId::synthetic("rcv");
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("rcv_"));
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = EventOutcome::Applied {
            from: ApplicationStatus::PaymentProcessing,
            to: ApplicationStatus::PaymentReceived,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "applied");
        assert_eq!(json["to"], "PAYMENT_RECEIVED");
        assert_eq!(outcome.label(), "applied");
    }
}
