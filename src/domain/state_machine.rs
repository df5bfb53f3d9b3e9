//! Legal application states and the edges between them.
//!
//! Everything here is pure: the [`StateMachine`] looks at an application, a
//! trigger and the current time and says what the next status is. Persisting
//! the result is the job of the payment ledger.

use super::permit::{Application, ApplicationStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Business event that drives an application from one status to another.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Trigger {
    PaymentInitiated,
    PaymentSucceeded,
    PaymentFailed,
    PermitGenerationStarted,
    PermitGenerated,
    PermitGenerationFailed,
    Cancelled,
    Expired,
    RenewalRequested,
    RenewalApproved,
    RenewalRejected,
}

impl Trigger {
    /// Triggers that keep being re-applied until they stop moving the
    /// application. `payment_succeeded` first reopens a failed payment and then
    /// settles it.
    pub fn is_settling(self) -> bool {
        matches!(self, Self::PaymentSucceeded)
    }
}

/// Why a transition was refused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    /// The application already reached a terminal status.
    TerminalState,
    /// A failure arrived for a payment already confirmed.
    SuccessAlreadyRecorded,
    /// The gateway settled too long after the local failure was recorded.
    ReopenWindowElapsed,
    /// No edge exists for this trigger from the current status.
    InvalidEdge,
}

/// Result of evaluating a trigger against the current status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(ApplicationStatus),
    /// The application is already where the trigger would take it.
    NoOp,
    Rejected(RejectReason),
}

/// The payment state machine.
///
/// The only tunable is the reopen window: how long after a recorded failure a
/// late gateway success may still reopen the payment.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    reopen_window: Duration,
}

impl StateMachine {
    pub fn new(reopen_window: Duration) -> Self {
        Self { reopen_window }
    }

    pub fn reopen_window(&self) -> Duration {
        self.reopen_window
    }

    /// Evaluates one step.
    pub fn next(&self, application: &Application, trigger: Trigger, now: DateTime<Utc>) -> Transition {
        use ApplicationStatus::*;
        use Transition::{Applied, NoOp, Rejected};

        let current = application.status;

        match trigger {
            Trigger::PaymentInitiated => match current {
                AwaitingPayment | PaymentFailed => Applied(PaymentProcessing),
                PaymentProcessing => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::PaymentSucceeded => match current {
                AwaitingPayment | PaymentProcessing => Applied(PaymentReceived),
                PaymentFailed => {
                    if now - application.updated_at <= self.reopen_window {
                        Applied(PaymentProcessing)
                    } else {
                        Rejected(RejectReason::ReopenWindowElapsed)
                    }
                }
                s if s.is_payment_settled() => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::PaymentFailed => match current {
                AwaitingPayment | PaymentProcessing => Applied(PaymentFailed),
                PaymentFailed => NoOp,
                s if s.is_payment_settled() => Rejected(RejectReason::SuccessAlreadyRecorded),
                _ => Self::refuse(current),
            },
            Trigger::PermitGenerationStarted => match current {
                PaymentReceived | ErrorGeneratingPermit => Applied(GeneratingPermit),
                GeneratingPermit => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::PermitGenerated => match current {
                GeneratingPermit => Applied(PermitReady),
                PermitReady => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::PermitGenerationFailed => match current {
                GeneratingPermit => Applied(ErrorGeneratingPermit),
                ErrorGeneratingPermit => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::Cancelled => match current {
                AwaitingPayment | PaymentFailed => Applied(Cancelled),
                Cancelled => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::Expired => match current {
                AwaitingPayment | PaymentFailed => Applied(Expired),
                Expired => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::RenewalRequested => match current {
                PermitReady => Applied(RenewalPending),
                RenewalPending => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::RenewalApproved => match current {
                RenewalPending => Applied(RenewalApproved),
                RenewalApproved => NoOp,
                _ => Self::refuse(current),
            },
            Trigger::RenewalRejected => match current {
                RenewalPending => Applied(RenewalRejected),
                RenewalRejected => NoOp,
                _ => Self::refuse(current),
            },
        }
    }

    fn refuse(current: ApplicationStatus) -> Transition {
        if current.is_terminal() {
            Transition::Rejected(RejectReason::TerminalState)
        } else {
            Transition::Rejected(RejectReason::InvalidEdge)
        }
    }
}
