use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumString};

/// Identifier of a permit application. Assigned at creation, never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub u64);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ApplicationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Lifecycle status of a permit application.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    AwaitingPayment,
    PaymentProcessing,
    PaymentReceived,
    PaymentFailed,
    GeneratingPermit,
    PermitReady,
    ErrorGeneratingPermit,
    Cancelled,
    Expired,
    RenewalPending,
    RenewalApproved,
    RenewalRejected,
}

impl ApplicationStatus {
    /// No further transition is possible out of these states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Expired | Self::RenewalApproved | Self::RenewalRejected
        )
    }

    /// States in which the outcome of a payment is still open.
    pub fn is_payment_transient(self) -> bool {
        matches!(self, Self::AwaitingPayment | Self::PaymentProcessing)
    }

    /// States reached only after the gateway confirmed the payment.
    pub fn is_payment_settled(self) -> bool {
        matches!(
            self,
            Self::PaymentReceived
                | Self::GeneratingPermit
                | Self::PermitReady
                | Self::ErrorGeneratingPermit
                | Self::RenewalPending
                | Self::RenewalApproved
                | Self::RenewalRejected
        )
    }
}

/// A permit request and the anchor of its payment lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub user_id: String,
    pub status: ApplicationStatus,
    /// Gateway reference of the current payment attempt.
    pub payment_processor_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Time of the last status transition.
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn new(id: ApplicationId, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            status: ApplicationStatus::AwaitingPayment,
            payment_processor_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `reference` is the gateway object of the current attempt.
    pub fn has_reference(&self, reference: &str) -> bool {
        self.payment_processor_order_id.as_deref() == Some(reference)
    }
}
