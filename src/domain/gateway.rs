use super::permit::ApplicationId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Status of a payment intent as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    /// Cash voucher paid at a retail counter; settles asynchronously.
    Oxxo,
}

impl PaymentMethod {
    pub fn is_cash_voucher(self) -> bool {
        matches!(self, Self::Oxxo)
    }
}

/// Why the last charge attempt on an intent failed. Unknown fields of the
/// gateway's error object are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PaymentFailure {
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }
}

/// Gateway-side payment object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    /// Present when the last charge attempt on the intent failed.
    #[serde(default)]
    pub last_payment_error: Option<PaymentFailure>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl PaymentIntent {
    /// The gateway reports a definitive failure for this intent.
    pub fn is_failed(&self) -> bool {
        match self.status {
            IntentStatus::Canceled => true,
            IntentStatus::RequiresPaymentMethod => self.last_payment_error.is_some(),
            _ => false,
        }
    }
}

/// Parameters for a new payment intent.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIntent {
    pub application_id: ApplicationId,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub customer_email: String,
    /// Sent as the gateway idempotency key so a retried create never makes a
    /// second intent.
    pub idempotency_key: String,
}
