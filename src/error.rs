use crate::domain::permit::{ApplicationId, ApplicationStatus};
use crate::domain::state_machine::RejectReason;
use crate::domain::velocity::Violation;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("Transition rejected from {status}: {reason}")]
    TransitionRejected {
        status: ApplicationStatus,
        reason: RejectReason,
    },
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("Payment gateway timed out after {0:?}")]
    GatewayTimeout(Duration),
    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),
    #[error("Velocity limits exceeded: {0:?}")]
    VelocityExceeded(Vec<Violation>),
    #[error("Velocity counters unavailable: {0}")]
    CounterStoreUnavailable(String),
    #[error("Application {0} is locked by another transition")]
    LockContention(ApplicationId),
    #[error("Application {0} already exists")]
    ApplicationExists(ApplicationId),
    #[error("Application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("Application {0} has no active payment")]
    NoActivePayment(ApplicationId),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl PaymentError {
    /// Infrastructure failures that a later attempt may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::GatewayUnavailable(_)
                | Self::GatewayTimeout(_)
                | Self::LockContention(_)
                | Self::CounterStoreUnavailable(_)
                | Self::IoError(_)
                | Self::InternalError(_)
        )
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for PaymentError {
    fn from(e: rocksdb::Error) -> Self {
        PaymentError::InternalError(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
