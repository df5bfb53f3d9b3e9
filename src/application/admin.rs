use super::ledger::{ApplyOutcome, PaymentLedger};
use super::velocity::VelocityGuard;
use crate::domain::event::{EventId, EventRecord};
use crate::domain::permit::ApplicationId;
use crate::domain::state_machine::Trigger;
use crate::error::{PaymentError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

/// Manual overrides for operators. Each action goes through the ledger and
/// leaves an `adm_` audit event naming the operator.
pub struct AdminService {
    ledger: Arc<PaymentLedger>,
    velocity: Arc<VelocityGuard>,
}

impl AdminService {
    pub fn new(ledger: Arc<PaymentLedger>, velocity: Arc<VelocityGuard>) -> Self {
        Self { ledger, velocity }
    }

    /// Marks the payment as received after an out-of-band check.
    #[instrument(skip(self, notes))]
    pub async fn verify_payment(
        &self,
        application_id: ApplicationId,
        admin_id: &str,
        notes: Option<&str>,
    ) -> Result<ApplyOutcome> {
        let record = EventRecord::new(
            EventId::synthetic("adm"),
            "admin_verify_payment",
            json!({"admin_id": admin_id, "notes": notes}),
        );
        self.override_status(application_id, Trigger::PaymentSucceeded, record)
            .await
    }

    #[instrument(skip(self, reason))]
    pub async fn reject_payment(
        &self,
        application_id: ApplicationId,
        admin_id: &str,
        reason: &str,
    ) -> Result<ApplyOutcome> {
        let record = EventRecord::new(
            EventId::synthetic("adm"),
            "admin_reject_payment",
            json!({"admin_id": admin_id, "reason": reason}),
        );
        self.override_status(application_id, Trigger::PaymentFailed, record)
            .await
    }

    pub async fn reset_velocity(&self, user_id: &str) -> Result<()> {
        self.velocity.reset_velocity(user_id).await?;
        info!(user_id, "Velocity counters reset by operator");
        Ok(())
    }

    async fn override_status(
        &self,
        application_id: ApplicationId,
        trigger: Trigger,
        record: EventRecord,
    ) -> Result<ApplyOutcome> {
        match self.ledger.apply(application_id, trigger, record).await? {
            ApplyOutcome::Rejected { status, reason } => {
                Err(PaymentError::TransitionRejected { status, reason })
            }
            outcome => {
                info!(%application_id, %trigger, status = ?outcome.status(), "Admin override applied");
                Ok(outcome)
            }
        }
    }
}
