use super::ledger::{ApplyOutcome, PaymentLedger};
use super::recovery::with_timeout;
use super::velocity::VelocityGuard;
use crate::domain::event::{EventId, EventOutcome, EventRecord};
use crate::domain::gateway::{CreateIntent, IntentStatus, PaymentIntent, PaymentMethod};
use crate::domain::permit::{ApplicationId, ApplicationStatus};
use crate::domain::ports::PaymentGatewayRef;
use crate::domain::state_machine::{RejectReason, Trigger};
use crate::domain::velocity::Actor;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub application_id: ApplicationId,
    pub actor: Actor,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentStarted {
    pub application_id: ApplicationId,
    pub gateway_reference: String,
    pub status: ApplicationStatus,
    pub intent_status: IntentStatus,
    /// Handed to the client to finish the payment (card action, voucher).
    pub client_secret: Option<String>,
}

/// Opens payment attempts on the gateway and cancels them.
pub struct PaymentInitiator {
    ledger: Arc<PaymentLedger>,
    gateway: PaymentGatewayRef,
    velocity: Arc<VelocityGuard>,
    currency: String,
    gateway_timeout: Duration,
}

impl PaymentInitiator {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        gateway: PaymentGatewayRef,
        velocity: Arc<VelocityGuard>,
        currency: impl Into<String>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            gateway,
            velocity,
            currency: currency.into(),
            gateway_timeout,
        }
    }

    fn attempt_record(&self, event_type: &str, payload: serde_json::Value) -> EventRecord {
        EventRecord::new(EventId::synthetic("pay"), event_type, payload)
    }

    /// Starts a new attempt for the application.
    ///
    /// The application must exist and accept a payment before velocity
    /// limits are consulted, so rejected requests never use up the
    /// applicant's allowance. A denied attempt never reaches the gateway.
    /// Every attempt gets a fresh gateway reference.
    #[instrument(skip(self, request), fields(application_id = %request.application_id, method = %request.method))]
    pub async fn start_payment(&self, request: PaymentRequest) -> Result<PaymentStarted> {
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::ValidationError(format!(
                "Payment amount must be positive, got {}",
                request.amount
            )));
        }

        let id = request.application_id;
        let application = self
            .ledger
            .application(id)
            .await?
            .ok_or(PaymentError::ApplicationNotFound(id))?;
        if !matches!(
            application.status,
            ApplicationStatus::AwaitingPayment | ApplicationStatus::PaymentFailed
        ) {
            let reason = if application.status.is_terminal() {
                RejectReason::TerminalState
            } else {
                RejectReason::InvalidEdge
            };
            return Err(PaymentError::TransitionRejected {
                status: application.status,
                reason,
            });
        }

        // Only attempts against a payable application count toward the limits.
        let decision = self.velocity.check_velocity(&request.actor, request.amount).await;
        if decision.degraded {
            return Err(PaymentError::CounterStoreUnavailable(
                "velocity counters could not be consulted".to_string(),
            ));
        }
        if !decision.allowed {
            return Err(PaymentError::VelocityExceeded(decision.violations));
        }

        let create = CreateIntent {
            application_id: id,
            amount: request.amount,
            currency: self.currency.clone(),
            method: request.method,
            customer_email: request.actor.email.clone(),
            idempotency_key: format!("{}-{}", id, Uuid::new_v4().simple()),
        };
        let mut intent = with_timeout(self.gateway_timeout, self.gateway.create_intent(create)).await?;

        if request.method == PaymentMethod::Card {
            intent = match with_timeout(self.gateway_timeout, self.gateway.confirm_intent(&intent.id)).await {
                Ok(confirmed) => confirmed,
                Err(e) => {
                    warn!(gateway_reference = %intent.id, error = %e, "Card confirmation failed");
                    let record = self.attempt_record(
                        "payment_attempt_failed",
                        json!({"gateway_reference": intent.id, "error": e.to_string()}),
                    );
                    self.ledger.record(Some(id), record, EventOutcome::Observed).await?;
                    return Err(e);
                }
            };
        }

        let record = self.attempt_record(
            "payment_attempt",
            json!({
                "gateway_reference": intent.id,
                "amount": request.amount,
                "currency": self.currency,
                "method": request.method,
                "intent_status": intent.status,
            }),
        );
        let mut outcome = self.ledger.begin_attempt(id, &intent.id, record).await?;
        if let ApplyOutcome::Rejected { status, reason } = outcome {
            return Err(PaymentError::TransitionRejected { status, reason });
        }

        // Synchronous card results settle right away; the webhook that
        // follows becomes a no-op.
        if let Some(trigger) = self.immediate_trigger(&intent) {
            let record = self.attempt_record(
                "payment_attempt_settled",
                json!({"gateway_reference": intent.id, "intent_status": intent.status}),
            );
            outcome = self.ledger.apply(id, trigger, record).await?;
        }

        let status = match outcome.status() {
            Some(status) => status,
            None => self
                .ledger
                .application(id)
                .await?
                .map(|a| a.status)
                .ok_or(PaymentError::ApplicationNotFound(id))?,
        };
        info!(gateway_reference = %intent.id, %status, intent_status = %intent.status, "Payment attempt started");

        Ok(PaymentStarted {
            application_id: id,
            gateway_reference: intent.id,
            status,
            intent_status: intent.status,
            client_secret: intent.client_secret,
        })
    }

    fn immediate_trigger(&self, intent: &PaymentIntent) -> Option<Trigger> {
        if intent.status == IntentStatus::Succeeded {
            Some(Trigger::PaymentSucceeded)
        } else if intent.is_failed() {
            Some(Trigger::PaymentFailed)
        } else {
            None
        }
    }

    /// Cancels the application's payment: the active intent is cancelled on
    /// the gateway first, then the application is moved to `CANCELLED`.
    #[instrument(skip(self))]
    pub async fn cancel_payment(&self, id: ApplicationId) -> Result<ApplicationStatus> {
        let application = self
            .ledger
            .application(id)
            .await?
            .ok_or(PaymentError::ApplicationNotFound(id))?;

        if application.status == ApplicationStatus::PaymentProcessing {
            let reference = application
                .payment_processor_order_id
                .clone()
                .ok_or(PaymentError::NoActivePayment(id))?;
            let intent =
                with_timeout(self.gateway_timeout, self.gateway.cancel_intent(&reference)).await?;
            let record = self.attempt_record(
                "payment_attempt_cancelled",
                json!({"gateway_reference": reference, "intent_status": intent.status}),
            );
            self.ledger.apply(id, Trigger::PaymentFailed, record).await?;
        }

        let record = self.attempt_record(
            "application_cancelled",
            json!({"gateway_reference": application.payment_processor_order_id}),
        );
        match self.ledger.apply(id, Trigger::Cancelled, record).await? {
            ApplyOutcome::Rejected { status, reason } => {
                Err(PaymentError::TransitionRejected { status, reason })
            }
            outcome => {
                let status = outcome.status().unwrap_or(ApplicationStatus::Cancelled);
                info!(%status, "Application cancelled");
                Ok(status)
            }
        }
    }
}
