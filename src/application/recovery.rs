//! Pull-based reconciliation against the gateway.
//!
//! Webhooks can be lost or arrive late. Recovery asks the gateway for the
//! live state of an intent and drives the application to match it through
//! the same locked ledger path the webhooks use.

use super::ledger::{ApplyOutcome, PaymentLedger};
use crate::config::{RecoveryConfig, chrono_duration};
use crate::domain::event::{EventId, EventOutcome, EventRecord};
use crate::domain::gateway::{IntentStatus, PaymentIntent};
use crate::domain::permit::{Application, ApplicationId, ApplicationStatus};
use crate::domain::ports::PaymentGatewayRef;
use crate::domain::state_machine::Trigger;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::{AsRefStr, Display};
use tracing::{debug, info, instrument, warn};

/// Who asked for the recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryContext {
    Sweep,
    Read,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryReason {
    PaymentSucceeded,
    PaymentFailed,
    /// No definitive remote state yet, or the gateway could not be reached.
    StillPending,
    ReferenceMismatch,
    ApplicationNotFound,
    /// The gateway reports a failure for a payment already settled locally.
    ConflictingFinalState,
    TransitionRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub reason: RecoveryReason,
}

impl RecoveryResult {
    fn settled(reason: RecoveryReason) -> Self {
        Self {
            success: true,
            reason,
        }
    }

    fn unresolved(reason: RecoveryReason) -> Self {
        Self {
            success: false,
            reason,
        }
    }
}

#[async_trait]
pub trait Recovery: Send + Sync {
    async fn attempt_recovery(
        &self,
        application_id: ApplicationId,
        gateway_reference: &str,
        context: RecoveryContext,
    ) -> Result<RecoveryResult>;
}

/// Bounds a gateway call by `limit`.
pub(crate) async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| PaymentError::GatewayTimeout(limit))?
}

fn is_gateway_error(e: &PaymentError) -> bool {
    matches!(
        e,
        PaymentError::GatewayUnavailable(_)
            | PaymentError::GatewayTimeout(_)
            | PaymentError::GatewayRejected(_)
    )
}

pub struct RecoveryService {
    ledger: Arc<PaymentLedger>,
    gateway: PaymentGatewayRef,
    config: RecoveryConfig,
    gateway_timeout: Duration,
}

impl RecoveryService {
    pub fn new(
        ledger: Arc<PaymentLedger>,
        gateway: PaymentGatewayRef,
        config: RecoveryConfig,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            gateway,
            config,
            gateway_timeout,
        }
    }

    /// Reads an application, first reconciling it when it has been waiting
    /// on the gateway for longer than the read-recovery threshold.
    ///
    /// A failed recovery is logged; the read still returns the stored row.
    pub async fn read_through(&self, id: ApplicationId) -> Result<Option<Application>> {
        let Some(application) = self.ledger.application(id).await? else {
            return Ok(None);
        };

        let waiting = Utc::now() - application.updated_at;
        if application.status != ApplicationStatus::PaymentProcessing
            || waiting <= chrono_duration(self.config.read_recovery_after)
        {
            return Ok(Some(application));
        }
        let Some(reference) = application.payment_processor_order_id.clone() else {
            return Ok(Some(application));
        };

        match self.attempt_recovery(id, &reference, RecoveryContext::Read).await {
            Ok(result) => debug!(application_id = %id, reason = %result.reason, "Read-through recovery finished"),
            Err(e) => warn!(application_id = %id, error = %e, "Read-through recovery failed"),
        }
        self.ledger.application(id).await
    }

    fn record(
        &self,
        reference: &str,
        context: RecoveryContext,
        remote: Option<&PaymentIntent>,
        detail: serde_json::Value,
    ) -> EventRecord {
        EventRecord::new(
            EventId::synthetic("rcv"),
            "recovery_attempt",
            json!({
                "context": context,
                "gateway_reference": reference,
                "remote_status": remote.map(|i| i.status),
                "detail": detail,
            }),
        )
    }

    /// Records an attempt that carries no transition.
    async fn conclude(
        &self,
        application_id: Option<ApplicationId>,
        record: EventRecord,
        result: RecoveryResult,
    ) -> Result<RecoveryResult> {
        self.ledger
            .record(application_id, record, EventOutcome::Observed)
            .await?;
        Ok(result)
    }

    async fn drive(
        &self,
        id: ApplicationId,
        trigger: Trigger,
        record: EventRecord,
        reason: RecoveryReason,
    ) -> Result<RecoveryResult> {
        match self.ledger.apply(id, trigger, record).await? {
            ApplyOutcome::Applied { .. } | ApplyOutcome::NoOp(_) | ApplyOutcome::Duplicate => {
                Ok(RecoveryResult::settled(reason))
            }
            ApplyOutcome::Rejected { status, reason } => {
                warn!(application_id = %id, %trigger, %status, %reason, "Recovery could not apply the remote state");
                Ok(RecoveryResult::unresolved(RecoveryReason::TransitionRejected))
            }
        }
    }

    /// Captures an authorized intent and reads it back.
    async fn capture(&self, reference: &str) -> Result<PaymentIntent> {
        with_timeout(self.gateway_timeout, self.gateway.capture_intent(reference)).await?;
        with_timeout(self.gateway_timeout, self.gateway.retrieve_intent(reference)).await
    }
}

#[async_trait]
impl Recovery for RecoveryService {
    #[instrument(skip(self))]
    async fn attempt_recovery(
        &self,
        application_id: ApplicationId,
        gateway_reference: &str,
        context: RecoveryContext,
    ) -> Result<RecoveryResult> {
        let Some(application) = self.ledger.application(application_id).await? else {
            warn!("Recovery requested for an unknown application");
            let record = self.record(gateway_reference, context, None, json!("application_not_found"));
            self.ledger.record(None, record, EventOutcome::Unmatched).await?;
            return Ok(RecoveryResult::unresolved(RecoveryReason::ApplicationNotFound));
        };

        if !application.has_reference(gateway_reference) {
            warn!(
                current = ?application.payment_processor_order_id,
                "Gateway reference is not the application's active payment"
            );
            let record = self.record(gateway_reference, context, None, json!("reference_mismatch"));
            return self
                .conclude(
                    Some(application_id),
                    record,
                    RecoveryResult::unresolved(RecoveryReason::ReferenceMismatch),
                )
                .await;
        }

        let mut intent = match with_timeout(
            self.gateway_timeout,
            self.gateway.retrieve_intent(gateway_reference),
        )
        .await
        {
            Ok(intent) => intent,
            Err(e) if is_gateway_error(&e) => {
                warn!(error = %e, "Gateway unreachable, leaving payment pending");
                let record = self.record(gateway_reference, context, None, json!(e.to_string()));
                return self
                    .conclude(
                        Some(application_id),
                        record,
                        RecoveryResult::unresolved(RecoveryReason::StillPending),
                    )
                    .await;
            }
            Err(e) => return Err(e),
        };

        if intent.status == IntentStatus::RequiresCapture {
            match self.capture(gateway_reference).await {
                Ok(captured) => {
                    info!(status = %captured.status, "Captured authorized payment");
                    intent = captured;
                }
                Err(e) if is_gateway_error(&e) => {
                    warn!(error = %e, "Capture failed, leaving payment pending");
                    let record =
                        self.record(gateway_reference, context, Some(&intent), json!(e.to_string()));
                    return self
                        .conclude(
                            Some(application_id),
                            record,
                            RecoveryResult::unresolved(RecoveryReason::StillPending),
                        )
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        let record = self.record(gateway_reference, context, Some(&intent), serde_json::Value::Null);
        let result = if intent.status == IntentStatus::Succeeded {
            self.drive(
                application_id,
                Trigger::PaymentSucceeded,
                record,
                RecoveryReason::PaymentSucceeded,
            )
            .await?
        } else if intent.is_failed() {
            if application.status.is_payment_settled() {
                warn!(local = %application.status, remote = %intent.status, "Gateway failure conflicts with a settled payment");
                self.conclude(
                    Some(application_id),
                    record,
                    RecoveryResult::unresolved(RecoveryReason::ConflictingFinalState),
                )
                .await?
            } else {
                self.drive(
                    application_id,
                    Trigger::PaymentFailed,
                    record,
                    RecoveryReason::PaymentFailed,
                )
                .await?
            }
        } else {
            debug!(remote = %intent.status, "No definitive remote state yet");
            self.conclude(
                Some(application_id),
                record,
                RecoveryResult::unresolved(RecoveryReason::StillPending),
            )
            .await?
        };

        info!(reason = %result.reason, success = result.success, "Recovery attempt finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let limit = Duration::from_millis(10);
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, PaymentError>(())
        };
        assert!(matches!(
            with_timeout(limit, slow).await,
            Err(PaymentError::GatewayTimeout(d)) if d == limit
        ));
        assert!(with_timeout(limit, async { Ok::<_, PaymentError>(1) }).await.is_ok());
    }

    #[test]
    fn test_reason_strings() {
        assert_eq!(RecoveryReason::StillPending.as_ref(), "still_pending");
        assert_eq!(
            serde_json::to_value(RecoveryReason::ConflictingFinalState).unwrap(),
            "conflicting_final_state"
        );
    }
}
