//! Inbound gateway webhooks.
//!
//! Deliveries are verified, de-duplicated on the gateway event id, resolved to
//! an application and mapped to a state-machine trigger. Every verified
//! delivery leaves exactly one audit event, whether or not it moved anything.

use super::ledger::{ApplyOutcome, PaymentLedger};
use super::signature::WebhookVerifier;
use crate::config::WebhookConfig;
use crate::domain::event::{EventId, EventOutcome, EventRecord};
use crate::domain::gateway::PaymentMethod;
use crate::domain::permit::{Application, ApplicationId};
use crate::domain::ports::CommitOutcome;
use crate::domain::state_machine::Trigger;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use strum::{AsRefStr, Display};
use tracing::{debug, info, instrument, warn};

/// Why a delivery was turned away. Nothing is written for either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum IngestRejection {
    SignatureInvalid,
    MalformedPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted {
        event_id: String,
        outcome: EventOutcome,
    },
    /// The event id was seen before; nothing was re-processed.
    Deduplicated { event_id: String },
    Rejected(IngestRejection),
}

#[derive(Debug, Deserialize)]
struct GatewayEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: EventObject,
}

/// The fields of an intent or charge object the engine reads.
#[derive(Debug, Default, Deserialize)]
struct EventObject {
    #[serde(default)]
    id: Option<String>,
    /// Set on charges: the intent the charge belongs to.
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    payment_method_details: Option<MethodDetails>,
}

#[derive(Debug, Deserialize)]
struct MethodDetails {
    #[serde(rename = "type")]
    method_type: String,
}

impl GatewayEvent {
    /// Maps the event to the trigger it carries, if any.
    fn trigger(&self) -> Option<Trigger> {
        match self.event_type.as_str() {
            "payment_intent.succeeded" => Some(Trigger::PaymentSucceeded),
            "charge.succeeded" if self.is_cash_voucher_charge() => Some(Trigger::PaymentSucceeded),
            "payment_intent.processing" => Some(Trigger::PaymentInitiated),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                Some(Trigger::PaymentFailed)
            }
            _ => None,
        }
    }

    fn is_cash_voucher_charge(&self) -> bool {
        self.data
            .object
            .payment_method_details
            .as_ref()
            .is_some_and(|d| d.method_type == PaymentMethod::Oxxo.as_ref())
    }

    /// Gateway reference of the intent this event concerns.
    fn reference(&self) -> Option<&str> {
        let object = &self.data.object;
        if self.event_type.starts_with("charge.") {
            object.payment_intent.as_deref()
        } else {
            object.id.as_deref()
        }
    }

    fn metadata_application_id(&self) -> Option<ApplicationId> {
        self.data
            .object
            .metadata
            .get("application_id")
            .and_then(|raw| raw.parse().ok())
    }
}

pub struct WebhookIngestor {
    ledger: Arc<PaymentLedger>,
    verifier: WebhookVerifier,
}

impl WebhookIngestor {
    pub fn new(ledger: Arc<PaymentLedger>, config: WebhookConfig) -> Self {
        Self {
            ledger,
            verifier: WebhookVerifier::new(config.signing_secret, config.tolerance),
        }
    }

    /// Processes one delivery.
    ///
    /// Store failures are returned as errors so the caller can answer with a
    /// non-2xx status and let the gateway redeliver.
    #[instrument(skip_all)]
    pub async fn ingest(&self, raw_payload: &[u8], signature_header: &str) -> Result<IngestOutcome> {
        if let Err(e) = self
            .verifier
            .verify(raw_payload, signature_header, Utc::now().timestamp())
        {
            warn!(error = %e, "Webhook rejected");
            return Ok(IngestOutcome::Rejected(IngestRejection::SignatureInvalid));
        }

        let payload: serde_json::Value = match serde_json::from_slice(raw_payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Webhook payload is not JSON");
                return Ok(IngestOutcome::Rejected(IngestRejection::MalformedPayload));
            }
        };
        let event: GatewayEvent = match serde_json::from_value(payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Webhook payload is not a gateway event");
                return Ok(IngestOutcome::Rejected(IngestRejection::MalformedPayload));
            }
        };

        let event_id = EventId::Gateway(event.id.clone());
        if self.ledger.has_event(&event_id).await? {
            debug!(event_id = %event.id, "Duplicate webhook delivery");
            return Ok(IngestOutcome::Deduplicated { event_id: event.id });
        }

        let record = EventRecord::new(event_id, event.event_type.clone(), payload);
        let application = self.resolve(&event).await?;

        let (application, trigger) = match (application, event.trigger()) {
            (Some(application), Some(trigger)) => (application, trigger),
            (application, _) => {
                let outcome = if application.is_some() {
                    EventOutcome::Observed
                } else {
                    EventOutcome::Unmatched
                };
                return self
                    .record_only(&event, application.map(|a| a.id), record, outcome)
                    .await;
            }
        };

        // Failure and processing events for an earlier attempt must not move
        // the current one.
        if matches!(trigger, Trigger::PaymentFailed | Trigger::PaymentInitiated)
            && let (Some(reference), Some(current)) = (
                event.reference(),
                application.payment_processor_order_id.as_deref(),
            )
            && reference != current
        {
            warn!(
                event_id = %event.id,
                application_id = %application.id,
                reference,
                current,
                "Webhook concerns a superseded payment attempt"
            );
            return self
                .record_only(&event, Some(application.id), record, EventOutcome::Observed)
                .await;
        }

        let fallback = record.clone();
        let applied = match (trigger, event.reference()) {
            // An intent created elsewhere becomes the current attempt.
            (Trigger::PaymentInitiated, Some(reference)) => {
                self.ledger.begin_attempt(application.id, reference, record).await
            }
            _ => self.ledger.apply(application.id, trigger, record).await,
        };
        match applied {
            Ok(ApplyOutcome::Duplicate) => Ok(IngestOutcome::Deduplicated { event_id: event.id }),
            Ok(outcome) => {
                info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    application_id = %application.id,
                    %trigger,
                    "Webhook applied"
                );
                Ok(IngestOutcome::Accepted {
                    event_id: event.id,
                    outcome: outcome.as_event_outcome(),
                })
            }
            Err(PaymentError::ApplicationNotFound(id)) => {
                warn!(application_id = %id, "Application vanished before the webhook was applied");
                self.record_only(&event, None, fallback, EventOutcome::Unmatched)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn record_only(
        &self,
        event: &GatewayEvent,
        application_id: Option<ApplicationId>,
        record: EventRecord,
        outcome: EventOutcome,
    ) -> Result<IngestOutcome> {
        match self.ledger.record(application_id, record, outcome.clone()).await? {
            CommitOutcome::Recorded => {
                debug!(event_id = %event.id, event_type = %event.event_type, result = outcome.label(), "Webhook recorded");
                Ok(IngestOutcome::Accepted {
                    event_id: event.id.clone(),
                    outcome,
                })
            }
            CommitOutcome::Duplicate => Ok(IngestOutcome::Deduplicated {
                event_id: event.id.clone(),
            }),
        }
    }

    /// Finds the application through the metadata id first, then through
    /// the gateway reference.
    async fn resolve(&self, event: &GatewayEvent) -> Result<Option<Application>> {
        if let Some(id) = event.metadata_application_id()
            && let Some(application) = self.ledger.application(id).await?
        {
            return Ok(Some(application));
        }
        match event.reference() {
            Some(reference) => self.ledger.find_by_reference(reference).await,
            None => Ok(None),
        }
    }
}
