use super::locks::KeyedLocks;
use crate::domain::event::{EventId, EventOutcome, EventRecord, PaymentEvent};
use crate::domain::permit::{Application, ApplicationId, ApplicationStatus};
use crate::domain::ports::{ApplicationStoreBox, CommitOutcome, PaymentEventStoreBox, StaleCursor};
use crate::domain::state_machine::{RejectReason, StateMachine, Transition, Trigger};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

/// Upper bound on chained steps of a settling trigger (reopen, then settle).
const MAX_SETTLE_STEPS: usize = 3;

/// What a transition attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    NoOp(ApplicationStatus),
    Rejected {
        status: ApplicationStatus,
        reason: RejectReason,
    },
    /// The event id was already recorded; nothing was re-processed.
    Duplicate,
}

impl ApplyOutcome {
    /// Status of the application after the attempt, when known.
    pub fn status(&self) -> Option<ApplicationStatus> {
        match self {
            Self::Applied { to, .. } => Some(*to),
            Self::NoOp(status) | Self::Rejected { status, .. } => Some(*status),
            Self::Duplicate => None,
        }
    }

    pub fn as_event_outcome(&self) -> EventOutcome {
        match *self {
            Self::Applied { from, to } => EventOutcome::Applied { from, to },
            Self::NoOp(status) => EventOutcome::NoOp { status },
            Self::Rejected { status, reason } => EventOutcome::Rejected { status, reason },
            Self::Duplicate => EventOutcome::Observed,
        }
    }
}

/// Applies state-machine transitions to stored applications.
///
/// A transition holds the application's lock while it re-reads the row,
/// evaluates the trigger and commits the new status together with its audit
/// event. Webhooks, recovery, sweeps and admin actions all go through here.
pub struct PaymentLedger {
    applications: ApplicationStoreBox,
    events: PaymentEventStoreBox,
    machine: StateMachine,
    locks: KeyedLocks,
}

impl PaymentLedger {
    /// Creates a new `PaymentLedger`.
    ///
    /// # Arguments
    ///
    /// * `applications` - The store for application rows.
    /// * `events` - The append-only payment event log.
    /// * `machine` - The payment state machine.
    /// * `locks` - Per-application locks shared by every writer.
    pub fn new(
        applications: ApplicationStoreBox,
        events: PaymentEventStoreBox,
        machine: StateMachine,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            applications,
            events,
            machine,
            locks,
        }
    }

    /// Registers a new application awaiting payment.
    pub async fn open_application(&self, id: ApplicationId, user_id: &str) -> Result<Application> {
        let application = Application::new(id, user_id, Utc::now());
        self.applications.insert(application.clone()).await?;
        info!(application_id = %id, user_id, "Application opened");
        Ok(application)
    }

    pub async fn application(&self, id: ApplicationId) -> Result<Option<Application>> {
        self.applications.get(id).await
    }

    pub async fn find_by_reference(&self, reference: &str) -> Result<Option<Application>> {
        self.applications.find_by_reference(reference).await
    }

    pub async fn stale_applications(
        &self,
        statuses: &[ApplicationStatus],
        updated_before: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: usize,
    ) -> Result<Vec<Application>> {
        self.applications.stale(statuses, updated_before, after, limit).await
    }

    pub async fn has_event(&self, event_id: &EventId) -> Result<bool> {
        self.events.exists(event_id).await
    }

    pub async fn events_for(&self, id: ApplicationId) -> Result<Vec<PaymentEvent>> {
        self.events.for_application(id).await
    }

    pub async fn all_events(&self) -> Result<Vec<PaymentEvent>> {
        self.events.all_events().await
    }

    /// Applies `trigger` to the application and records `record` with the
    /// outcome.
    pub async fn apply(&self, id: ApplicationId, trigger: Trigger, record: EventRecord) -> Result<ApplyOutcome> {
        self.transition(id, trigger, None, record).await
    }

    /// Starts a new payment attempt: applies `payment_initiated` and, when it
    /// takes effect, stores `reference` as the application's gateway
    /// reference.
    pub async fn begin_attempt(&self, id: ApplicationId, reference: &str, record: EventRecord) -> Result<ApplyOutcome> {
        self.transition(id, Trigger::PaymentInitiated, Some(reference.to_string()), record)
            .await
    }

    /// Records an event that carries no state-machine trigger.
    pub async fn record(
        &self,
        application_id: Option<ApplicationId>,
        record: EventRecord,
        outcome: EventOutcome,
    ) -> Result<CommitOutcome> {
        let event_id = record.event_id.clone();
        let event = record.into_event(application_id, outcome, Utc::now());
        let committed = self.events.commit(event, None).await?;
        debug!(event_id = %event_id, ?committed, "Event recorded");
        Ok(committed)
    }

    #[instrument(skip(self, record), fields(event_id = %record.event_id))]
    async fn transition(
        &self,
        id: ApplicationId,
        trigger: Trigger,
        reference: Option<String>,
        record: EventRecord,
    ) -> Result<ApplyOutcome> {
        let _guard = self.locks.acquire(id).await?;

        if self.events.exists(&record.event_id).await? {
            debug!(application_id = %id, "Event already processed");
            return Ok(ApplyOutcome::Duplicate);
        }

        let current = self
            .applications
            .get(id)
            .await?
            .ok_or(PaymentError::ApplicationNotFound(id))?;

        let now = Utc::now();
        let mut next = current.clone();
        let mut outcome = ApplyOutcome::NoOp(current.status);
        for _ in 0..MAX_SETTLE_STEPS {
            match self.machine.next(&next, trigger, now) {
                Transition::Applied(to) => {
                    next.status = to;
                    next.updated_at = now;
                    outcome = ApplyOutcome::Applied {
                        from: current.status,
                        to,
                    };
                    if !trigger.is_settling() {
                        break;
                    }
                }
                Transition::NoOp => break,
                Transition::Rejected(reason) => {
                    if matches!(outcome, ApplyOutcome::NoOp(_)) {
                        outcome = ApplyOutcome::Rejected {
                            status: current.status,
                            reason,
                        };
                    }
                    break;
                }
            }
        }

        let update = match outcome {
            ApplyOutcome::Applied { .. } => {
                if let Some(reference) = reference {
                    next.payment_processor_order_id = Some(reference);
                }
                Some(next)
            }
            _ => None,
        };

        let event = record.into_event(Some(id), outcome.as_event_outcome(), now);
        if self.events.commit(event, update).await? == CommitOutcome::Duplicate {
            return Ok(ApplyOutcome::Duplicate);
        }

        match outcome {
            ApplyOutcome::Applied { from, to } => {
                info!(application_id = %id, %trigger, %from, %to, "Transition applied")
            }
            ApplyOutcome::NoOp(status) => {
                debug!(application_id = %id, %trigger, %status, "Transition is a no-op")
            }
            ApplyOutcome::Rejected { status, reason } => {
                warn!(application_id = %id, %trigger, %status, %reason, "Transition rejected")
            }
            ApplyOutcome::Duplicate => {}
        }

        Ok(outcome)
    }
}
