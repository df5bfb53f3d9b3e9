use super::event::{EventId, PaymentEvent};
use super::gateway::{CreateIntent, PaymentIntent};
use super::permit::{Application, ApplicationId, ApplicationStatus};
use super::velocity::{CounterCheck, Violation};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn insert(&self, application: Application) -> Result<()>;
    async fn get(&self, id: ApplicationId) -> Result<Option<Application>>;
    async fn find_by_reference(&self, reference: &str) -> Result<Option<Application>>;
    /// Applications in one of `statuses` whose last transition happened
    /// before `updated_before`, ordered by `(updated_at, id)`, at most
    /// `limit` rows. With `after` set, only rows ordered strictly after
    /// that key are returned.
    async fn stale(
        &self,
        statuses: &[ApplicationStatus],
        updated_before: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: usize,
    ) -> Result<Vec<Application>>;
}

/// Position in the `(updated_at, id)` order of a stale listing.
pub type StaleCursor = (DateTime<Utc>, ApplicationId);

/// Result of appending to the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Recorded,
    /// An event with the same id already exists; nothing was written.
    Duplicate,
}

#[async_trait]
pub trait PaymentEventStore: Send + Sync {
    async fn exists(&self, event_id: &EventId) -> Result<bool>;
    /// Appends `event` and, in the same atomic write, persists `application`
    /// when given. Neither is written if the event id is already taken.
    async fn commit(&self, event: PaymentEvent, application: Option<Application>) -> Result<CommitOutcome>;
    async fn for_application(&self, id: ApplicationId) -> Result<Vec<PaymentEvent>>;
    async fn all_events(&self) -> Result<Vec<PaymentEvent>>;
}

/// Rolling attempt counters shared by concurrent request handlers.
#[async_trait]
pub trait VelocityStore: Send + Sync {
    /// Evaluates every check against the window ending at `now`. When none is
    /// violated the attempt is recorded on all keys; otherwise nothing is
    /// recorded. Evaluation and recording form a single atomic step.
    async fn check_and_record(
        &self,
        checks: &[CounterCheck],
        amount: Decimal,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Violation>>;
    /// Drops the user's own counter and the email and card counters recorded
    /// together with it. IP counters are shared between users and are kept.
    async fn clear_user(&self, user_id: &str) -> Result<()>;
}

/// The subset of the payment gateway the engine uses.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent>;
    async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentIntent>;
    async fn capture_intent(&self, intent_id: &str) -> Result<PaymentIntent>;
    async fn cancel_intent(&self, intent_id: &str) -> Result<PaymentIntent>;
    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent>;
}

pub type ApplicationStoreBox = Box<dyn ApplicationStore>;
pub type PaymentEventStoreBox = Box<dyn PaymentEventStore>;
pub type VelocityStoreBox = Box<dyn VelocityStore>;
/// Shared by the recovery service and the payment initiator.
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
