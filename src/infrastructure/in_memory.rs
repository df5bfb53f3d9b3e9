use crate::domain::event::{EventId, PaymentEvent};
use crate::domain::permit::{Application, ApplicationId, ApplicationStatus};
use crate::domain::ports::{ApplicationStore, CommitOutcome, PaymentEventStore, StaleCursor};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    applications: HashMap<ApplicationId, Application>,
    /// Event log in append order.
    events: Vec<PaymentEvent>,
    event_keys: HashSet<String>,
}

/// A thread-safe in-memory store for applications and their event log.
///
/// Both live behind one `RwLock` so a commit writes the event and the
/// application update as a single step. Ideal for testing or single-node
/// deployments where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Creates a new, empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplicationStore for InMemoryStore {
    async fn insert(&self, application: Application) -> Result<()> {
        let mut state = self.state.write().await;
        if state.applications.contains_key(&application.id) {
            return Err(PaymentError::ApplicationExists(application.id));
        }
        state.applications.insert(application.id, application);
        Ok(())
    }

    async fn get(&self, id: ApplicationId) -> Result<Option<Application>> {
        let state = self.state.read().await;
        Ok(state.applications.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Application>> {
        let state = self.state.read().await;
        Ok(state
            .applications
            .values()
            .find(|a| a.has_reference(reference))
            .cloned())
    }

    async fn stale(
        &self,
        statuses: &[ApplicationStatus],
        updated_before: DateTime<Utc>,
        after: Option<StaleCursor>,
        limit: usize,
    ) -> Result<Vec<Application>> {
        let state = self.state.read().await;
        let mut matches: Vec<Application> = state
            .applications
            .values()
            .filter(|a| statuses.contains(&a.status) && a.updated_at < updated_before)
            .filter(|a| after.is_none_or(|cursor| (a.updated_at, a.id) > cursor))
            .cloned()
            .collect();
        matches.sort_by_key(|a| (a.updated_at, a.id));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[async_trait]
impl PaymentEventStore for InMemoryStore {
    async fn exists(&self, event_id: &EventId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.event_keys.contains(&event_id.key()))
    }

    async fn commit(&self, event: PaymentEvent, application: Option<Application>) -> Result<CommitOutcome> {
        let mut state = self.state.write().await;
        if !state.event_keys.insert(event.event_id.key()) {
            return Ok(CommitOutcome::Duplicate);
        }
        if let Some(application) = application {
            state.applications.insert(application.id, application);
        }
        state.events.push(event);
        Ok(CommitOutcome::Recorded)
    }

    async fn for_application(&self, id: ApplicationId) -> Result<Vec<PaymentEvent>> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.application_id == Some(id))
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> Result<Vec<PaymentEvent>> {
        let state = self.state.read().await;
        Ok(state.events.clone())
    }
}
