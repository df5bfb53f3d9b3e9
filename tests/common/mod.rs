#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use permit_recon::application::engine::ReconciliationEngine;
use permit_recon::application::signature::WebhookVerifier;
use permit_recon::config::{
    EngineConfig, GatewayConfig, PaymentConfig, RecoveryConfig, SweepConfig, VelocityConfig,
    WebhookConfig,
};
use permit_recon::domain::event::PaymentEvent;
use permit_recon::domain::permit::{Application, ApplicationId, ApplicationStatus};
use permit_recon::domain::ports::{ApplicationStore, PaymentEventStore};
use permit_recon::domain::velocity::Actor;
use permit_recon::infrastructure::in_memory::InMemoryStore;
use permit_recon::infrastructure::simulated_gateway::SimulatedGateway;
use permit_recon::infrastructure::velocity_store::InMemoryVelocityStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

pub const SECRET: &str = "whsec_test_secret";

pub fn config() -> EngineConfig {
    EngineConfig {
        webhook: WebhookConfig {
            signing_secret: SECRET.to_string(),
            tolerance: Duration::from_secs(300),
        },
        gateway: GatewayConfig {
            base_url: "http://gateway.invalid".to_string(),
            api_key: "sk_test".to_string(),
            timeout: Duration::from_secs(2),
        },
        velocity: VelocityConfig {
            window: Duration::from_secs(3600),
            max_attempts_per_user: 5,
            max_attempts_per_email: 10,
            max_attempts_per_ip: 20,
            max_attempts_per_card: 10,
            max_amount_per_user: None,
        },
        recovery: RecoveryConfig {
            reopen_window: Duration::from_secs(7 * 24 * 3600),
            read_recovery_after: Duration::from_secs(900),
            lock_wait: Duration::from_millis(500),
            lock_retries: 5,
        },
        sweep: SweepConfig {
            interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(900),
            batch_limit: 100,
            expire_unpaid_after: None,
        },
        payment: PaymentConfig {
            currency: "mxn".to_string(),
        },
    }
}

/// An engine over in-memory stores and the simulated gateway.
pub struct Harness {
    pub engine: Arc<ReconciliationEngine>,
    pub store: InMemoryStore,
    pub gateway: SimulatedGateway,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = InMemoryStore::new();
        let gateway = SimulatedGateway::new();
        let engine = ReconciliationEngine::new(
            config,
            Box::new(store.clone()),
            Box::new(store.clone()),
            Box::new(InMemoryVelocityStore::new()),
            Arc::new(gateway.clone()),
        )
        .unwrap();
        Self {
            engine: Arc::new(engine),
            store,
            gateway,
        }
    }

    /// Inserts an application in `status` with the given reference, last
    /// touched `age` ago.
    pub async fn insert_app(
        &self,
        id: u64,
        status: ApplicationStatus,
        reference: Option<&str>,
        age: ChronoDuration,
    ) -> Application {
        let mut app = Application::new(ApplicationId(id), format!("user-{}", id), Utc::now() - age);
        app.status = status;
        app.payment_processor_order_id = reference.map(str::to_string);
        self.store.insert(app.clone()).await.unwrap();
        app
    }

    pub async fn app(&self, id: u64) -> Application {
        self.store.get(ApplicationId(id)).await.unwrap().unwrap()
    }

    pub async fn status(&self, id: u64) -> ApplicationStatus {
        self.app(id).await.status
    }

    pub async fn events(&self, id: u64) -> Vec<PaymentEvent> {
        self.store.for_application(ApplicationId(id)).await.unwrap()
    }

    pub async fn all_events(&self) -> Vec<PaymentEvent> {
        self.store.all_events().await.unwrap()
    }
}

/// A gateway event body.
pub fn webhook(event_id: &str, event_type: &str, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {"object": object}
    }))
    .unwrap()
}

pub fn sign(payload: &[u8]) -> String {
    sign_at(payload, Utc::now().timestamp())
}

pub fn sign_at(payload: &[u8], timestamp: i64) -> String {
    WebhookVerifier::new(SECRET, Duration::from_secs(300))
        .sign(payload, timestamp)
        .unwrap()
}

pub fn actor(user: &str) -> Actor {
    Actor {
        user_id: user.to_string(),
        email: format!("{}@example.com", user),
        ip: "203.0.113.7".to_string(),
        card_fingerprint: None,
    }
}
