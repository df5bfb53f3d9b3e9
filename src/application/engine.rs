use super::admin::AdminService;
use super::ledger::PaymentLedger;
use super::locks::KeyedLocks;
use super::payment::PaymentInitiator;
use super::recovery::RecoveryService;
use super::sweeper::ReconciliationSweeper;
use super::velocity::VelocityGuard;
use super::webhook::WebhookIngestor;
use crate::config::{EngineConfig, chrono_duration};
use crate::domain::ports::{ApplicationStoreBox, PaymentEventStoreBox, PaymentGatewayRef, VelocityStoreBox};
use crate::domain::state_machine::StateMachine;
use crate::error::Result;
use std::sync::Arc;

/// The wired-up reconciliation engine.
///
/// `ReconciliationEngine` owns one instance of every service, all sharing the
/// same ledger, so webhooks, sweeps, payment attempts and admin overrides
/// serialize on the same per-application locks.
pub struct ReconciliationEngine {
    ledger: Arc<PaymentLedger>,
    velocity: Arc<VelocityGuard>,
    webhooks: Arc<WebhookIngestor>,
    recovery: Arc<RecoveryService>,
    sweeper: Arc<ReconciliationSweeper>,
    payments: Arc<PaymentInitiator>,
    admin: Arc<AdminService>,
}

impl ReconciliationEngine {
    /// Creates a new `ReconciliationEngine`.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated before anything is built.
    /// * `applications` - The store for application rows.
    /// * `events` - The payment event log.
    /// * `counters` - Velocity counter store.
    /// * `gateway` - Payment gateway client.
    pub fn new(
        config: EngineConfig,
        applications: ApplicationStoreBox,
        events: PaymentEventStoreBox,
        counters: VelocityStoreBox,
        gateway: PaymentGatewayRef,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(PaymentLedger::new(
            applications,
            events,
            StateMachine::new(chrono_duration(config.recovery.reopen_window)),
            KeyedLocks::new(config.recovery.lock_wait, config.recovery.lock_retries),
        ));
        let velocity = Arc::new(VelocityGuard::new(counters, config.velocity));
        let webhooks = Arc::new(WebhookIngestor::new(ledger.clone(), config.webhook));
        let recovery = Arc::new(RecoveryService::new(
            ledger.clone(),
            gateway.clone(),
            config.recovery,
            config.gateway.timeout,
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            ledger.clone(),
            recovery.clone(),
            config.sweep,
        ));
        let payments = Arc::new(PaymentInitiator::new(
            ledger.clone(),
            gateway,
            velocity.clone(),
            config.payment.currency,
            config.gateway.timeout,
        ));
        let admin = Arc::new(AdminService::new(ledger.clone(), velocity.clone()));

        Ok(Self {
            ledger,
            velocity,
            webhooks,
            recovery,
            sweeper,
            payments,
            admin,
        })
    }

    pub fn ledger(&self) -> &Arc<PaymentLedger> {
        &self.ledger
    }

    pub fn velocity(&self) -> &Arc<VelocityGuard> {
        &self.velocity
    }

    pub fn webhooks(&self) -> &Arc<WebhookIngestor> {
        &self.webhooks
    }

    pub fn recovery(&self) -> &Arc<RecoveryService> {
        &self.recovery
    }

    pub fn sweeper(&self) -> &Arc<ReconciliationSweeper> {
        &self.sweeper
    }

    pub fn payments(&self) -> &Arc<PaymentInitiator> {
        &self.payments
    }

    pub fn admin(&self) -> &Arc<AdminService> {
        &self.admin
    }
}
