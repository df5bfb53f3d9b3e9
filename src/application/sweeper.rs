use super::ledger::{ApplyOutcome, PaymentLedger};
use super::recovery::{Recovery, RecoveryContext};
use crate::config::{SweepConfig, chrono_duration};
use crate::domain::event::{EventId, EventRecord};
use crate::domain::permit::ApplicationStatus;
use crate::domain::ports::StaleCursor;
use crate::domain::state_machine::Trigger;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Tally of one sweep pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    /// Brought to a definitive state matching the gateway.
    pub recovered: usize,
    pub pending: usize,
    /// Recovery returned an error; retried on the next pass.
    pub failed: usize,
    /// No gateway reference to reconcile against.
    pub skipped: usize,
    pub expired: usize,
}

/// Periodically reconciles payments stuck waiting on the gateway.
pub struct ReconciliationSweeper {
    ledger: Arc<PaymentLedger>,
    recovery: Arc<dyn Recovery>,
    config: SweepConfig,
    /// Where the next pass resumes. Recoveries that stay pending do not
    /// bump `updated_at`, so a pass restarting from the oldest row would
    /// see the same page forever.
    cursor: Mutex<Option<StaleCursor>>,
}

impl ReconciliationSweeper {
    pub fn new(ledger: Arc<PaymentLedger>, recovery: Arc<dyn Recovery>, config: SweepConfig) -> Self {
        Self {
            ledger,
            recovery,
            config,
            cursor: Mutex::new(None),
        }
    }

    /// One pass over stale `PAYMENT_PROCESSING` applications, then the
    /// optional expiry of unpaid ones.
    ///
    /// An error on one application is logged and counted; the pass carries on.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let cutoff = now - chrono_duration(self.config.stale_after);
        let after = *self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        let stale = self
            .ledger
            .stale_applications(
                &[ApplicationStatus::PaymentProcessing],
                cutoff,
                after,
                self.config.batch_limit,
            )
            .await?;

        // A short page means the end of the stale set; start over next time.
        let next = match stale.last() {
            Some(last) if stale.len() >= self.config.batch_limit => Some((last.updated_at, last.id)),
            _ => None,
        };
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = next;

        for application in stale {
            report.scanned += 1;
            let Some(reference) = application.payment_processor_order_id.as_deref() else {
                warn!(application_id = %application.id, "Processing application has no gateway reference");
                report.skipped += 1;
                continue;
            };

            match self
                .recovery
                .attempt_recovery(application.id, reference, RecoveryContext::Sweep)
                .await
            {
                Ok(result) if result.success => report.recovered += 1,
                Ok(result) => {
                    debug!(application_id = %application.id, reason = %result.reason, "Application still unresolved");
                    report.pending += 1;
                }
                Err(e) => {
                    error!(application_id = %application.id, error = %e, "Recovery failed during sweep");
                    report.failed += 1;
                }
            }
        }

        if let Some(expire_after) = self.config.expire_unpaid_after {
            report.expired = self.expire_unpaid(now - chrono_duration(expire_after)).await;
        }

        info!(
            scanned = report.scanned,
            recovered = report.recovered,
            pending = report.pending,
            failed = report.failed,
            skipped = report.skipped,
            expired = report.expired,
            "Sweep finished"
        );
        Ok(report)
    }

    async fn expire_unpaid(&self, cutoff: DateTime<Utc>) -> usize {
        let candidates = match self
            .ledger
            .stale_applications(
                &[ApplicationStatus::AwaitingPayment, ApplicationStatus::PaymentFailed],
                cutoff,
                None,
                self.config.batch_limit,
            )
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Could not list unpaid applications");
                return 0;
            }
        };

        let mut expired = 0;
        for application in candidates {
            let record = EventRecord::new(
                EventId::synthetic("swp"),
                "application_expired",
                json!({"last_status": application.status, "updated_at": application.updated_at}),
            );
            match self.ledger.apply(application.id, Trigger::Expired, record).await {
                Ok(ApplyOutcome::Applied { .. }) => expired += 1,
                Ok(_) => {}
                Err(e) => error!(application_id = %application.id, error = %e, "Could not expire application"),
            }
        }
        expired
    }

    /// Sweeps on a fixed interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        info!(interval = ?self.config.interval, "Reconciliation sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!(error = %e, "Sweep pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciliation sweeper stopping");
                        break;
                    }
                }
            }
        }
    }
}
