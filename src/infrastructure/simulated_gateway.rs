use crate::domain::gateway::{CreateIntent, IntentStatus, PaymentFailure, PaymentIntent, PaymentMethod};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    intents: HashMap<String, PaymentIntent>,
    by_idempotency_key: HashMap<String, String>,
    /// Calls that fail with `GatewayUnavailable` before the gateway recovers.
    outages: u32,
    /// Intents whose capture fails.
    failing_captures: Vec<String>,
    latency: Option<Duration>,
    confirm_outcome: Option<IntentStatus>,
    captures: u64,
    cancels: u64,
}

/// In-process stand-in for the payment gateway.
///
/// Intents are held in memory and can be moved between statuses by the
/// caller, which makes drift, outages and slow responses easy to reproduce.
#[derive(Debug, Default, Clone)]
pub struct SimulatedGateway {
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an intent with the given status, replacing any previous one.
    pub async fn put_intent(&self, id: &str, status: IntentStatus) {
        let mut inner = self.inner.write().await;
        inner.intents.insert(
            id.to_string(),
            PaymentIntent {
                id: id.to_string(),
                status,
                last_payment_error: None,
                client_secret: Some(format!("{}_secret", id)),
            },
        );
    }

    pub async fn set_status(&self, id: &str, status: IntentStatus) {
        let mut inner = self.inner.write().await;
        if let Some(intent) = inner.intents.get_mut(id) {
            intent.status = status;
        }
    }

    /// Marks the last charge attempt on the intent as declined.
    pub async fn decline(&self, id: &str, error: &str) {
        let mut inner = self.inner.write().await;
        if let Some(intent) = inner.intents.get_mut(id) {
            intent.status = IntentStatus::RequiresPaymentMethod;
            intent.last_payment_error = Some(PaymentFailure::with_code(error));
        }
    }

    /// The next `calls` gateway calls fail as if the gateway were down.
    pub async fn fail_next(&self, calls: u32) {
        self.inner.write().await.outages = calls;
    }

    pub async fn fail_capture(&self, id: &str) {
        self.inner.write().await.failing_captures.push(id.to_string());
    }

    /// Every call sleeps this long before answering.
    pub async fn set_latency(&self, latency: Duration) {
        self.inner.write().await.latency = Some(latency);
    }

    /// Status a card intent takes when confirmed. Defaults to `processing`.
    pub async fn set_confirm_outcome(&self, status: IntentStatus) {
        self.inner.write().await.confirm_outcome = Some(status);
    }

    pub async fn status_of(&self, id: &str) -> Option<IntentStatus> {
        self.inner.read().await.intents.get(id).map(|i| i.status)
    }

    pub async fn capture_count(&self) -> u64 {
        self.inner.read().await.captures
    }

    pub async fn cancel_count(&self) -> u64 {
        self.inner.read().await.cancels
    }

    pub async fn intent_count(&self) -> usize {
        self.inner.read().await.intents.len()
    }

    /// Applies the configured latency and outage before a call.
    async fn enter(&self) -> Result<()> {
        let latency = self.inner.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.inner.write().await;
        if inner.outages > 0 {
            inner.outages -= 1;
            return Err(PaymentError::GatewayUnavailable(
                "simulated gateway outage".to_string(),
            ));
        }
        Ok(())
    }

    async fn update<F>(&self, intent_id: &str, f: F) -> Result<PaymentIntent>
    where
        F: FnOnce(&mut Inner, &str) -> Result<()> + Send,
    {
        self.enter().await?;
        let mut inner = self.inner.write().await;
        if !inner.intents.contains_key(intent_id) {
            return Err(PaymentError::GatewayRejected(format!(
                "No such payment_intent: '{}'",
                intent_id
            )));
        }
        f(&mut *inner, intent_id)?;
        inner
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| PaymentError::GatewayRejected(intent_id.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent> {
        self.enter().await?;
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .by_idempotency_key
            .get(&request.idempotency_key)
            .and_then(|id| inner.intents.get(id))
        {
            return Ok(existing.clone());
        }

        let id = format!("pi_sim_{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let status = match request.method {
            PaymentMethod::Card => IntentStatus::RequiresConfirmation,
            // The voucher is issued straight away and waits for the customer.
            PaymentMethod::Oxxo => IntentStatus::RequiresAction,
        };
        let intent = PaymentIntent {
            id: id.clone(),
            status,
            last_payment_error: None,
            client_secret: Some(format!("{}_secret", id)),
        };
        inner.intents.insert(id.clone(), intent.clone());
        inner.by_idempotency_key.insert(request.idempotency_key, id);
        Ok(intent)
    }

    async fn confirm_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.update(intent_id, |inner, id| {
            let outcome = inner.confirm_outcome.unwrap_or(IntentStatus::Processing);
            if let Some(intent) = inner.intents.get_mut(id) {
                intent.status = outcome;
            }
            Ok(())
        })
        .await
    }

    async fn capture_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.update(intent_id, |inner, id| {
            inner.captures += 1;
            if inner.failing_captures.iter().any(|f| f == id) {
                return Err(PaymentError::GatewayUnavailable(format!(
                    "capture of {} failed",
                    id
                )));
            }
            if let Some(intent) = inner.intents.get_mut(id) {
                if intent.status != IntentStatus::RequiresCapture {
                    return Err(PaymentError::GatewayRejected(format!(
                        "payment_intent {} has status {}",
                        id, intent.status
                    )));
                }
                intent.status = IntentStatus::Succeeded;
            }
            Ok(())
        })
        .await
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.update(intent_id, |inner, id| {
            inner.cancels += 1;
            if let Some(intent) = inner.intents.get_mut(id) {
                if intent.status == IntentStatus::Succeeded {
                    return Err(PaymentError::GatewayRejected(format!(
                        "payment_intent {} already succeeded",
                        id
                    )));
                }
                intent.status = IntentStatus::Canceled;
            }
            Ok(())
        })
        .await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent> {
        self.update(intent_id, |_, _| Ok(())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permit::ApplicationId;
    use rust_decimal_macros::dec;

    fn request(key: &str, method: PaymentMethod) -> CreateIntent {
        CreateIntent {
            application_id: ApplicationId(1),
            amount: dec!(150.00),
            currency: "mxn".to_string(),
            method,
            customer_email: "a@example.com".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_key() {
        let gateway = SimulatedGateway::new();
        let a = gateway.create_intent(request("k1", PaymentMethod::Card)).await.unwrap();
        let b = gateway.create_intent(request("k1", PaymentMethod::Card)).await.unwrap();
        let c = gateway.create_intent(request("k2", PaymentMethod::Oxxo)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(c.status, IntentStatus::RequiresAction);
        assert_eq!(gateway.intent_count().await, 2);
    }

    #[tokio::test]
    async fn test_capture_settles_authorized_intent() {
        let gateway = SimulatedGateway::new();
        gateway.put_intent("pi_1", IntentStatus::RequiresCapture).await;
        let captured = gateway.capture_intent("pi_1").await.unwrap();
        assert_eq!(captured.status, IntentStatus::Succeeded);
        assert_eq!(gateway.capture_count().await, 1);

        let again = gateway.capture_intent("pi_1").await;
        assert!(matches!(again, Err(PaymentError::GatewayRejected(_))));
    }

    #[tokio::test]
    async fn test_outage_then_recovery() {
        let gateway = SimulatedGateway::new();
        gateway.put_intent("pi_1", IntentStatus::Processing).await;
        gateway.fail_next(1).await;
        assert!(matches!(
            gateway.retrieve_intent("pi_1").await,
            Err(PaymentError::GatewayUnavailable(_))
        ));
        assert_eq!(
            gateway.retrieve_intent("pi_1").await.unwrap().status,
            IntentStatus::Processing
        );
    }
}
