use crate::config::{VelocityConfig, chrono_duration};
use crate::domain::ports::VelocityStoreBox;
use crate::domain::velocity::{Actor, CounterCheck, Dimension, VelocityDecision, VelocityKey};
use crate::error::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

/// Rate limits payment attempts per user, email, IP and card fingerprint.
pub struct VelocityGuard {
    store: VelocityStoreBox,
    config: VelocityConfig,
}

impl VelocityGuard {
    pub fn new(store: VelocityStoreBox, config: VelocityConfig) -> Self {
        Self { store, config }
    }

    fn checks_for(&self, actor: &Actor) -> Vec<CounterCheck> {
        let mut checks = vec![
            CounterCheck {
                key: VelocityKey::new(Dimension::User, &actor.user_id),
                max_attempts: self.config.max_attempts_per_user,
                max_amount: self.config.max_amount_per_user,
            },
            CounterCheck {
                key: VelocityKey::new(Dimension::Email, actor.email.to_lowercase()),
                max_attempts: self.config.max_attempts_per_email,
                max_amount: None,
            },
            CounterCheck {
                key: VelocityKey::new(Dimension::Ip, &actor.ip),
                max_attempts: self.config.max_attempts_per_ip,
                max_amount: None,
            },
        ];
        if let Some(fingerprint) = &actor.card_fingerprint {
            checks.push(CounterCheck {
                key: VelocityKey::new(Dimension::CardFingerprint, fingerprint),
                max_attempts: self.config.max_attempts_per_card,
                max_amount: None,
            });
        }
        checks
    }

    /// Evaluates the attempt against every dimension and records it when all
    /// are under their limits.
    ///
    /// A failing counter store denies the attempt (`degraded`).
    #[instrument(skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn check_velocity(&self, actor: &Actor, amount: Decimal) -> VelocityDecision {
        let checks = self.checks_for(actor);
        let window = chrono_duration(self.config.window);

        match self
            .store
            .check_and_record(&checks, amount, window, Utc::now())
            .await
        {
            Ok(violations) if violations.is_empty() => {
                debug!("Attempt recorded");
                VelocityDecision::allow()
            }
            Ok(violations) => {
                warn!(
                    email = %actor.email,
                    ip = %actor.ip,
                    %amount,
                    ?violations,
                    "Payment attempt denied by velocity limits"
                );
                VelocityDecision::deny(violations)
            }
            Err(e) => {
                warn!(error = %e, retryable = true, "Velocity counters unavailable, denying attempt");
                VelocityDecision::degraded()
            }
        }
    }

    /// Clears every counter tied to the user. Clearing twice is harmless.
    pub async fn reset_velocity(&self, user_id: &str) -> Result<()> {
        self.store.clear_user(user_id).await?;
        debug!(user_id, "Velocity counters reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::VelocityStore;
    use crate::domain::velocity::Violation;
    use crate::error::PaymentError;
    use crate::infrastructure::velocity_store::InMemoryVelocityStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn config() -> VelocityConfig {
        VelocityConfig {
            window: Duration::from_secs(3600),
            max_attempts_per_user: 5,
            max_attempts_per_email: 10,
            max_attempts_per_ip: 20,
            max_attempts_per_card: 10,
            max_amount_per_user: None,
        }
    }

    fn actor(user: &str, ip: &str) -> Actor {
        Actor {
            user_id: user.to_string(),
            email: format!("{}@example.com", user),
            ip: ip.to_string(),
            card_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn test_fifth_allowed_sixth_denied() {
        let guard = VelocityGuard::new(Box::new(InMemoryVelocityStore::new()), config());
        let actor = actor("u1", "10.0.0.1");

        for attempt in 1..=5 {
            let decision = guard.check_velocity(&actor, dec!(100)).await;
            assert!(decision.allowed, "attempt {} should pass", attempt);
        }
        let sixth = guard.check_velocity(&actor, dec!(100)).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.violations, vec![Violation::UserAttempts]);
        assert!(!sixth.degraded);
    }

    #[tokio::test]
    async fn test_shared_ip_limit_spans_users() {
        let mut cfg = config();
        cfg.max_attempts_per_ip = 2;
        let guard = VelocityGuard::new(Box::new(InMemoryVelocityStore::new()), cfg);

        assert!(guard.check_velocity(&actor("a", "1.1.1.1"), dec!(1)).await.allowed);
        assert!(guard.check_velocity(&actor("b", "1.1.1.1"), dec!(1)).await.allowed);
        let third = guard.check_velocity(&actor("c", "1.1.1.1"), dec!(1)).await;
        assert_eq!(third.violations, vec![Violation::IpAttempts]);
    }

    #[tokio::test]
    async fn test_amount_ceiling() {
        let mut cfg = config();
        cfg.max_amount_per_user = Some(dec!(500));
        let guard = VelocityGuard::new(Box::new(InMemoryVelocityStore::new()), cfg);
        let actor = actor("u1", "10.0.0.1");

        assert!(guard.check_velocity(&actor, dec!(300)).await.allowed);
        let over = guard.check_velocity(&actor, dec!(300)).await;
        assert!(over.violations.contains(&Violation::UserAmount));
    }

    #[tokio::test]
    async fn test_reset_restores_user() {
        let guard = VelocityGuard::new(Box::new(InMemoryVelocityStore::new()), config());
        let actor = actor("u1", "10.0.0.1");
        for _ in 0..5 {
            guard.check_velocity(&actor, dec!(1)).await;
        }
        assert!(!guard.check_velocity(&actor, dec!(1)).await.allowed);

        guard.reset_velocity("u1").await.unwrap();
        guard.reset_velocity("u1").await.unwrap();
        assert!(guard.check_velocity(&actor, dec!(1)).await.allowed);
    }

    struct BrokenStore;

    #[async_trait]
    impl VelocityStore for BrokenStore {
        async fn check_and_record(
            &self,
            _checks: &[CounterCheck],
            _amount: Decimal,
            _window: chrono::Duration,
            _now: DateTime<Utc>,
        ) -> Result<Vec<Violation>> {
            Err(PaymentError::CounterStoreUnavailable("connection refused".to_string()))
        }

        async fn clear_user(&self, _user_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let guard = VelocityGuard::new(Box::new(BrokenStore), config());
        let decision = guard.check_velocity(&actor("u1", "10.0.0.1"), dec!(1)).await;
        assert!(!decision.allowed);
        assert!(decision.degraded);
    }
}
