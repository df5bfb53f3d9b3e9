//! Engine configuration.
//!
//! Every value is supplied by the caller (the CLI reads flags and
//! environment variables); the engine types carry no defaults of their own.

use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub signing_secret: String,
    /// Maximum distance between the signed timestamp and the local clock.
    pub tolerance: Duration,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Upper bound for any single gateway call.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct VelocityConfig {
    pub window: Duration,
    pub max_attempts_per_user: u32,
    pub max_attempts_per_email: u32,
    pub max_attempts_per_ip: u32,
    pub max_attempts_per_card: u32,
    /// Ceiling on the summed amount of one user's attempts in the window.
    pub max_amount_per_user: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How long after a recorded failure a gateway success may still reopen
    /// the payment.
    pub reopen_window: Duration,
    /// A read of an application sitting in `PAYMENT_PROCESSING` for longer
    /// than this triggers a synchronous recovery.
    pub read_recovery_after: Duration,
    /// How long a transition waits for the application lock per try.
    pub lock_wait: Duration,
    pub lock_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    /// Applications in a transient state untouched for this long are stale.
    pub stale_after: Duration,
    pub batch_limit: usize,
    /// Unpaid applications older than this are expired. Disabled when `None`.
    pub expire_unpaid_after: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub currency: String,
}

/// Complete configuration, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub webhook: WebhookConfig,
    pub gateway: GatewayConfig,
    pub velocity: VelocityConfig,
    pub recovery: RecoveryConfig,
    pub sweep: SweepConfig,
    pub payment: PaymentConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.webhook.signing_secret.is_empty() {
            return Err(PaymentError::ConfigError(
                "webhook signing secret must be set".to_string(),
            ));
        }
        if self.velocity.window.is_zero() {
            return Err(PaymentError::ConfigError(
                "velocity window must be positive".to_string(),
            ));
        }
        if self.sweep.interval.is_zero() || self.sweep.stale_after.is_zero() {
            return Err(PaymentError::ConfigError(
                "sweep interval and staleness threshold must be positive".to_string(),
            ));
        }
        if self.sweep.batch_limit == 0 {
            return Err(PaymentError::ConfigError(
                "sweep batch limit must be positive".to_string(),
            ));
        }
        if self.recovery.lock_retries == 0 {
            return Err(PaymentError::ConfigError(
                "lock retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Converts a std duration to chrono for timestamp arithmetic.
pub fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> EngineConfig {
        EngineConfig {
            webhook: WebhookConfig {
                signing_secret: "whsec_1".to_string(),
                tolerance: Duration::from_secs(300),
            },
            gateway: GatewayConfig {
                base_url: String::new(),
                api_key: String::new(),
                timeout: Duration::from_secs(10),
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
                reopen_window: Duration::from_secs(3600),
                read_recovery_after: Duration::from_secs(900),
                lock_wait: Duration::from_secs(2),
                lock_retries: 3,
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

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.webhook.signing_secret.clear();
        assert!(matches!(config.validate(), Err(PaymentError::ConfigError(_))));

        let mut config = valid();
        config.sweep.batch_limit = 0;
        assert!(matches!(config.validate(), Err(PaymentError::ConfigError(_))));
    }

    #[test]
    fn test_chrono_duration_saturates() {
        assert_eq!(chrono_duration(Duration::from_secs(60)), chrono::Duration::minutes(1));
        assert_eq!(chrono_duration(Duration::MAX), chrono::Duration::weeks(52 * 100));
    }
}
