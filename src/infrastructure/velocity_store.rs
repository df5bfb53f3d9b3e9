use crate::domain::ports::VelocityStore;
use crate::domain::velocity::{CounterCheck, Dimension, VelocityKey, Violation};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Attempts recorded on one key inside the rolling window.
#[derive(Debug, Default)]
struct AttemptWindow {
    attempts: VecDeque<(DateTime<Utc>, Decimal)>,
}

impl AttemptWindow {
    /// Drops attempts that fell out of the window ending at `now`.
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while let Some((at, _)) = self.attempts.front() {
            if *at <= cutoff {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self) -> usize {
        self.attempts.len()
    }

    fn volume(&self) -> Decimal {
        self.attempts.iter().map(|(_, amount)| *amount).sum()
    }
}

#[derive(Debug, Default)]
struct Counters {
    windows: HashMap<VelocityKey, AttemptWindow>,
    /// Email and card keys recorded together with each user.
    linked: HashMap<String, BTreeSet<VelocityKey>>,
}

/// In-process sliding-window counters.
///
/// All keys share one mutex so the check over every dimension and the
/// recording on every dimension happen as one atomic step.
#[derive(Debug, Default, Clone)]
pub struct InMemoryVelocityStore {
    counters: Arc<Mutex<Counters>>,
}

impl InMemoryVelocityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding attempts.
    pub async fn tracked_keys(&self) -> usize {
        let counters = self.counters.lock().await;
        counters.windows.values().filter(|w| w.count() > 0).count()
    }

    /// Number of users with linked email or card keys.
    pub async fn linked_users(&self) -> usize {
        self.counters.lock().await.linked.len()
    }
}

#[async_trait]
impl VelocityStore for InMemoryVelocityStore {
    async fn check_and_record(
        &self,
        checks: &[CounterCheck],
        amount: Decimal,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Violation>> {
        let mut counters = self.counters.lock().await;

        let mut violations = Vec::new();
        for check in checks {
            let Some(slot) = counters.windows.get_mut(&check.key) else {
                if check.max_attempts == 0 {
                    violations.push(Violation::for_dimension(check.key.dimension));
                }
                if let Some(max_amount) = check.max_amount
                    && amount > max_amount
                {
                    violations.push(Violation::UserAmount);
                }
                continue;
            };
            slot.prune(now, window);

            if slot.count() >= check.max_attempts as usize {
                violations.push(Violation::for_dimension(check.key.dimension));
            }
            if let Some(max_amount) = check.max_amount
                && slot.volume() + amount > max_amount
            {
                violations.push(Violation::UserAmount);
            }
        }

        if !violations.is_empty() {
            return Ok(violations);
        }

        for check in checks {
            counters
                .windows
                .entry(check.key.clone())
                .or_default()
                .attempts
                .push_back((now, amount));
        }

        if let Some(user) = checks.iter().find(|c| c.key.dimension == Dimension::User) {
            let linked = checks
                .iter()
                .filter(|c| matches!(c.key.dimension, Dimension::Email | Dimension::CardFingerprint))
                .map(|c| c.key.clone())
                .collect::<Vec<_>>();
            counters
                .linked
                .entry(user.key.value.clone())
                .or_default()
                .extend(linked);
        }

        // Keep the maps from growing without bound.
        let Counters { windows, linked } = &mut *counters;
        windows.retain(|_, w| {
            w.prune(now, window);
            w.count() > 0
        });
        linked.retain(|_, keys| {
            keys.retain(|key| windows.contains_key(key));
            !keys.is_empty()
        });

        Ok(violations)
    }

    async fn clear_user(&self, user_id: &str) -> Result<()> {
        let mut counters = self.counters.lock().await;
        counters
            .windows
            .remove(&VelocityKey::new(Dimension::User, user_id));
        if let Some(linked) = counters.linked.remove(user_id) {
            for key in linked {
                counters.windows.remove(&key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn user_check(max_attempts: u32) -> CounterCheck {
        CounterCheck {
            key: VelocityKey::new(Dimension::User, "user-1"),
            max_attempts,
            max_amount: None,
        }
    }

    #[tokio::test]
    async fn test_attempts_expire_after_window() {
        let store = InMemoryVelocityStore::new();
        let window = Duration::hours(1);
        let start = Utc::now();

        for i in 0..2 {
            let v = store
                .check_and_record(&[user_check(2)], dec!(10), window, start + Duration::minutes(i))
                .await
                .unwrap();
            assert!(v.is_empty());
        }
        let denied = store
            .check_and_record(&[user_check(2)], dec!(10), window, start + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(denied, vec![Violation::UserAttempts]);

        let later = start + Duration::minutes(61);
        let allowed = store
            .check_and_record(&[user_check(2)], dec!(10), window, later)
            .await
            .unwrap();
        assert!(allowed.is_empty());
    }

    #[tokio::test]
    async fn test_amount_ceiling() {
        let store = InMemoryVelocityStore::new();
        let check = CounterCheck {
            key: VelocityKey::new(Dimension::User, "user-1"),
            max_attempts: 10,
            max_amount: Some(dec!(1000)),
        };
        let now = Utc::now();
        let window = Duration::hours(1);

        assert!(store.check_and_record(&[check.clone()], dec!(600), window, now).await.unwrap().is_empty());
        let denied = store
            .check_and_record(&[check.clone()], dec!(500), window, now)
            .await
            .unwrap();
        assert_eq!(denied, vec![Violation::UserAmount]);
        assert!(store.check_and_record(&[check], dec!(400), window, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_user_keeps_shared_ip_counter() {
        let store = InMemoryVelocityStore::new();
        let checks = vec![
            user_check(5),
            CounterCheck {
                key: VelocityKey::new(Dimension::Email, "a@example.com"),
                max_attempts: 5,
                max_amount: None,
            },
            CounterCheck {
                key: VelocityKey::new(Dimension::Ip, "10.0.0.1"),
                max_attempts: 5,
                max_amount: None,
            },
        ];
        store
            .check_and_record(&checks, dec!(1), Duration::hours(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(store.tracked_keys().await, 3);

        store.clear_user("user-1").await.unwrap();
        assert_eq!(store.tracked_keys().await, 1);

        // Idempotent.
        store.clear_user("user-1").await.unwrap();
        assert_eq!(store.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn test_expired_keys_release_their_links() {
        let store = InMemoryVelocityStore::new();
        let window = Duration::hours(1);
        let start = Utc::now();
        for (i, user) in ["user-1", "user-2", "user-3"].into_iter().enumerate() {
            let checks = vec![
                CounterCheck {
                    key: VelocityKey::new(Dimension::User, user),
                    max_attempts: 5,
                    max_amount: None,
                },
                CounterCheck {
                    key: VelocityKey::new(Dimension::CardFingerprint, format!("fp_{}", i)),
                    max_attempts: 5,
                    max_amount: None,
                },
            ];
            store
                .check_and_record(&checks, dec!(1), window, start)
                .await
                .unwrap();
        }
        assert_eq!(store.tracked_keys().await, 6);
        assert_eq!(store.linked_users().await, 3);

        // Any later attempt sweeps what fell out of the window.
        store
            .check_and_record(&[user_check(5)], dec!(1), window, start + Duration::minutes(61))
            .await
            .unwrap();
        assert_eq!(store.tracked_keys().await, 1);
        assert_eq!(store.linked_users().await, 0);
    }
}
