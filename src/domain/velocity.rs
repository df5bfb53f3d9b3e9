use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// The party behind a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub email: String,
    pub ip: String,
    #[serde(default)]
    pub card_fingerprint: Option<String>,
}

/// Axis along which attempts are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Dimension {
    User,
    Email,
    Ip,
    CardFingerprint,
}

/// Key of one rolling counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VelocityKey {
    pub dimension: Dimension,
    pub value: String,
}

impl VelocityKey {
    pub fn new(dimension: Dimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: value.into(),
        }
    }
}

/// A limit that an attempt crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Violation {
    UserAttempts,
    EmailAttempts,
    IpAttempts,
    CardAttempts,
    /// Summed amount of the user's attempts in the window.
    UserAmount,
}

impl Violation {
    pub fn for_dimension(dimension: Dimension) -> Self {
        match dimension {
            Dimension::User => Self::UserAttempts,
            Dimension::Email => Self::EmailAttempts,
            Dimension::Ip => Self::IpAttempts,
            Dimension::CardFingerprint => Self::CardAttempts,
        }
    }
}

/// One counter to evaluate: its key, the attempt limit and an optional
/// amount ceiling for the same window.
#[derive(Debug, Clone)]
pub struct CounterCheck {
    pub key: VelocityKey,
    pub max_attempts: u32,
    pub max_amount: Option<Decimal>,
}

/// Verdict of the velocity guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VelocityDecision {
    pub allowed: bool,
    pub violations: Vec<Violation>,
    /// Set when the counter store could not be consulted and the attempt
    /// was denied without evaluation.
    pub degraded: bool,
}

impl VelocityDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            violations: Vec::new(),
            degraded: false,
        }
    }

    pub fn deny(violations: Vec<Violation>) -> Self {
        Self {
            allowed: false,
            violations,
            degraded: false,
        }
    }

    pub fn degraded() -> Self {
        Self {
            allowed: false,
            violations: Vec::new(),
            degraded: true,
        }
    }
}
