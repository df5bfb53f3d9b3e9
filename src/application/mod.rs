//! Application layer: the services that drive the payment lifecycle.
//!
//! Every state change goes through the [`ledger::PaymentLedger`], which
//! serializes transitions per application and commits each one together
//! with its audit event. The other services decide *which* trigger to apply:
//! webhooks from the gateway, recovery and sweeps pulling the gateway's view,
//! payment attempts started by users and overrides by operators.

pub mod admin;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod payment;
pub mod recovery;
pub mod signature;
pub mod sweeper;
pub mod velocity;
pub mod webhook;
