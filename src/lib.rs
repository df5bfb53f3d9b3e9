//! Keeps permit applications in step with an asynchronous payment gateway.
//!
//! Webhooks, pull-based recovery and a periodic sweep all drive the same
//! transactional state machine, so lost, late or duplicated gateway events
//! converge to one consistent application status.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
