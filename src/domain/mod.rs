//! Domain model: applications, the payment state machine, audit events,
//! velocity and gateway types, and the ports the engine talks through.

pub mod event;
pub mod gateway;
pub mod permit;
pub mod ports;
pub mod state_machine;
pub mod velocity;
