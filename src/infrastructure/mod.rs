//! Adapters behind the domain ports: stores, counters and gateway clients.

pub mod http_gateway;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated_gateway;
pub mod velocity_store;
