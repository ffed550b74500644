//! The eau2 key-value store.
//!
//! Each node holds the tables whose keys it owns (plus any it has fetched)
//! and serves them to other nodes. A [`Store`] answers local reads directly,
//! fetches remote keys from their home node on demand, and runs a listener
//! thread that applies Put, Get and WaitAndGet requests arriving over its
//! [`KvNet`](eau2_net::KvNet) transport.

pub mod config;
pub mod error;
pub mod store;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use store::Store;
