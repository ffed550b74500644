//! Transport layer for eau2.
//!
//! Nodes find each other through the [`Registrar`]: each node connects to it,
//! announces its listen address, and receives the [`Directory`] once every
//! expected node has checked in. After that, [`TcpNet`] moves whole messages
//! between nodes over lazily opened TCP connections. [`LocalNet`] implements
//! the same [`KvNet`] contract inside one process.

pub mod config;
pub mod directory;
pub mod error;
pub mod local;
pub mod registrar;
pub mod tcp;
pub mod transport;

pub use config::{NetConfig, RegistrarConfig};
pub use directory::Directory;
pub use error::{NetError, NetResult};
pub use local::{LocalHub, LocalNet};
pub use registrar::Registrar;
pub use tcp::TcpNet;
pub use transport::KvNet;
