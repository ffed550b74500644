use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port the registrar listens on unless configured otherwise.
pub const DEFAULT_REGISTRAR_PORT: u16 = 4500;

/// Settings for a node's TCP transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub registrar_addr: SocketAddrV4,
    /// Bound on each outbound connect, registrar included.
    pub connect_timeout_ms: u64,
    /// How long `register_node` waits for the directory. The registrar only
    /// answers once every expected node has checked in.
    pub register_timeout_ms: u64,
    pub ready_poll_interval_ms: u64,
    pub worker_threads: usize,
}

impl NetConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            registrar_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_REGISTRAR_PORT),
            connect_timeout_ms: 3_000,
            register_timeout_ms: 60_000,
            ready_poll_interval_ms: 10,
            worker_threads: 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrarConfig {
    pub bind_addr: SocketAddrV4,
    /// Registrations to collect before the directory goes out.
    pub expected_nodes: usize,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_REGISTRAR_PORT),
            expected_nodes: 1,
        }
    }
}
