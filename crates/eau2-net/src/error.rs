use std::net::SocketAddrV4;

use eau2_protocol::{MessageKind, ProtocolError};
use eau2_types::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("node is already registered as {0}")]
    AlreadyRegistered(NodeId),

    #[error("node is not registered")]
    NotRegistered,

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("unexpected {} message", .0.name())]
    UnexpectedMessage(MessageKind),

    #[error("{0} registered more than once")]
    DuplicateRegistration(SocketAddrV4),

    #[error("invalid directory: {0}")]
    InvalidDirectory(String),

    #[error("transport is shut down")]
    ShutDown,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn display_messages() {
        assert_eq!(
            NetError::AlreadyRegistered(3).to_string(),
            "node is already registered as 3"
        );
        assert_eq!(
            NetError::UnexpectedMessage(MessageKind::Put).to_string(),
            "unexpected Put message"
        );
        let err = NetError::Connect {
            addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("failed to connect to 127.0.0.1:1"));
    }

    #[test]
    fn protocol_errors_convert() {
        let err: NetError = ProtocolError::UnknownMessageKind(12).into();
        assert!(matches!(err, NetError::Protocol(ProtocolError::UnknownMessageKind(12))));
    }
}
