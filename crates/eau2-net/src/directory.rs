use std::net::{Ipv4Addr, SocketAddrV4};

use eau2_types::{NodeId, REGISTRAR_ID};

use crate::error::{NetError, NetResult};

/// Node id → listen address, as handed out by the registrar.
///
/// Entry 0 is the registrar itself; nodes are 1..len.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directory {
    nodes: Vec<SocketAddrV4>,
}

impl Directory {
    pub fn new(nodes: Vec<SocketAddrV4>) -> NetResult<Self> {
        if nodes.is_empty() {
            return Err(NetError::InvalidDirectory(
                "missing the registrar entry".into(),
            ));
        }
        Ok(Self { nodes })
    }

    /// Build from a received Directory message, checking that `idx` names
    /// one of the nodes.
    pub fn for_node(idx: NodeId, nodes: Vec<SocketAddrV4>) -> NetResult<Self> {
        let directory = Self::new(nodes)?;
        if idx == REGISTRAR_ID || idx >= directory.len() as u64 {
            return Err(NetError::InvalidDirectory(format!(
                "node id {idx} outside 1..{}",
                directory.len()
            )));
        }
        Ok(directory)
    }

    pub fn get(&self, id: NodeId) -> Option<SocketAddrV4> {
        usize::try_from(id).ok().and_then(|i| self.nodes.get(i)).copied()
    }

    pub fn registrar(&self) -> SocketAddrV4 {
        self.nodes[0]
    }

    pub fn nodes(&self) -> &[SocketAddrV4] {
        &self.nodes
    }

    /// Entries including the registrar.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of store nodes, excluding the registrar.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Whether a connection from `ip` may come from a cluster member.
    /// Entries bound to the unspecified address match any peer.
    pub fn admits(&self, ip: Ipv4Addr) -> bool {
        self.nodes
            .iter()
            .any(|addr| addr.ip() == &ip || addr.ip().is_unspecified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, last), port)
    }

    #[test]
    fn lookup_by_id() {
        let dir = Directory::new(vec![addr(1, 4500), addr(2, 9000), addr(3, 9000)]).unwrap();
        assert_eq!(dir.registrar(), addr(1, 4500));
        assert_eq!(dir.get(2), Some(addr(3, 9000)));
        assert_eq!(dir.get(3), None);
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.node_count(), 2);
    }

    #[test]
    fn empty_directory_is_invalid() {
        assert!(matches!(
            Directory::new(Vec::new()),
            Err(NetError::InvalidDirectory(_))
        ));
    }

    #[test]
    fn node_index_must_be_a_node() {
        let nodes = vec![addr(1, 4500), addr(2, 9000)];
        assert!(Directory::for_node(1, nodes.clone()).is_ok());
        assert!(Directory::for_node(0, nodes.clone()).is_err());
        assert!(Directory::for_node(2, nodes).is_err());
    }

    #[test]
    fn admits_known_ips_only() {
        let dir = Directory::new(vec![addr(1, 4500), addr(2, 9000)]).unwrap();
        assert!(dir.admits(Ipv4Addr::new(192, 168, 1, 2)));
        assert!(!dir.admits(Ipv4Addr::new(10, 0, 0, 1)));

        let open = Directory::new(vec![addr(1, 4500), SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 1)]).unwrap();
        assert!(open.admits(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
