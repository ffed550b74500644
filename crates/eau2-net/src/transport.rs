use std::net::SocketAddrV4;

use eau2_protocol::Message;
use eau2_types::NodeId;

use crate::error::NetResult;

/// Message transport shared by the store and its listener thread.
///
/// All methods are synchronous. `send` only enqueues, and `receive` only
/// polls, so neither blocks on the network.
pub trait KvNet: Send + Sync {
    /// Join the cluster, blocking until this node has been assigned an id.
    fn register_node(&self, listen: SocketAddrV4) -> NetResult<NodeId>;

    fn node_id(&self) -> Option<NodeId>;

    /// Queue `msg` for delivery to `msg.target`. Messages addressed to this
    /// node skip the network and land straight in the inbound queue.
    fn send(&self, msg: Message) -> NetResult<()>;

    /// Next inbound message, if any.
    fn receive(&self) -> Option<Message>;

    fn ready(&self) -> bool;

    /// Stop all background work. Further sends fail with `ShutDown`.
    fn shutdown(&self);
}
