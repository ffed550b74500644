use std::collections::VecDeque;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use eau2_protocol::Message;
use eau2_types::NodeId;
use tracing::debug;

use crate::error::{NetError, NetResult};
use crate::transport::KvNet;

type Inbox = Arc<Mutex<VecDeque<Message>>>;

/// In-process stand-in for the registrar and the network. Every
/// [`LocalNet`] created from the same hub can reach every other one.
#[derive(Clone, Default)]
pub struct LocalHub {
    // Index is the node id; slot 0 is the registrar and stays empty.
    inboxes: Arc<Mutex<Vec<Option<Inbox>>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            inboxes: Arc::new(Mutex::new(vec![None])),
        }
    }

    /// A new, unregistered transport attached to this hub.
    pub fn connect(&self) -> LocalNet {
        LocalNet {
            hub: self.clone(),
            id: OnceLock::new(),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Registered nodes, excluding the registrar slot.
    pub fn node_count(&self) -> usize {
        self.inboxes.lock().expect("lock poisoned").len().saturating_sub(1)
    }

    fn join(&self, inbox: Inbox) -> NodeId {
        let mut inboxes = self.inboxes.lock().expect("lock poisoned");
        if inboxes.is_empty() {
            inboxes.push(None);
        }
        inboxes.push(Some(inbox));
        (inboxes.len() - 1) as NodeId
    }

    fn inbox(&self, id: NodeId) -> Option<Inbox> {
        let inboxes = self.inboxes.lock().expect("lock poisoned");
        usize::try_from(id)
            .ok()
            .and_then(|i| inboxes.get(i))
            .and_then(Clone::clone)
    }
}

pub struct LocalNet {
    hub: LocalHub,
    id: OnceLock<NodeId>,
    inbox: Inbox,
    shut_down: AtomicBool,
}

impl KvNet for LocalNet {
    /// Takes the next free id on the hub; `listen` is ignored.
    fn register_node(&self, _listen: SocketAddrV4) -> NetResult<NodeId> {
        if let Some(id) = self.id.get() {
            return Err(NetError::AlreadyRegistered(*id));
        }
        let mut assigned = None;
        let id = *self.id.get_or_init(|| {
            let id = self.hub.join(Arc::clone(&self.inbox));
            assigned = Some(id);
            id
        });
        match assigned {
            Some(_) => {
                debug!(node = id, "joined local hub");
                Ok(id)
            }
            None => Err(NetError::AlreadyRegistered(id)),
        }
    }

    fn node_id(&self) -> Option<NodeId> {
        self.id.get().copied()
    }

    fn send(&self, msg: Message) -> NetResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(NetError::ShutDown);
        }
        let me = self.node_id().ok_or(NetError::NotRegistered)?;
        if msg.target == me {
            self.inbox.lock().expect("lock poisoned").push_back(msg);
            return Ok(());
        }
        let inbox = self
            .hub
            .inbox(msg.target)
            .ok_or(NetError::UnknownNode(msg.target))?;
        inbox.lock().expect("lock poisoned").push_back(msg);
        Ok(())
    }

    fn receive(&self) -> Option<Message> {
        self.inbox.lock().expect("lock poisoned").pop_front()
    }

    fn ready(&self) -> bool {
        self.id.get().is_some() && !self.shut_down.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eau2_protocol::MessageKind;
    use std::net::Ipv4Addr;

    fn any_addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)
    }

    #[test]
    fn ids_start_at_one() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        assert_eq!(a.register_node(any_addr()).unwrap(), 1);
        assert_eq!(b.register_node(any_addr()).unwrap(), 2);
        assert_eq!(hub.node_count(), 2);
        assert!(a.ready());
    }

    #[test]
    fn default_hub_also_reserves_the_registrar_slot() {
        let hub = LocalHub::default();
        assert_eq!(hub.connect().register_node(any_addr()).unwrap(), 1);
    }

    #[test]
    fn registering_twice_fails() {
        let hub = LocalHub::new();
        let a = hub.connect();
        a.register_node(any_addr()).unwrap();
        assert!(matches!(
            a.register_node(any_addr()),
            Err(NetError::AlreadyRegistered(1))
        ));
    }

    #[test]
    fn messages_reach_their_target() {
        let hub = LocalHub::new();
        let a = hub.connect();
        let b = hub.connect();
        a.register_node(any_addr()).unwrap();
        b.register_node(any_addr()).unwrap();

        a.send(Message::status(1, 2)).unwrap();
        assert!(a.receive().is_none());
        assert_eq!(b.receive().map(|m| m.kind()), Some(MessageKind::Status));

        b.send(Message::status(2, 2)).unwrap();
        assert!(b.receive().is_some());
    }

    #[test]
    fn send_errors() {
        let hub = LocalHub::new();
        let a = hub.connect();
        assert!(matches!(a.send(Message::status(1, 1)), Err(NetError::NotRegistered)));
        a.register_node(any_addr()).unwrap();
        assert!(matches!(a.send(Message::status(1, 0)), Err(NetError::UnknownNode(0))));
        assert!(matches!(a.send(Message::status(1, 5)), Err(NetError::UnknownNode(5))));
        a.shutdown();
        assert!(!a.ready());
        assert!(matches!(a.send(Message::status(1, 1)), Err(NetError::ShutDown)));
    }
}
