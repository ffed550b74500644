use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eau2_types::{Key, NodeId, Table};

use crate::payload::Payload;

/// Command header: `kind:u8 | sender:u64 | target:u64 | id:u64`.
pub const COMMAND_HEADER_SIZE: usize = 25;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Row/column selector meaning "the whole table".
pub const WHOLE_OBJECT: u64 = u64::MAX;

/// How long an owner holds a WaitAndGet open before giving up.
pub const DEFAULT_MAX_DELAY_MS: u32 = 5000;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Draw the next id from the process-wide counter.
///
/// Ids are unique per sending node only; a reply reuses the id of its request.
pub fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Ack = 0,
    Nack = 1,
    Put = 2,
    Reply = 3,
    Get = 4,
    WaitAndGet = 5,
    Status = 6,
    Kill = 7,
    Register = 8,
    Directory = 9,
}

impl MessageKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Ack,
            1 => Self::Nack,
            2 => Self::Put,
            3 => Self::Reply,
            4 => Self::Get,
            5 => Self::WaitAndGet,
            6 => Self::Status,
            7 => Self::Kill,
            8 => Self::Register,
            9 => Self::Directory,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ack => "Ack",
            Self::Nack => "Nack",
            Self::Put => "Put",
            Self::Reply => "Reply",
            Self::Get => "Get",
            Self::WaitAndGet => "WaitAndGet",
            Self::Status => "Status",
            Self::Kill => "Kill",
            Self::Register => "Register",
            Self::Directory => "Directory",
        }
    }
}

/// Kind-specific part of a message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    Ack,
    Nack,
    Put {
        col_idx: u64,
        row_idx: u64,
        key: Key,
        value: Arc<Table>,
    },
    Reply {
        payload: Payload,
    },
    Get {
        col_idx: u64,
        row_idx: u64,
        key: Key,
    },
    WaitAndGet {
        col_idx: u64,
        row_idx: u64,
        max_delay_ms: u32,
        key: Key,
    },
    Status,
    Kill,
    Register {
        addr: SocketAddrV4,
    },
    Directory {
        idx: u64,
        nodes: Vec<SocketAddrV4>,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Ack => MessageKind::Ack,
            Self::Nack => MessageKind::Nack,
            Self::Put { .. } => MessageKind::Put,
            Self::Reply { .. } => MessageKind::Reply,
            Self::Get { .. } => MessageKind::Get,
            Self::WaitAndGet { .. } => MessageKind::WaitAndGet,
            Self::Status => MessageKind::Status,
            Self::Kill => MessageKind::Kill,
            Self::Register { .. } => MessageKind::Register,
            Self::Directory { .. } => MessageKind::Directory,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub sender: NodeId,
    pub target: NodeId,
    pub id: u64,
    pub body: MessageBody,
}

impl Message {
    pub fn new(sender: NodeId, target: NodeId, body: MessageBody) -> Self {
        Self {
            sender,
            target,
            id: next_message_id(),
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// The key a Get, WaitAndGet or Put refers to.
    pub fn key(&self) -> Option<&Key> {
        match &self.body {
            MessageBody::Get { key, .. }
            | MessageBody::WaitAndGet { key, .. }
            | MessageBody::Put { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Whole-table Get addressed to the key's home node.
    pub fn get(sender: NodeId, key: Key) -> Self {
        let target = key.home();
        Self::new(
            sender,
            target,
            MessageBody::Get {
                col_idx: WHOLE_OBJECT,
                row_idx: WHOLE_OBJECT,
                key,
            },
        )
    }

    pub fn wait_and_get(sender: NodeId, key: Key, max_delay_ms: u32) -> Self {
        let target = key.home();
        Self::new(
            sender,
            target,
            MessageBody::WaitAndGet {
                col_idx: WHOLE_OBJECT,
                row_idx: WHOLE_OBJECT,
                max_delay_ms,
                key,
            },
        )
    }

    pub fn put(sender: NodeId, key: Key, value: Arc<Table>) -> Self {
        let target = key.home();
        Self::new(
            sender,
            target,
            MessageBody::Put {
                col_idx: WHOLE_OBJECT,
                row_idx: WHOLE_OBJECT,
                key,
                value,
            },
        )
    }

    /// Answer `request`, reusing its id.
    pub fn reply(request: &Message, payload: Payload) -> Self {
        Self::answer(request, MessageBody::Reply { payload })
    }

    pub fn ack(request: &Message) -> Self {
        Self::answer(request, MessageBody::Ack)
    }

    pub fn nack(request: &Message) -> Self {
        Self::answer(request, MessageBody::Nack)
    }

    pub fn status(sender: NodeId, target: NodeId) -> Self {
        Self::new(sender, target, MessageBody::Status)
    }

    pub fn kill(sender: NodeId, target: NodeId) -> Self {
        Self::new(sender, target, MessageBody::Kill)
    }

    /// A node announcing its listen address; it has no id yet.
    pub fn register(addr: SocketAddrV4) -> Self {
        Self::new(0, 0, MessageBody::Register { addr })
    }

    /// Directory sent from the registrar; `idx` is the receiver's id.
    pub fn directory(idx: NodeId, nodes: Vec<SocketAddrV4>) -> Self {
        Self {
            sender: eau2_types::REGISTRAR_ID,
            target: idx,
            id: 0,
            body: MessageBody::Directory { idx, nodes },
        }
    }

    fn answer(request: &Message, body: MessageBody) -> Self {
        Self {
            sender: request.target,
            target: request.sender,
            id: request.id,
            body,
        }
    }
}
