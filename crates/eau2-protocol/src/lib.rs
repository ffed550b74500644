//! Wire protocol for eau2.
//!
//! Every message on the wire is a fixed 25-byte command header followed by a
//! kind-specific body. Bodies are built from fixed-width integers and
//! [`Payload`]s, the self-describing unit that can nest: a table payload is
//! followed by one column payload per column, and each column payload by the
//! payload holding its elements. There is no delimiter besides the declared
//! lengths, so decoding rejects anything that does not add up.
//!
//! All integers and floats are little-endian.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;

pub use codec::Eau2Codec;
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{read_message, write_message};
pub use message::{
    next_message_id, Message, MessageBody, MessageKind, COMMAND_HEADER_SIZE,
    DEFAULT_MAX_DELAY_MS, MAX_MESSAGE_SIZE, WHOLE_OBJECT,
};
pub use payload::{Payload, PayloadHeader, PayloadType, PAYLOAD_HEADER_SIZE};
