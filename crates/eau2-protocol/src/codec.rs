use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use eau2_types::{Key, Table};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{
    Message, MessageBody, MessageKind, COMMAND_HEADER_SIZE, MAX_MESSAGE_SIZE,
};
use crate::payload::{ensure_remaining, Payload};

/// Size of one `address:u32 | port:u16` entry in Register and Directory.
pub(crate) const ADDR_ENTRY_SIZE: usize = 6;

/// Codec for encoding/decoding eau2 messages.
pub struct Eau2Codec;

impl Eau2Codec {
    /// Encode a message: `[25-byte command header][kind-specific body]`.
    pub fn encode(msg: &Message) -> ProtocolResult<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(COMMAND_HEADER_SIZE + 64);
        buf.put_u8(msg.kind().as_byte());
        buf.put_u64_le(msg.sender);
        buf.put_u64_le(msg.target);
        buf.put_u64_le(msg.id);

        match &msg.body {
            MessageBody::Ack | MessageBody::Nack | MessageBody::Status | MessageBody::Kill => {}
            MessageBody::Get {
                col_idx,
                row_idx,
                key,
            } => {
                buf.put_u64_le(*col_idx);
                buf.put_u64_le(*row_idx);
                Payload::Key(key.clone()).encode(&mut buf)?;
            }
            MessageBody::WaitAndGet {
                col_idx,
                row_idx,
                max_delay_ms,
                key,
            } => {
                buf.put_u64_le(*col_idx);
                buf.put_u64_le(*row_idx);
                buf.put_u32_le(*max_delay_ms);
                Payload::Key(key.clone()).encode(&mut buf)?;
            }
            MessageBody::Put {
                col_idx,
                row_idx,
                key,
                value,
            } => {
                buf.put_u64_le(*col_idx);
                buf.put_u64_le(*row_idx);
                Payload::Key(key.clone()).encode(&mut buf)?;
                Payload::Table(Arc::clone(value)).encode(&mut buf)?;
            }
            MessageBody::Reply { payload } => payload.encode(&mut buf)?,
            MessageBody::Register { addr } => put_addr(&mut buf, addr),
            MessageBody::Directory { idx, nodes } => {
                buf.put_u64_le(*idx);
                buf.put_u64_le(nodes.len() as u64);
                for node in nodes {
                    put_addr(&mut buf, node);
                }
            }
        }

        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: buf.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(buf.to_vec())
    }

    /// Decode one message from the front of `data`. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(Message, usize)> {
        let mut buf = data;
        ensure_remaining(buf, COMMAND_HEADER_SIZE)?;
        let kind_byte = buf.get_u8();
        let sender = buf.get_u64_le();
        let target = buf.get_u64_le();
        let id = buf.get_u64_le();
        let kind =
            MessageKind::from_byte(kind_byte).ok_or(ProtocolError::UnknownMessageKind(kind_byte))?;

        let body = match kind {
            MessageKind::Ack => MessageBody::Ack,
            MessageKind::Nack => MessageBody::Nack,
            MessageKind::Status => MessageBody::Status,
            MessageKind::Kill => MessageBody::Kill,
            MessageKind::Get => {
                ensure_remaining(buf, 16)?;
                let col_idx = buf.get_u64_le();
                let row_idx = buf.get_u64_le();
                let key = decode_key(&mut buf)?;
                MessageBody::Get {
                    col_idx,
                    row_idx,
                    key,
                }
            }
            MessageKind::WaitAndGet => {
                ensure_remaining(buf, 20)?;
                let col_idx = buf.get_u64_le();
                let row_idx = buf.get_u64_le();
                let max_delay_ms = buf.get_u32_le();
                let key = decode_key(&mut buf)?;
                MessageBody::WaitAndGet {
                    col_idx,
                    row_idx,
                    max_delay_ms,
                    key,
                }
            }
            MessageKind::Put => {
                ensure_remaining(buf, 16)?;
                let col_idx = buf.get_u64_le();
                let row_idx = buf.get_u64_le();
                let key = decode_key(&mut buf)?;
                let value = decode_table(&mut buf)?;
                MessageBody::Put {
                    col_idx,
                    row_idx,
                    key,
                    value,
                }
            }
            MessageKind::Reply => MessageBody::Reply {
                payload: Payload::decode(&mut buf)?,
            },
            MessageKind::Register => MessageBody::Register {
                addr: get_addr(&mut buf)?,
            },
            MessageKind::Directory => {
                ensure_remaining(buf, 16)?;
                let idx = buf.get_u64_le();
                let count = buf.get_u64_le();
                let needed = usize::try_from(count)
                    .ok()
                    .and_then(|n| n.checked_mul(ADDR_ENTRY_SIZE))
                    .filter(|n| *n <= MAX_MESSAGE_SIZE)
                    .ok_or(ProtocolError::MessageTooLarge {
                        size: usize::MAX,
                        max: MAX_MESSAGE_SIZE,
                    })?;
                ensure_remaining(buf, needed)?;
                let mut nodes = Vec::with_capacity(needed / ADDR_ENTRY_SIZE);
                for _ in 0..count {
                    nodes.push(get_addr(&mut buf)?);
                }
                MessageBody::Directory { idx, nodes }
            }
        };

        let consumed = data.len() - buf.len();
        Ok((
            Message {
                sender,
                target,
                id,
                body,
            },
            consumed,
        ))
    }

    /// Encode a lone payload (no command header).
    pub fn encode_payload(payload: &Payload) -> ProtocolResult<Vec<u8>> {
        let mut buf = BytesMut::new();
        payload.encode(&mut buf)?;
        Ok(buf.to_vec())
    }

    /// Decode a lone payload that must occupy all of `data`.
    pub fn decode_payload(data: &[u8]) -> ProtocolResult<Payload> {
        let mut buf = data;
        let payload = Payload::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after payload",
                buf.len()
            )));
        }
        Ok(payload)
    }
}

fn put_addr(buf: &mut BytesMut, addr: &SocketAddrV4) {
    buf.put_u32_le(u32::from(*addr.ip()));
    buf.put_u16_le(addr.port());
}

fn get_addr(buf: &mut &[u8]) -> ProtocolResult<SocketAddrV4> {
    ensure_remaining(buf, ADDR_ENTRY_SIZE)?;
    let ip = Ipv4Addr::from(buf.get_u32_le());
    let port = buf.get_u16_le();
    Ok(SocketAddrV4::new(ip, port))
}

fn decode_key(buf: &mut &[u8]) -> ProtocolResult<Key> {
    match Payload::decode(buf)? {
        Payload::Key(key) => Ok(key),
        other => Err(ProtocolError::UnexpectedPayload {
            expected: "key",
            actual: other.payload_type(),
        }),
    }
}

fn decode_table(buf: &mut &[u8]) -> ProtocolResult<Arc<Table>> {
    match Payload::decode(buf)? {
        Payload::Table(table) => Ok(table),
        other => Err(ProtocolError::UnexpectedPayload {
            expected: "table",
            actual: other.payload_type(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DEFAULT_MAX_DELAY_MS, WHOLE_OBJECT};
    use eau2_types::Column;

    fn addr(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), port)
    }

    fn sample_table() -> Arc<Table> {
        let mut table = Table::from_column(vec![1i32, 2, 3]);
        table.add_column(vec!["a", "b", "c"]);
        table.add_column(vec![true, false, true]);
        Arc::new(table)
    }

    macro_rules! roundtrip_test {
        ($name:ident, $msg:expr) => {
            #[test]
            fn $name() {
                let msg = $msg;
                let encoded = Eau2Codec::encode(&msg).unwrap();
                let (decoded, consumed) = Eau2Codec::decode(&encoded).unwrap();
                assert_eq!(consumed, encoded.len());
                assert_eq!(decoded, msg);
            }
        };
    }

    roundtrip_test!(ack_roundtrip, Message::ack(&Message::status(1, 2)));
    roundtrip_test!(nack_roundtrip, Message::nack(&Message::get(1, Key::new("k", 2))));
    roundtrip_test!(status_roundtrip, Message::status(3, 1));
    roundtrip_test!(kill_roundtrip, Message::kill(0, 4));
    roundtrip_test!(get_roundtrip, Message::get(1, Key::new("frame", 2)));
    roundtrip_test!(
        wait_and_get_roundtrip,
        Message::wait_and_get(2, Key::new("frame", 1), DEFAULT_MAX_DELAY_MS)
    );
    roundtrip_test!(put_roundtrip, Message::put(1, Key::new("x", 2), sample_table()));
    roundtrip_test!(
        reply_table_roundtrip,
        Message::reply(&Message::get(1, Key::new("x", 2)), Payload::Table(sample_table()))
    );
    roundtrip_test!(
        reply_scalar_roundtrip,
        Message::reply(&Message::get(1, Key::new("x", 2)), Payload::Double(2.5))
    );
    roundtrip_test!(register_roundtrip, Message::register(addr(9001)));
    roundtrip_test!(
        directory_roundtrip,
        Message::directory(2, vec![addr(8000), addr(9001), addr(9002)])
    );
    roundtrip_test!(
        sub_selection_get_roundtrip,
        Message {
            sender: 1,
            target: 2,
            id: 77,
            body: MessageBody::Get {
                col_idx: 0,
                row_idx: 4,
                key: Key::new("x", 2),
            },
        }
    );

    #[test]
    fn header_layout() {
        let msg = Message {
            sender: 1,
            target: 2,
            id: 3,
            body: MessageBody::Kill,
        };
        let bytes = Eau2Codec::encode(&msg).unwrap();
        assert_eq!(bytes.len(), COMMAND_HEADER_SIZE);
        assert_eq!(bytes[0], MessageKind::Kill.as_byte());
        assert_eq!(&bytes[1..9], &1u64.to_le_bytes());
        assert_eq!(&bytes[9..17], &2u64.to_le_bytes());
        assert_eq!(&bytes[17..25], &3u64.to_le_bytes());
    }

    #[test]
    fn register_layout() {
        let bytes = Eau2Codec::encode(&Message::register(addr(0x1234))).unwrap();
        assert_eq!(bytes.len(), COMMAND_HEADER_SIZE + ADDR_ENTRY_SIZE);
        let ip = u32::from(Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(&bytes[25..29], &ip.to_le_bytes());
        assert_eq!(&bytes[29..31], &0x1234u16.to_le_bytes());
    }

    #[test]
    fn wait_and_get_places_delay_before_key() {
        let msg = Message::wait_and_get(1, Key::new("k", 2), 1234);
        let bytes = Eau2Codec::encode(&msg).unwrap();
        assert_eq!(&bytes[25..33], &WHOLE_OBJECT.to_le_bytes());
        assert_eq!(&bytes[33..41], &WHOLE_OBJECT.to_le_bytes());
        assert_eq!(&bytes[41..45], &1234u32.to_le_bytes());
    }

    #[test]
    fn decode_reports_bytes_consumed_with_trailing_data() {
        let mut bytes = Eau2Codec::encode(&Message::status(1, 2)).unwrap();
        let first = bytes.len();
        bytes.extend(Eau2Codec::encode(&Message::kill(1, 2)).unwrap());
        let (msg, consumed) = Eau2Codec::decode(&bytes).unwrap();
        assert_eq!(consumed, first);
        assert_eq!(msg.kind(), MessageKind::Status);
        let (msg, _) = Eau2Codec::decode(&bytes[consumed..]).unwrap();
        assert_eq!(msg.kind(), MessageKind::Kill);
    }

    #[test]
    fn decode_truncated_header() {
        let err = Eau2Codec::decode(&[0, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { needed: 25, available: 3 }));
    }

    #[test]
    fn decode_unknown_kind() {
        let mut bytes = Eau2Codec::encode(&Message::status(1, 2)).unwrap();
        bytes[0] = 42;
        let err = Eau2Codec::decode(&bytes).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageKind(42)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn decode_truncated_put() {
        let bytes = Eau2Codec::encode(&Message::put(1, Key::new("x", 2), sample_table())).unwrap();
        for cut in [COMMAND_HEADER_SIZE, COMMAND_HEADER_SIZE + 10, bytes.len() - 1] {
            let err = Eau2Codec::decode(&bytes[..cut]).unwrap_err();
            assert!(err.is_fatal(), "cut at {cut} should be fatal");
        }
    }

    #[test]
    fn get_with_non_key_payload_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageKind::Get.as_byte());
        buf.put_u64_le(1);
        buf.put_u64_le(2);
        buf.put_u64_le(3);
        buf.put_u64_le(WHOLE_OBJECT);
        buf.put_u64_le(WHOLE_OBJECT);
        Payload::String("not a key".into()).encode(&mut buf).unwrap();
        let err = Eau2Codec::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedPayload { expected: "key", .. }));
    }

    #[test]
    fn directory_count_beyond_input_is_rejected() {
        let mut bytes = Eau2Codec::encode(&Message::directory(1, vec![addr(1), addr(2)])).unwrap();
        bytes[33..41].copy_from_slice(&5u64.to_le_bytes());
        assert!(matches!(
            Eau2Codec::decode(&bytes).unwrap_err(),
            ProtocolError::Truncated { .. }
        ));
        bytes[33..41].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            Eau2Codec::decode(&bytes).unwrap_err(),
            ProtocolError::MessageTooLarge { .. }
        ));
    }

    #[test]
    fn oversized_message_is_rejected_on_encode() {
        let big = vec![0u8; MAX_MESSAGE_SIZE];
        let msg = Message::put(1, Key::new("big", 2), Arc::new(Table::from_column(big)));
        let err = Eau2Codec::encode(&msg).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }

    #[test]
    fn payload_roundtrip() {
        let payload = Payload::Column(Column::from(vec![1.5f32, -2.0]));
        let bytes = Eau2Codec::encode_payload(&payload).unwrap();
        assert_eq!(Eau2Codec::decode_payload(&bytes).unwrap(), payload);
    }

    #[test]
    fn payload_with_trailing_bytes_is_rejected() {
        let mut bytes = Eau2Codec::encode_payload(&Payload::I64(9)).unwrap();
        bytes.push(0);
        assert!(matches!(
            Eau2Codec::decode_payload(&bytes).unwrap_err(),
            ProtocolError::Malformed(_)
        ));
    }
}
