//! Reading and writing whole messages on a byte stream.
//!
//! The wire carries no length prefix, so the reader walks the same structure
//! the decoder does: fixed fields by kind, then payload headers until the
//! nested `remaining` counts are used up. Only then is the buffered frame
//! handed to [`Eau2Codec::decode`].

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::codec::{Eau2Codec, ADDR_ENTRY_SIZE};
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, MessageKind, COMMAND_HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::payload::{PayloadType, PAYLOAD_HEADER_SIZE};

/// Read exactly one message from `reader`.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte of a
/// message. An unknown kind byte consumes only the command header and yields
/// [`ProtocolError::UnknownMessageKind`], after which the stream is still
/// positioned at a message boundary as far as this reader can tell.
pub async fn read_message<R>(reader: &mut R) -> ProtocolResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let mut frame = Vec::with_capacity(COMMAND_HEADER_SIZE);
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }
    frame.push(first[0]);
    read_more(reader, &mut frame, COMMAND_HEADER_SIZE - 1).await?;

    let kind = MessageKind::from_byte(first[0]).ok_or(ProtocolError::UnknownMessageKind(first[0]))?;
    match kind {
        MessageKind::Ack | MessageKind::Nack | MessageKind::Status | MessageKind::Kill => {}
        MessageKind::Get => {
            read_more(reader, &mut frame, 16).await?;
            read_payloads(reader, &mut frame, 1).await?;
        }
        MessageKind::WaitAndGet => {
            read_more(reader, &mut frame, 20).await?;
            read_payloads(reader, &mut frame, 1).await?;
        }
        MessageKind::Put => {
            read_more(reader, &mut frame, 16).await?;
            read_payloads(reader, &mut frame, 2).await?;
        }
        MessageKind::Reply => read_payloads(reader, &mut frame, 1).await?,
        MessageKind::Register => read_more(reader, &mut frame, ADDR_ENTRY_SIZE).await?,
        MessageKind::Directory => {
            let start = frame.len();
            read_more(reader, &mut frame, 16).await?;
            let count = u64::from_le_bytes(le_u64(&frame[start + 8..start + 16]));
            let entries = usize::try_from(count)
                .ok()
                .and_then(|n| n.checked_mul(ADDR_ENTRY_SIZE))
                .ok_or(ProtocolError::MessageTooLarge {
                    size: usize::MAX,
                    max: MAX_MESSAGE_SIZE,
                })?;
            read_more(reader, &mut frame, entries).await?;
        }
    }

    let (msg, consumed) = Eau2Codec::decode(&frame)?;
    if consumed != frame.len() {
        return Err(ProtocolError::Malformed(format!(
            "{} bytes left over after {} message",
            frame.len() - consumed,
            kind.name()
        )));
    }
    trace!(kind = kind.name(), bytes = frame.len(), id = msg.id, "read message");
    Ok(Some(msg))
}

/// Write the full encoding of `msg` and flush.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = Eau2Codec::encode(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read `count` top-level payloads along with everything nested under them.
async fn read_payloads<R>(reader: &mut R, frame: &mut Vec<u8>, count: u64) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin,
{
    let mut outstanding = count;
    while outstanding > 0 {
        let start = frame.len();
        read_more(reader, frame, PAYLOAD_HEADER_SIZE).await?;
        let tag = frame[start];
        if PayloadType::from_byte(tag).is_none() {
            return Err(ProtocolError::InvalidPayloadType(tag));
        }
        let remaining = u64::from_le_bytes(le_u64(&frame[start + 1..start + 9]));
        let data_len = u64::from_le_bytes(le_u64(&frame[start + 9..start + 17]));
        let data_len = usize::try_from(data_len).map_err(|_| ProtocolError::MessageTooLarge {
            size: usize::MAX,
            max: MAX_MESSAGE_SIZE,
        })?;
        read_more(reader, frame, data_len).await?;
        outstanding = (outstanding - 1).checked_add(remaining).ok_or_else(|| {
            ProtocolError::Malformed("nested payload count overflows".into())
        })?;
    }
    Ok(())
}

/// Grow `frame` by exactly `len` bytes from `reader`, enforcing the size cap.
async fn read_more<R>(reader: &mut R, frame: &mut Vec<u8>, len: usize) -> ProtocolResult<()>
where
    R: AsyncRead + Unpin,
{
    let start = frame.len();
    let end = start
        .checked_add(len)
        .filter(|end| *end <= MAX_MESSAGE_SIZE)
        .ok_or(ProtocolError::MessageTooLarge {
            size: start.saturating_add(len),
            max: MAX_MESSAGE_SIZE,
        })?;
    frame.resize(end, 0);
    reader.read_exact(&mut frame[start..]).await?;
    Ok(())
}

fn le_u64(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}
