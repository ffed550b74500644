use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use eau2_types::{Column, ElementType, Key, Table};

use crate::error::{ProtocolError, ProtocolResult};

/// Payload header: `type:u8 | remaining:u64 | data_len:u64`.
pub const PAYLOAD_HEADER_SIZE: usize = 17;

/// Type tag carried in the first byte of every payload header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    U64 = 6,
    I64 = 7,
    Bool = 8,
    Float = 9,
    Double = 10,
    String = 11,
    Column = 12,
    Key = 13,
    Table = 14,
}

impl PayloadType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::U8,
            1 => Self::I8,
            2 => Self::U16,
            3 => Self::I16,
            4 => Self::U32,
            5 => Self::I32,
            6 => Self::U64,
            7 => Self::I64,
            8 => Self::Bool,
            9 => Self::Float,
            10 => Self::Double,
            11 => Self::String,
            12 => Self::Column,
            13 => Self::Key,
            14 => Self::Table,
            _ => return None,
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// The column element type this tag stands for, if it is one.
    pub fn element_type(self) -> Option<ElementType> {
        Some(match self {
            Self::U8 => ElementType::U8,
            Self::I8 => ElementType::I8,
            Self::U16 => ElementType::U16,
            Self::I16 => ElementType::I16,
            Self::U32 => ElementType::U32,
            Self::I32 => ElementType::I32,
            Self::U64 => ElementType::U64,
            Self::I64 => ElementType::I64,
            Self::Bool => ElementType::Bool,
            Self::Float => ElementType::Float,
            Self::Double => ElementType::Double,
            Self::String => ElementType::String,
            Self::Column | Self::Key | Self::Table => return None,
        })
    }
}

impl From<ElementType> for PayloadType {
    fn from(ty: ElementType) -> Self {
        match ty {
            ElementType::U8 => Self::U8,
            ElementType::I8 => Self::I8,
            ElementType::U16 => Self::U16,
            ElementType::I16 => Self::I16,
            ElementType::U32 => Self::U32,
            ElementType::I32 => Self::I32,
            ElementType::U64 => Self::U64,
            ElementType::I64 => Self::I64,
            ElementType::Bool => Self::Bool,
            ElementType::Float => Self::Float,
            ElementType::Double => Self::Double,
            ElementType::String => Self::String,
        }
    }
}

/// Decoded payload header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadHeader {
    pub ty: PayloadType,
    /// Number of nested payloads that follow and belong to this one.
    pub remaining: u64,
    pub data_len: u64,
}

impl PayloadHeader {
    pub fn new(ty: PayloadType, remaining: u64, data_len: u64) -> Self {
        Self {
            ty,
            remaining,
            data_len,
        }
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.ty.as_byte());
        buf.put_u64_le(self.remaining);
        buf.put_u64_le(self.data_len);
    }

    pub fn read(buf: &mut &[u8]) -> ProtocolResult<Self> {
        ensure_remaining(buf, PAYLOAD_HEADER_SIZE)?;
        let tag = buf.get_u8();
        let ty = PayloadType::from_byte(tag).ok_or(ProtocolError::InvalidPayloadType(tag))?;
        let remaining = buf.get_u64_le();
        let data_len = buf.get_u64_le();
        Ok(Self::new(ty, remaining, data_len))
    }
}

/// One self-describing value on the wire.
///
/// Scalars, strings and keys are a single payload. A column is a payload
/// with one nested element payload; a table is a payload with one nested
/// column payload per column.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Key(Key),
    Column(Column),
    Table(Arc<Table>),
}

impl Payload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            Self::U8(_) => PayloadType::U8,
            Self::I8(_) => PayloadType::I8,
            Self::U16(_) => PayloadType::U16,
            Self::I16(_) => PayloadType::I16,
            Self::U32(_) => PayloadType::U32,
            Self::I32(_) => PayloadType::I32,
            Self::U64(_) => PayloadType::U64,
            Self::I64(_) => PayloadType::I64,
            Self::Bool(_) => PayloadType::Bool,
            Self::Float(_) => PayloadType::Float,
            Self::Double(_) => PayloadType::Double,
            Self::String(_) => PayloadType::String,
            Self::Key(_) => PayloadType::Key,
            Self::Column(_) => PayloadType::Column,
            Self::Table(_) => PayloadType::Table,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Self::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Arc<Table>> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn into_table(self) -> Option<Arc<Table>> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Append the encoded payload (and any nested payloads) to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> ProtocolResult<()> {
        match self {
            Self::U8(v) => {
                PayloadHeader::new(PayloadType::U8, 0, 1).write(buf);
                buf.put_u8(*v);
            }
            Self::I8(v) => {
                PayloadHeader::new(PayloadType::I8, 0, 1).write(buf);
                buf.put_i8(*v);
            }
            Self::U16(v) => {
                PayloadHeader::new(PayloadType::U16, 0, 2).write(buf);
                buf.put_u16_le(*v);
            }
            Self::I16(v) => {
                PayloadHeader::new(PayloadType::I16, 0, 2).write(buf);
                buf.put_i16_le(*v);
            }
            Self::U32(v) => {
                PayloadHeader::new(PayloadType::U32, 0, 4).write(buf);
                buf.put_u32_le(*v);
            }
            Self::I32(v) => {
                PayloadHeader::new(PayloadType::I32, 0, 4).write(buf);
                buf.put_i32_le(*v);
            }
            Self::U64(v) => {
                PayloadHeader::new(PayloadType::U64, 0, 8).write(buf);
                buf.put_u64_le(*v);
            }
            Self::I64(v) => {
                PayloadHeader::new(PayloadType::I64, 0, 8).write(buf);
                buf.put_i64_le(*v);
            }
            Self::Bool(v) => {
                PayloadHeader::new(PayloadType::Bool, 0, 1).write(buf);
                buf.put_u8(u8::from(*v));
            }
            Self::Float(v) => {
                PayloadHeader::new(PayloadType::Float, 0, 4).write(buf);
                buf.put_f32_le(*v);
            }
            Self::Double(v) => {
                PayloadHeader::new(PayloadType::Double, 0, 8).write(buf);
                buf.put_f64_le(*v);
            }
            Self::String(s) => {
                check_no_nul(s)?;
                PayloadHeader::new(PayloadType::String, 0, s.len() as u64 + 1).write(buf);
                put_c_str(buf, s);
            }
            Self::Key(key) => {
                check_no_nul(key.name())?;
                let len = 8 + key.name().len() as u64 + 1;
                PayloadHeader::new(PayloadType::Key, 0, len).write(buf);
                buf.put_u64_le(key.home());
                put_c_str(buf, key.name());
            }
            Self::Column(column) => encode_column(column, buf)?,
            Self::Table(table) => {
                PayloadHeader::new(PayloadType::Table, table.ncols() as u64, 0).write(buf);
                for column in table.columns() {
                    encode_column(column, buf)?;
                }
            }
        }
        Ok(())
    }

    /// Decode one payload (with everything nested under it) from the front
    /// of `buf`, advancing it past the consumed bytes.
    pub fn decode(buf: &mut &[u8]) -> ProtocolResult<Self> {
        let header = PayloadHeader::read(buf)?;
        match header.ty {
            PayloadType::Column => decode_column(header, buf).map(Self::Column),
            PayloadType::Table => {
                take(buf, header.data_len)?;
                let mut columns = Vec::new();
                for _ in 0..header.remaining {
                    let nested = PayloadHeader::read(buf)?;
                    if nested.ty != PayloadType::Column {
                        return Err(ProtocolError::UnexpectedPayload {
                            expected: "column",
                            actual: nested.ty,
                        });
                    }
                    columns.push(decode_column(nested, buf)?);
                }
                Ok(Self::Table(Arc::new(Table::new(columns))))
            }
            _ => {
                if header.remaining != 0 {
                    return Err(ProtocolError::Malformed(format!(
                        "{:?} payload declares {} nested payloads",
                        header.ty, header.remaining
                    )));
                }
                let data = take(buf, header.data_len)?;
                decode_leaf(header.ty, data)
            }
        }
    }
}

impl From<Key> for Payload {
    fn from(key: Key) -> Self {
        Self::Key(key)
    }
}

impl From<Arc<Table>> for Payload {
    fn from(table: Arc<Table>) -> Self {
        Self::Table(table)
    }
}

impl From<Column> for Payload {
    fn from(column: Column) -> Self {
        Self::Column(column)
    }
}

fn encode_column(column: &Column, buf: &mut BytesMut) -> ProtocolResult<()> {
    PayloadHeader::new(PayloadType::Column, 1, 0).write(buf);

    let mut data = BytesMut::new();
    match column {
        Column::U8(v) => data.put_slice(v),
        Column::I8(v) => v.iter().for_each(|x| data.put_i8(*x)),
        Column::U16(v) => v.iter().for_each(|x| data.put_u16_le(*x)),
        Column::I16(v) => v.iter().for_each(|x| data.put_i16_le(*x)),
        Column::U32(v) => v.iter().for_each(|x| data.put_u32_le(*x)),
        Column::I32(v) => v.iter().for_each(|x| data.put_i32_le(*x)),
        Column::U64(v) => v.iter().for_each(|x| data.put_u64_le(*x)),
        Column::I64(v) => v.iter().for_each(|x| data.put_i64_le(*x)),
        Column::Bool(v) => v.iter().for_each(|x| data.put_u8(u8::from(*x))),
        Column::Float(v) => v.iter().for_each(|x| data.put_f32_le(*x)),
        Column::Double(v) => v.iter().for_each(|x| data.put_f64_le(*x)),
        Column::String(v) => {
            for s in v {
                check_no_nul(s)?;
                put_c_str(&mut data, s);
            }
        }
    }

    let ty = PayloadType::from(column.element_type());
    PayloadHeader::new(ty, 0, data.len() as u64).write(buf);
    buf.put_slice(&data);
    Ok(())
}

/// Decode the body of a column whose outer header has already been read.
fn decode_column(header: PayloadHeader, buf: &mut &[u8]) -> ProtocolResult<Column> {
    if header.remaining != 1 {
        return Err(ProtocolError::Malformed(format!(
            "column payload must carry exactly one element payload, got {}",
            header.remaining
        )));
    }
    take(buf, header.data_len)?;

    let inner = PayloadHeader::read(buf)?;
    let element = inner.ty.element_type().ok_or(ProtocolError::UnexpectedPayload {
        expected: "column elements",
        actual: inner.ty,
    })?;
    if inner.remaining != 0 {
        return Err(ProtocolError::Malformed(
            "column elements cannot carry nested payloads".into(),
        ));
    }
    let mut data = take(buf, inner.data_len)?;

    if let Some(width) = element.fixed_width() {
        if data.len() % width != 0 {
            return Err(ProtocolError::Malformed(format!(
                "{} bytes is not a whole number of {element} elements",
                data.len()
            )));
        }
    }

    let column = match element {
        ElementType::U8 => Column::U8(data.to_vec()),
        ElementType::I8 => Column::I8(drain(&mut data, |d| d.get_i8())),
        ElementType::U16 => Column::U16(drain(&mut data, |d| d.get_u16_le())),
        ElementType::I16 => Column::I16(drain(&mut data, |d| d.get_i16_le())),
        ElementType::U32 => Column::U32(drain(&mut data, |d| d.get_u32_le())),
        ElementType::I32 => Column::I32(drain(&mut data, |d| d.get_i32_le())),
        ElementType::U64 => Column::U64(drain(&mut data, |d| d.get_u64_le())),
        ElementType::I64 => Column::I64(drain(&mut data, |d| d.get_i64_le())),
        ElementType::Float => Column::Float(drain(&mut data, |d| d.get_f32_le())),
        ElementType::Double => Column::Double(drain(&mut data, |d| d.get_f64_le())),
        ElementType::Bool => Column::Bool(
            data.iter()
                .map(|b| bool_from_byte(*b))
                .collect::<ProtocolResult<_>>()?,
        ),
        ElementType::String => Column::String(split_c_strs(data)?),
    };
    Ok(column)
}

fn decode_leaf(ty: PayloadType, mut data: &[u8]) -> ProtocolResult<Payload> {
    let len = data.len();
    let expect_width = |width: usize| {
        if len == width {
            Ok(())
        } else {
            Err(ProtocolError::Malformed(format!(
                "{ty:?} payload must be {width} bytes, got {len}"
            )))
        }
    };
    let payload = match ty {
        PayloadType::U8 => {
            expect_width(1)?;
            Payload::U8(data.get_u8())
        }
        PayloadType::I8 => {
            expect_width(1)?;
            Payload::I8(data.get_i8())
        }
        PayloadType::U16 => {
            expect_width(2)?;
            Payload::U16(data.get_u16_le())
        }
        PayloadType::I16 => {
            expect_width(2)?;
            Payload::I16(data.get_i16_le())
        }
        PayloadType::U32 => {
            expect_width(4)?;
            Payload::U32(data.get_u32_le())
        }
        PayloadType::I32 => {
            expect_width(4)?;
            Payload::I32(data.get_i32_le())
        }
        PayloadType::U64 => {
            expect_width(8)?;
            Payload::U64(data.get_u64_le())
        }
        PayloadType::I64 => {
            expect_width(8)?;
            Payload::I64(data.get_i64_le())
        }
        PayloadType::Bool => {
            expect_width(1)?;
            Payload::Bool(bool_from_byte(data.get_u8())?)
        }
        PayloadType::Float => {
            expect_width(4)?;
            Payload::Float(data.get_f32_le())
        }
        PayloadType::Double => {
            expect_width(8)?;
            Payload::Double(data.get_f64_le())
        }
        PayloadType::String => Payload::String(single_c_str(data)?),
        PayloadType::Key => {
            if data.len() < 9 {
                return Err(ProtocolError::Malformed(format!(
                    "key payload of {} bytes is too short",
                    data.len()
                )));
            }
            let home = data.get_u64_le();
            Payload::Key(Key::new(single_c_str(data)?, home))
        }
        PayloadType::Column | PayloadType::Table => {
            return Err(ProtocolError::UnexpectedPayload {
                expected: "scalar",
                actual: ty,
            })
        }
    };
    Ok(payload)
}

fn drain<T>(data: &mut &[u8], mut next: impl FnMut(&mut &[u8]) -> T) -> Vec<T> {
    let mut out = Vec::new();
    while data.has_remaining() {
        out.push(next(data));
    }
    out
}

fn bool_from_byte(byte: u8) -> ProtocolResult<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ProtocolError::Malformed(format!("invalid bool byte {other}"))),
    }
}

fn check_no_nul(s: &str) -> ProtocolResult<()> {
    if s.as_bytes().contains(&0) {
        return Err(ProtocolError::InteriorNul(s.to_owned()));
    }
    Ok(())
}

fn put_c_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn utf8(bytes: &[u8]) -> ProtocolResult<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProtocolError::Malformed(format!("invalid UTF-8: {e}")))
}

/// Exactly one NUL-terminated string occupying all of `data`.
fn single_c_str(data: &[u8]) -> ProtocolResult<String> {
    match data.split_last() {
        Some((0, body)) if !body.contains(&0) => utf8(body),
        Some((0, _)) => Err(ProtocolError::Malformed(
            "string payload contains an interior NUL".into(),
        )),
        _ => Err(ProtocolError::Malformed("string is not NUL-terminated".into())),
    }
}

/// A run of NUL-terminated strings occupying all of `data`.
fn split_c_strs(data: &[u8]) -> ProtocolResult<Vec<String>> {
    match data.split_last() {
        None => Ok(Vec::new()),
        Some((0, body)) => body.split(|b| *b == 0).map(utf8).collect(),
        Some(_) => Err(ProtocolError::Malformed(
            "last string in column is not NUL-terminated".into(),
        )),
    }
}

pub(crate) fn ensure_remaining(buf: &[u8], needed: usize) -> ProtocolResult<()> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Split `len` bytes off the front of `buf`.
pub(crate) fn take<'a>(buf: &mut &'a [u8], len: u64) -> ProtocolResult<&'a [u8]> {
    let len = usize::try_from(len).map_err(|_| ProtocolError::Truncated {
        needed: usize::MAX,
        available: buf.len(),
    })?;
    ensure_remaining(buf, len)?;
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}
