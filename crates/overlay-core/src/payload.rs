//! Payload codec: schema-driven binary encoding of typed field lists.
//!
//! A payload type declares an ordered list of [`FieldCode`]s. Encoding walks
//! that list next to the payload's values; decoding walks it over a byte
//! buffer and reports exactly how many bytes it consumed, so several payloads
//! can be read back to back from one message.
//!
//! All integers are big-endian. There is no padding and no per-field tag:
//! the schema alone determines the layout.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use thiserror::Error;

// ── Field codes ──────────────────────────────────────────────────────────────

/// One primitive in a payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCode {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// u16 length, then that many bytes.
    VarLenH,
    /// u32 length, then that many bytes.
    VarLenI,
    /// Exactly `n` raw bytes. Keys, digests, addresses.
    Raw(usize),
}

impl FieldCode {
    /// Encoded width for fixed-size codes. `None` for length-prefixed codes.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldCode::U8 | FieldCode::I8 => Some(1),
            FieldCode::U16 | FieldCode::I16 => Some(2),
            FieldCode::U32 | FieldCode::I32 => Some(4),
            FieldCode::U64 | FieldCode::I64 => Some(8),
            FieldCode::Raw(n) => Some(n),
            FieldCode::VarLenH | FieldCode::VarLenI => None,
        }
    }
}

/// A decoded (or to-be-encoded) primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    /// Carried by `VarLenH`, `VarLenI` and `Raw(n)`.
    Bytes(Vec<u8>),
}

// ── Payload trait ────────────────────────────────────────────────────────────

/// A typed record with a fixed binary layout.
///
/// `from_values(to_values(p))` must reproduce `p`.
pub trait Payload: Sized {
    /// The ordered field codes describing this payload on the wire.
    const FORMAT: &'static [FieldCode];

    fn to_values(&self) -> Vec<Value>;

    fn from_values(values: Vec<Value>) -> Result<Self, FormatError>;

    /// Encode this payload onto the end of `out`.
    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        encode(Self::FORMAT, &self.to_values(), out)
    }

    /// Decode one payload from the front of `buf`. Returns the payload and
    /// the unconsumed remainder.
    fn decode_from(buf: &[u8]) -> Result<(Self, &[u8]), FormatError> {
        let (values, used) = decode(Self::FORMAT, buf)?;
        Ok((Self::from_values(values)?, &buf[used..]))
    }
}

// ── Encode / decode ──────────────────────────────────────────────────────────

/// Reject formats the codec cannot represent. Run once when a community is
/// built, so malformed formats surface as configuration errors.
pub fn validate_schema(schema: &[FieldCode]) -> Result<(), FormatError> {
    if schema.is_empty() {
        return Err(FormatError::EmptySchema);
    }
    if let Some(index) = schema.iter().position(|code| *code == FieldCode::Raw(0)) {
        return Err(FormatError::ZeroWidth { index });
    }
    Ok(())
}

/// Encode `values` according to `schema`, appending to `out`.
///
/// On error `out` may hold a partial encoding; callers discard it.
pub fn encode(
    schema: &[FieldCode],
    values: &[Value],
    out: &mut Vec<u8>,
) -> Result<(), FormatError> {
    if schema.len() != values.len() {
        return Err(FormatError::Arity {
            expected: schema.len(),
            got: values.len(),
        });
    }

    for (index, (code, value)) in schema.iter().zip(values).enumerate() {
        match (code, value) {
            (FieldCode::U8, Value::U8(v)) => out.push(*v),
            (FieldCode::U16, Value::U16(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::U32, Value::U32(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::U64, Value::U64(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::I8, Value::I8(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::I16, Value::I16(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::I32, Value::I32(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::I64, Value::I64(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (FieldCode::VarLenH, Value::Bytes(b)) => {
                let len = u16::try_from(b.len()).map_err(|_| FormatError::TooLong {
                    index,
                    len: b.len(),
                    max: u16::MAX as usize,
                })?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(b);
            }
            (FieldCode::VarLenI, Value::Bytes(b)) => {
                let len = u32::try_from(b.len()).map_err(|_| FormatError::TooLong {
                    index,
                    len: b.len(),
                    max: u32::MAX as usize,
                })?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(b);
            }
            (FieldCode::Raw(n), Value::Bytes(b)) => {
                if b.len() != *n {
                    return Err(FormatError::RawLength {
                        index,
                        expected: *n,
                        got: b.len(),
                    });
                }
                out.extend_from_slice(b);
            }
            (code, _) => return Err(FormatError::TypeMismatch { index, code: *code }),
        }
    }
    Ok(())
}

/// Decode one payload's worth of values from the front of `buf`.
///
/// Returns the values and the number of bytes consumed. Bytes after that are
/// left for the next payload.
pub fn decode(schema: &[FieldCode], buf: &[u8]) -> Result<(Vec<Value>, usize), FormatError> {
    let mut cursor = Cursor { buf, pos: 0 };
    let mut values = Vec::with_capacity(schema.len());

    for code in schema {
        let value = match code {
            FieldCode::U8 => Value::U8(cursor.take::<1>()?[0]),
            FieldCode::U16 => Value::U16(u16::from_be_bytes(cursor.take()?)),
            FieldCode::U32 => Value::U32(u32::from_be_bytes(cursor.take()?)),
            FieldCode::U64 => Value::U64(u64::from_be_bytes(cursor.take()?)),
            FieldCode::I8 => Value::I8(i8::from_be_bytes(cursor.take()?)),
            FieldCode::I16 => Value::I16(i16::from_be_bytes(cursor.take()?)),
            FieldCode::I32 => Value::I32(i32::from_be_bytes(cursor.take()?)),
            FieldCode::I64 => Value::I64(i64::from_be_bytes(cursor.take()?)),
            FieldCode::VarLenH => {
                let len = u16::from_be_bytes(cursor.take()?) as usize;
                Value::Bytes(cursor.slice(len)?.to_vec())
            }
            FieldCode::VarLenI => {
                let len = u32::from_be_bytes(cursor.take()?) as usize;
                Value::Bytes(cursor.slice(len)?.to_vec())
            }
            FieldCode::Raw(n) => Value::Bytes(cursor.slice(*n)?.to_vec()),
        };
        values.push(value);
    }

    Ok((values, cursor.pos))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn slice(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(FormatError::Truncated {
                need: len,
                available: self.buf.len() - self.pos,
            });
        };
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(N)?);
        Ok(out)
    }
}

// ── Value reader ─────────────────────────────────────────────────────────────

/// Pops decoded values in schema order with the expected type.
///
/// ```
/// use overlay_core::payload::{Value, ValueReader};
/// let mut r = ValueReader::new(vec![Value::U32(7), Value::Bytes(vec![1, 2])]);
/// assert_eq!(r.u32().unwrap(), 7);
/// assert_eq!(r.bytes().unwrap(), vec![1, 2]);
/// r.finish().unwrap();
/// ```
pub struct ValueReader {
    values: std::vec::IntoIter<Value>,
    index: usize,
}

macro_rules! reader_fn {
    ($name:ident, $variant:ident, $ty:ty, $code:ident) => {
        pub fn $name(&mut self) -> Result<$ty, FormatError> {
            match self.next()? {
                Value::$variant(v) => Ok(v),
                _ => Err(self.mismatch(FieldCode::$code)),
            }
        }
    };
}

impl ValueReader {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter(),
            index: 0,
        }
    }

    fn next(&mut self) -> Result<Value, FormatError> {
        let value = self.values.next().ok_or(FormatError::MissingValue { index: self.index })?;
        self.index += 1;
        Ok(value)
    }

    fn mismatch(&self, code: FieldCode) -> FormatError {
        FormatError::TypeMismatch {
            index: self.index - 1,
            code,
        }
    }

    reader_fn!(u8, U8, u8, U8);
    reader_fn!(u16, U16, u16, U16);
    reader_fn!(u32, U32, u32, U32);
    reader_fn!(u64, U64, u64, U64);
    reader_fn!(i8, I8, i8, I8);
    reader_fn!(i16, I16, i16, I16);
    reader_fn!(i32, I32, i32, I32);
    reader_fn!(i64, I64, i64, I64);

    /// A length-prefixed byte string.
    pub fn bytes(&mut self) -> Result<Vec<u8>, FormatError> {
        self.bytes_for(FieldCode::VarLenH)
    }

    fn bytes_for(&mut self, code: FieldCode) -> Result<Vec<u8>, FormatError> {
        match self.next()? {
            Value::Bytes(b) => Ok(b),
            _ => Err(self.mismatch(code)),
        }
    }

    /// A fixed-size block, e.g. a key or digest.
    pub fn raw<const N: usize>(&mut self) -> Result<[u8; N], FormatError> {
        let bytes = self.bytes_for(FieldCode::Raw(N))?;
        <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| FormatError::RawLength {
            index: self.index - 1,
            expected: N,
            got: bytes.len(),
        })
    }

    /// An IPv4 socket address written with [`push_address`].
    pub fn socket_addr(&mut self) -> Result<SocketAddr, FormatError> {
        let ip: [u8; 4] = self.raw()?;
        let port = self.u16()?;
        Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), port)))
    }

    /// Fails if values remain. Call at the end of `from_values`.
    pub fn finish(mut self) -> Result<(), FormatError> {
        match self.values.next() {
            None => Ok(()),
            Some(_) => Err(FormatError::Arity {
                expected: self.index,
                got: self.index + 1 + self.values.len(),
            }),
        }
    }
}

// ── Addresses ────────────────────────────────────────────────────────────────

/// Field codes of one IPv4 socket address: 4 raw address bytes + u16 port.
pub const ADDRESS_FORMAT: [FieldCode; 2] = [FieldCode::Raw(4), FieldCode::U16];

/// Append the values for `addr` in [`ADDRESS_FORMAT`].
///
/// Only IPv4 travels on the wire; an IPv6 address is written as the unknown
/// address `0.0.0.0:0`.
pub fn push_address(values: &mut Vec<Value>, addr: SocketAddr) {
    let (ip, port) = match addr {
        SocketAddr::V4(v4) => (v4.ip().octets(), v4.port()),
        SocketAddr::V6(_) => ([0u8; 4], 0),
    };
    values.push(Value::Bytes(ip.to_vec()));
    values.push(Value::U16(port));
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("buffer truncated: need {need} bytes, {available} available")]
    Truncated { need: usize, available: usize },

    #[error("field {index}: value does not match field code {code:?}")]
    TypeMismatch { index: usize, code: FieldCode },

    #[error("expected {expected} values, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("missing value for field {index}")]
    MissingValue { index: usize },

    #[error("field {index}: raw block must be {expected} bytes, got {got}")]
    RawLength {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("field {index}: {len} bytes exceeds length prefix maximum {max}")]
    TooLong { index: usize, len: usize, max: usize },

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("format declares no fields")]
    EmptySchema,

    #[error("field {index}: raw block of width zero")]
    ZeroWidth { index: usize },

    #[error("packed message is {len} bytes, datagram maximum is {max}")]
    Oversize { len: usize, max: usize },
}

// ── Tests ────────────────────────────────────────────────────────────────────
