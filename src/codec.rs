//! Payload layout and typed field cursor.
//!
//! ```text
//! {address}\0{pad}  ,{types}\0{pad}  {word}{word}...
//! ```
//!
//! Strings are NUL-terminated and padded with NULs to the next 4-byte
//! boundary (there is always at least one NUL). Words are big-endian and
//! follow the type tag in order:
//!
//! | tag | word |
//! |-----|------|
//! | `h` | 64-bit integer |
//! | `i` | 32-bit integer |
//! | `B` | boolean stored as a 32-bit integer |
//! | `f` | 32-bit float |
//! | `d` | 64-bit float |
//! | `s` | padded string |

use crate::error::DecodeError;

#[inline]
pub(crate) fn padded_len(n: usize) -> usize {
    (n + 4) & !3
}

/// One argument word, borrowed from or destined for a payload.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arg<'a> {
    Int64(i64),
    Int32(i32),
    Bool(bool),
    Float(f32),
    Double(f64),
    Str(&'a str),
}

impl Arg<'_> {
    pub fn tag(&self) -> u8 {
        match self {
            Arg::Int64(_) => b'h',
            Arg::Int32(_) => b'i',
            Arg::Bool(_) => b'B',
            Arg::Float(_) => b'f',
            Arg::Double(_) => b'd',
            Arg::Str(_) => b's',
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Arg::Int64(_) | Arg::Double(_) => 8,
            Arg::Int32(_) | Arg::Bool(_) | Arg::Float(_) => 4,
            Arg::Str(s) => padded_len(s.len()),
        }
    }
}

/// Bytes needed to encode `address` and `args`.
pub fn encoded_len(address: &str, args: &[Arg<'_>]) -> usize {
    padded_len(address.len())
        + padded_len(1 + args.len())
        + args.iter().map(Arg::encoded_len).sum::<usize>()
}

/// Encode into `buf`, which must be at least [`encoded_len`] bytes long.
/// Returns the number of bytes written.
pub fn encode_into(buf: &mut [u8], address: &str, args: &[Arg<'_>]) -> usize {
    let mut w = Writer { buf, pos: 0 };
    w.string(address.as_bytes());
    w.type_tag(args);
    for arg in args {
        match *arg {
            Arg::Int64(v) => w.bytes(&v.to_be_bytes()),
            Arg::Int32(v) => w.bytes(&v.to_be_bytes()),
            Arg::Bool(v) => w.bytes(&(v as i32).to_be_bytes()),
            Arg::Float(v) => w.bytes(&v.to_be_bytes()),
            Arg::Double(v) => w.bytes(&v.to_be_bytes()),
            Arg::Str(s) => w.string(s.as_bytes()),
        }
    }
    w.pos
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn bytes(&mut self, b: &[u8]) {
        self.buf[self.pos..self.pos + b.len()].copy_from_slice(b);
        self.pos += b.len();
    }

    fn pad_to(&mut self, end: usize) {
        self.buf[self.pos..end].fill(0);
        self.pos = end;
    }

    fn string(&mut self, s: &[u8]) {
        let end = self.pos + padded_len(s.len());
        self.bytes(s);
        self.pad_to(end);
    }

    fn type_tag(&mut self, args: &[Arg<'_>]) {
        let end = self.pos + padded_len(1 + args.len());
        self.bytes(b",");
        for arg in args {
            self.bytes(&[arg.tag()]);
        }
        self.pad_to(end);
    }
}

/// A payload split into address, type tag and an argument cursor.
#[derive(Clone, Debug)]
pub struct Decoded<'a> {
    pub address: &'a str,
    /// Type tag without its leading `,`.
    pub types: &'a str,
    pub args: Args<'a>,
}

/// Parse the address and type tag of a payload.
pub fn decode(payload: &[u8]) -> Result<Decoded<'_>, DecodeError> {
    let mut cursor = Cursor { bytes: payload, pos: 0 };
    let address = cursor.string()?;
    let tag = cursor.string()?;
    let types = tag.strip_prefix(',').ok_or(DecodeError::MissingTypeTag)?;
    Ok(Decoded {
        address,
        types,
        args: Args {
            cursor,
            types: types.as_bytes(),
            next: 0,
        },
    })
}

#[derive(Clone, Debug)]
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let word = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated { at: self.pos })?;
        self.pos = end;
        let mut out = [0; N];
        out.copy_from_slice(word);
        Ok(out)
    }

    fn string(&mut self) -> Result<&'a str, DecodeError> {
        let at = self.pos;
        let rest = self.bytes.get(at..).ok_or(DecodeError::Truncated { at })?;
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::Unterminated { at })?;
        let end = at + padded_len(len);
        if end > self.bytes.len() {
            return Err(DecodeError::Truncated { at });
        }
        let s = core::str::from_utf8(&rest[..len]).map_err(|_| DecodeError::InvalidUtf8 { at })?;
        self.pos = end;
        Ok(s)
    }
}

/// Reads argument words one at a time, checking each against the type tag.
#[derive(Clone, Debug)]
pub struct Args<'a> {
    cursor: Cursor<'a>,
    types: &'a [u8],
    next: usize,
}

impl<'a> Args<'a> {
    fn expect(&mut self, tag: u8) -> Result<(), DecodeError> {
        match self.types.get(self.next) {
            Some(&t) if t == tag => {
                self.next += 1;
                Ok(())
            }
            found => Err(DecodeError::TypeMismatch {
                expected: tag as char,
                found: found.map(|&t| t as char),
            }),
        }
    }

    pub fn int64(&mut self) -> Result<i64, DecodeError> {
        self.expect(b'h')?;
        Ok(i64::from_be_bytes(self.cursor.take()?))
    }

    pub fn int32(&mut self) -> Result<i32, DecodeError> {
        self.expect(b'i')?;
        Ok(i32::from_be_bytes(self.cursor.take()?))
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        self.expect(b'B')?;
        Ok(i32::from_be_bytes(self.cursor.take()?) != 0)
    }

    pub fn float(&mut self) -> Result<f32, DecodeError> {
        self.expect(b'f')?;
        Ok(f32::from_be_bytes(self.cursor.take()?))
    }

    pub fn double(&mut self) -> Result<f64, DecodeError> {
        self.expect(b'd')?;
        Ok(f64::from_be_bytes(self.cursor.take()?))
    }

    pub fn string(&mut self) -> Result<&'a str, DecodeError> {
        self.expect(b's')?;
        self.cursor.string()
    }

    /// Number of arguments not yet read.
    pub fn remaining(&self) -> usize {
        self.types.len() - self.next
    }
}

impl<'a> Iterator for Args<'a> {
    type Item = Result<Arg<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = *self.types.get(self.next)?;
        Some(match tag {
            b'h' => self.int64().map(Arg::Int64),
            b'i' => self.int32().map(Arg::Int32),
            b'B' => self.bool().map(Arg::Bool),
            b'f' => self.float().map(Arg::Float),
            b'd' => self.double().map(Arg::Double),
            b's' => self.string().map(Arg::Str),
            other => {
                // unknown tags cannot be skipped; stop here
                self.next = self.types.len();
                Err(DecodeError::TypeMismatch {
                    expected: '?',
                    found: Some(other as char),
                })
            }
        })
    }
}
