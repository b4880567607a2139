//! Error types for decoding, dispatch and patching.

use core::fmt;

use crate::ugen::Rate;

/// A payload that could not be read as `{address}{types}{words}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload ended before the field at `at` was complete.
    Truncated { at: usize },
    /// A string field has no terminating NUL.
    Unterminated { at: usize },
    /// A string field is not UTF-8.
    InvalidUtf8 { at: usize },
    /// The type tag does not start with `,`.
    MissingTypeTag,
    /// A field was read as `expected` but the tag says `found`
    /// (`None` when the tag has no more entries).
    TypeMismatch { expected: char, found: Option<char> },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { at } => write!(f, "payload truncated at byte {at}"),
            Self::Unterminated { at } => write!(f, "unterminated string at byte {at}"),
            Self::InvalidUtf8 { at } => write!(f, "string at byte {at} is not UTF-8"),
            Self::MissingTypeTag => write!(f, "type tag does not start with ','"),
            Self::TypeMismatch { expected, found: Some(found) } => {
                write!(f, "expected '{expected}' argument, found '{found}'")
            }
            Self::TypeMismatch { expected, found: None } => {
                write!(f, "expected '{expected}' argument, found end of arguments")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Why the dispatch table refused a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    UnknownAddress,
    TypeMismatch { expected: &'static str },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAddress => write!(f, "no operation registered at this address"),
            Self::TypeMismatch { expected } => write!(f, "type tag does not match \"{expected}\""),
        }
    }
}

impl std::error::Error for Rejection {}

/// A patch-graph operation that named something that does not exist or
/// would break the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchError {
    NoSuchInstrument(u32),
    NoSuchUgen { instrument: u32, ugen: u16 },
    NoSuchOutput { instrument: u32, ugen: u16, block: u16 },
    NotAnInput { instrument: u32, ugen: u16 },
    /// Output indices are small non-negative integers.
    BadOutputIndex { instrument: u32, index: i32 },
    /// No signal is bound to this output of the instrument.
    UnboundOutput { instrument: u32, index: u32 },
    /// The port has no connection from the named signal.
    NotConnected { instrument: u32, input: u16 },
    WouldCycle { from: u32, to: u32 },
    TooManyUgens { instrument: u32 },
    /// Every connection reserved for the rack is in use.
    TooManyConnections,
    /// The signal of `ugen` is not at the `expected` rate.
    RateMismatch { instrument: u32, ugen: u16, expected: Rate },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchInstrument(i) => write!(f, "no instrument in slot {i}"),
            Self::NoSuchUgen { instrument, ugen } => {
                write!(f, "instrument {instrument} has no ugen {ugen}")
            }
            Self::NoSuchOutput { instrument, ugen, block } => {
                write!(f, "ugen {instrument}/{ugen} has no output block {block}")
            }
            Self::NotAnInput { instrument, ugen } => {
                write!(f, "ugen {instrument}/{ugen} is not an input port")
            }
            Self::BadOutputIndex { instrument, index } => {
                write!(f, "instrument {instrument} cannot bind output {index}")
            }
            Self::UnboundOutput { instrument, index } => {
                write!(f, "output {index} of instrument {instrument} is not bound")
            }
            Self::NotConnected { instrument, input } => {
                write!(f, "input {instrument}/{input} has no such connection")
            }
            Self::WouldCycle { from, to } => {
                write!(f, "connecting instrument {from} into {to} would close a cycle")
            }
            Self::TooManyUgens { instrument } => write!(f, "instrument {instrument} is full"),
            Self::TooManyConnections => write!(f, "no connections left"),
            Self::RateMismatch { instrument, ugen, expected } => {
                write!(f, "ugen {instrument}/{ugen} is not {expected:?} rate")
            }
        }
    }
}

impl std::error::Error for PatchError {}

/// Anything a control operation can fail with. The engine logs these and
/// drops the message; none of them stop the audio thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Decode(DecodeError),
    Rejected(Rejection),
    Patch(PatchError),
    /// The operation targets the current instrument but none is set.
    NoCurrentInstrument,
    /// Slot 0 is reserved and slots past the configured maximum do not exist.
    SlotOutOfRange(u32),
    NotATemplate(u32),
    PoolExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode failed: {e}"),
            Self::Rejected(e) => write!(f, "message rejected: {e}"),
            Self::Patch(e) => write!(f, "patch failed: {e}"),
            Self::NoCurrentInstrument => write!(f, "no instrument is current"),
            Self::SlotOutOfRange(i) => write!(f, "instrument slot {i} is out of range"),
            Self::NotATemplate(i) => write!(f, "slot {i} does not hold a template"),
            Self::PoolExhausted => write!(f, "message pool exhausted"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Rejected(e) => Some(e),
            Self::Patch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<Rejection> for Error {
    fn from(e: Rejection) -> Self {
        Self::Rejected(e)
    }
}

impl From<PatchError> for Error {
    fn from(e: PatchError) -> Self {
        Self::Patch(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
