//! Wire codec
//!
//! Byte-exact framing of messages. A frame is an 8-byte header (object id,
//! then opcode in the low half and total size in the high half of the second
//! word, both little-endian) followed by 4-byte aligned arguments. File
//! descriptors never enter the byte stream; they travel in a parallel queue
//! consumed in argument order.

pub mod argument;
pub mod codec;
pub mod fixed;

pub use argument::*;
pub use codec::*;
pub use fixed::Fixed;

use thiserror::Error;

/// Size of the message header
pub const HEADER_SIZE: usize = 8;

/// Largest frame the 16-bit size field can describe, rounded down to alignment
pub const MAX_MESSAGE_SIZE: usize = 0xfffc;

/// Descriptors attached to one `sendmsg` call
pub const MAX_FDS_OUT: usize = 28;

/// A frame that does not match its signature
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("{0} unconsumed bytes after the last argument")]
    TrailingBytes(usize),
    #[error("invalid message size {0}")]
    InvalidSize(usize),
    #[error("declared length {declared} exceeds the {remaining} remaining bytes")]
    LengthOverrun { declared: usize, remaining: usize },
    #[error("string is not nul-terminated")]
    StringNotTerminated,
    #[error("string contains an interior nul byte")]
    InteriorNul,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("null value for non-nullable argument '{0}'")]
    NullNotAllowed(&'static str),
    #[error("message needs {expected} file descriptors, only {available} received")]
    MissingFds { expected: usize, available: usize },
    #[error("message of {0} bytes exceeds the maximum frame size")]
    MessageTooLarge(usize),
    #[error("argument {index} does not match the signature (expected {expected})")]
    SignatureMismatch { index: usize, expected: &'static str },
    #[error("message has {actual} arguments, signature has {expected}")]
    ArgumentCount { expected: usize, actual: usize },
}

/// An enum argument value, which may be unknown to this side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WEnum<T> {
    Value(T),
    Unknown(u32),
}

impl<T: TryFrom<u32>> From<u32> for WEnum<T> {
    fn from(value: u32) -> Self {
        match T::try_from(value) {
            Ok(known) => WEnum::Value(known),
            Err(_) => WEnum::Unknown(value),
        }
    }
}

impl<T> WEnum<T> {
    /// The known value, or the raw one
    pub fn into_result(self) -> Result<T, u32> {
        match self {
            WEnum::Value(value) => Ok(value),
            WEnum::Unknown(raw) => Err(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Mode {
        On,
    }

    impl TryFrom<u32> for Mode {
        type Error = ();
        fn try_from(value: u32) -> Result<Self, ()> {
            match value {
                1 => Ok(Mode::On),
                _ => Err(()),
            }
        }
    }

    #[test]
    fn test_wenum() {
        assert_eq!(WEnum::<Mode>::from(1), WEnum::Value(Mode::On));
        assert_eq!(WEnum::<Mode>::from(7), WEnum::Unknown(7));
        assert_eq!(WEnum::<Mode>::from(7).into_result(), Err(7));
    }
}
