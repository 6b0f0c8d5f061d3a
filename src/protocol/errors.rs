//! Display error codes and protocol errors reported by the peer

use super::types::*;
use std::fmt;

/// Global error codes of `wl_display.error`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidObject = 0,
    InvalidMethod = 1,
    NoMemory = 2,
    Implementation = 3,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::InvalidObject),
            1 => Some(ErrorCode::InvalidMethod),
            2 => Some(ErrorCode::NoMemory),
            3 => Some(ErrorCode::Implementation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidObject => "InvalidObject: server couldn't find object",
            ErrorCode::InvalidMethod => "InvalidMethod: unknown or malformed request",
            ErrorCode::NoMemory => "NoMemory: server is out of memory",
            ErrorCode::Implementation => "Implementation: compositor implementation error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> u32 {
        code as u32
    }
}

/// A fatal error delivered through `wl_display.error`.
///
/// `code` is interpreted by the interface of the object; the display codes
/// above only apply when the object is the display itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub object_id: ObjectId,
    pub interface: String,
    pub code: u32,
    pub message: String,
}

impl ProtocolError {
    pub fn new(
        object_id: ObjectId,
        interface: impl Into<String>,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        ProtocolError {
            object_id,
            interface: interface.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Protocol error {} on {}@{}: {}",
            self.code, self.interface, self.object_id, self.message
        )
    }
}
