//! Runtime error type

use crate::protocol::{ObjectId, ProtocolError};
use crate::wire::WireError;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the connection engine and the generated glue
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Malformed(#[from] WireError),

    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("object {id} is a {actual}, expected {expected}")]
    WrongInterface {
        id: ObjectId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("invalid opcode {opcode} for interface {interface}")]
    InvalidOpcode { interface: &'static str, opcode: u16 },

    #[error("{interface}.{message} needs version {since}, object {id} has version {version}")]
    VersionMismatch {
        interface: &'static str,
        message: &'static str,
        since: u32,
        version: u32,
        id: ObjectId,
    },

    #[error("arguments do not match {interface} opcode {opcode}")]
    BadMessage { interface: &'static str, opcode: u16 },

    #[error("object id already in use")]
    IdCollision,

    #[error("object id outside the expected range")]
    InvalidId,

    #[error("no object ids left")]
    IdSpaceExhausted,

    #[error("invalid version {version} for interface {interface}")]
    InvalidVersion { interface: &'static str, version: u32 },

    #[error("no global advertises {0}")]
    MissingGlobal(&'static str),

    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    #[error("peer closed the connection")]
    Disconnected,

    #[error("connection is closed")]
    Closed,

    #[error("{0}")]
    Protocol(ProtocolError),

    #[error("handler failed: {0}")]
    Handler(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl Error {
    /// Whether this error, raised while dispatching, ends the connection.
    ///
    /// Id bookkeeping errors and closed-connection errors are reported to
    /// the caller that triggered them without tearing anything down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::IdCollision
                | Error::InvalidId
                | Error::IdSpaceExhausted
                | Error::Closed
                | Error::InvalidVersion { .. }
                | Error::MissingGlobal(_)
        )
    }

    /// The wl_display error code a server reports for this error
    pub fn error_code(&self) -> crate::protocol::ErrorCode {
        use crate::protocol::ErrorCode;
        match self {
            Error::UnknownObject(_) | Error::WrongInterface { .. } => ErrorCode::InvalidObject,
            Error::InvalidOpcode { .. } | Error::VersionMismatch { .. } | Error::BadMessage { .. } => {
                ErrorCode::InvalidMethod
            }
            Error::Malformed(_) => ErrorCode::InvalidMethod,
            _ => ErrorCode::Implementation,
        }
    }
}
