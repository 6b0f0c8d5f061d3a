//! Message and argument values

use super::fixed::Fixed;
use super::{WireError, HEADER_SIZE};
use crate::protocol::{ArgumentType, ObjectId};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd};

/// A new_id whose interface is chosen at runtime, as in `wl_registry.bind`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntypedNewId {
    pub interface: String,
    pub version: u32,
    pub id: ObjectId,
}

/// One decoded argument
#[derive(Debug)]
pub enum Argument {
    Int(i32),
    Uint(u32),
    Fixed(Fixed),
    /// `None` is the null string
    Str(Option<String>),
    /// `ObjectId::NONE` is the null object
    Object(ObjectId),
    NewId(ObjectId),
    UntypedNewId(UntypedNewId),
    Array(Vec<u8>),
    Fd(OwnedFd),
}

impl Argument {
    pub fn kind(&self) -> ArgumentType {
        match self {
            Argument::Int(_) => ArgumentType::Int,
            Argument::Uint(_) => ArgumentType::Uint,
            Argument::Fixed(_) => ArgumentType::Fixed,
            Argument::Str(_) => ArgumentType::Str,
            Argument::Object(_) => ArgumentType::Object,
            Argument::NewId(_) | Argument::UntypedNewId(_) => ArgumentType::NewId,
            Argument::Array(_) => ArgumentType::Array,
            Argument::Fd(_) => ArgumentType::Fd,
        }
    }
}

// Descriptors compare by number: two arguments are equal if they carry the
// same open file.
impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Argument::Int(a), Argument::Int(b)) => a == b,
            (Argument::Uint(a), Argument::Uint(b)) => a == b,
            (Argument::Fixed(a), Argument::Fixed(b)) => a == b,
            (Argument::Str(a), Argument::Str(b)) => a == b,
            (Argument::Object(a), Argument::Object(b)) => a == b,
            (Argument::NewId(a), Argument::NewId(b)) => a == b,
            (Argument::UntypedNewId(a), Argument::UntypedNewId(b)) => a == b,
            (Argument::Array(a), Argument::Array(b)) => a == b,
            (Argument::Fd(a), Argument::Fd(b)) => a.as_raw_fd() == b.as_raw_fd(),
            _ => false,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int(v) => write!(f, "{}", v),
            Argument::Uint(v) => write!(f, "{}", v),
            Argument::Fixed(v) => write!(f, "{}", v),
            Argument::Str(Some(s)) => write!(f, "{:?}", s),
            Argument::Str(None) => write!(f, "nil"),
            Argument::Object(id) if id.is_null() => write!(f, "nil"),
            Argument::Object(id) => write!(f, "@{}", id),
            Argument::NewId(id) => write!(f, "new id @{}", id),
            Argument::UntypedNewId(n) => {
                write!(f, "new id {}#{} @{}", n.interface, n.version, n.id)
            }
            Argument::Array(bytes) => write!(f, "array[{}]", bytes.len()),
            Argument::Fd(fd) => write!(f, "fd {}", fd.as_raw_fd()),
        }
    }
}

/// A message addressed to `object`
#[derive(Debug, PartialEq)]
pub struct Message {
    pub object: ObjectId,
    pub opcode: u16,
    pub args: Vec<Argument>,
}

impl Message {
    pub fn new(object: ObjectId, opcode: u16, args: Vec<Argument>) -> Self {
        Message {
            object,
            opcode,
            args,
        }
    }
}

/// The two header words of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub object: ObjectId,
    pub opcode: u16,
    /// Total frame size in bytes, header included
    pub size: u16,
}

impl MessageHeader {
    /// Read a header from the start of `buf`; `None` if fewer than 8 bytes
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let object = LittleEndian::read_u32(&buf[0..4]);
        let word = LittleEndian::read_u32(&buf[4..8]);
        Some(MessageHeader {
            object: ObjectId(object),
            opcode: (word & 0xffff) as u16,
            size: (word >> 16) as u16,
        })
    }

    /// Size checks that do not depend on the signature
    pub fn check_size(&self) -> Result<usize, WireError> {
        let size = self.size as usize;
        if size < HEADER_SIZE || size % 4 != 0 {
            return Err(WireError::InvalidSize(size));
        }
        Ok(size)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.object.0);
        LittleEndian::write_u32(
            &mut buf[4..8],
            ((self.size as u32) << 16) | self.opcode as u32,
        );
    }
}
