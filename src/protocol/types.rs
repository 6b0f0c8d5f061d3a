//! Core wire protocol types
//!
//! Object ids are plain 32-bit handles. The id space is split in two halves
//! so both peers can create objects without coordinating.

use std::fmt;

/// First id of the server-allocated range
pub const SERVER_ID_BASE: u32 = 0xff00_0000;

/// The display object, present on every connection
pub const DISPLAY_ID: ObjectId = ObjectId(1);

/// Protocol object id. Zero is the null object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub const NONE: ObjectId = ObjectId(0);

    pub fn new(id: u32) -> Self {
        ObjectId(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Which peer allocates this id
    pub fn allocator(&self) -> Side {
        if self.0 >= SERVER_ID_BASE {
            Side::Server
        } else {
            Side::Client
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(id: u32) -> Self {
        ObjectId(id)
    }
}

/// The end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn peer(&self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
