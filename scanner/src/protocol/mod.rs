//! Protocol description model
//!
//! In-memory representation of a protocol XML document. Declaration order is
//! preserved everywhere: the index of a request or event inside its interface
//! is its wire opcode.

pub mod errors;
pub mod parser;
pub mod validate;

pub use errors::*;
pub use parser::*;
pub use validate::*;

/// One protocol document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protocol {
    pub name: String,
    pub copyright: Option<String>,
    pub description: Option<Description>,
    pub interfaces: Vec<Interface>,
}

/// `<description summary="...">body</description>`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Description {
    pub summary: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub version: u32,
    pub description: Option<Description>,
    pub requests: Vec<Message>,
    pub events: Vec<Message>,
    pub enums: Vec<Enum>,
}

impl Interface {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Interface {
            name: name.into(),
            version,
            description: None,
            requests: Vec::new(),
            events: Vec::new(),
            enums: Vec::new(),
        }
    }

    pub fn find_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.iter().find(|e| e.name == name)
    }

    /// Requests then events, each tagged with its kind
    pub fn messages(&self) -> impl Iterator<Item = (MessageKind, &Message)> {
        self.requests
            .iter()
            .map(|m| (MessageKind::Request, m))
            .chain(self.events.iter().map(|m| (MessageKind::Event, m)))
    }
}

/// Which list of an interface a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Event,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Event => "event",
        }
    }
}

/// A request or an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub name: String,
    pub since: u32,
    pub deprecated_since: Option<u32>,
    pub is_destructor: bool,
    pub description: Option<Description>,
    pub args: Vec<Arg>,
}

impl Message {
    pub fn new(name: impl Into<String>) -> Self {
        Message {
            name: name.into(),
            since: 1,
            deprecated_since: None,
            is_destructor: false,
            description: None,
            args: Vec::new(),
        }
    }

    /// The new_id argument of this message, if any
    pub fn new_id_arg(&self) -> Option<&Arg> {
        self.args.iter().find(|arg| arg.kind == ArgType::NewId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub name: String,
    pub kind: ArgType,
    pub summary: Option<String>,
    pub interface: Option<String>,
    pub allow_null: bool,
    pub enum_: Option<String>,
}

impl Arg {
    pub fn new(name: impl Into<String>, kind: ArgType) -> Self {
        Arg {
            name: name.into(),
            kind,
            summary: None,
            interface: None,
            allow_null: false,
            enum_: None,
        }
    }
}

/// Wire type of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    Int,
    Uint,
    Fixed,
    String,
    Object,
    NewId,
    Array,
    Fd,
}

impl ArgType {
    pub fn from_xml(value: &str) -> Option<Self> {
        match value {
            "int" => Some(ArgType::Int),
            "uint" => Some(ArgType::Uint),
            "fixed" => Some(ArgType::Fixed),
            "string" => Some(ArgType::String),
            "object" => Some(ArgType::Object),
            "new_id" => Some(ArgType::NewId),
            "array" => Some(ArgType::Array),
            "fd" => Some(ArgType::Fd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::Int => "int",
            ArgType::Uint => "uint",
            ArgType::Fixed => "fixed",
            ArgType::String => "string",
            ArgType::Object => "object",
            ArgType::NewId => "new_id",
            ArgType::Array => "array",
            ArgType::Fd => "fd",
        }
    }

    /// Whether `allow-null` is meaningful for this type
    pub fn nullable(&self) -> bool {
        matches!(self, ArgType::String | ArgType::Object | ArgType::NewId)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enum {
    pub name: String,
    pub since: u32,
    pub bitfield: bool,
    pub description: Option<Description>,
    pub entries: Vec<Entry>,
}

impl Enum {
    pub fn new(name: impl Into<String>) -> Self {
        Enum {
            name: name.into(),
            since: 1,
            bitfield: false,
            description: None,
            entries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub value: u32,
    pub since: u32,
    pub summary: Option<String>,
}

/// Splits an `enum="..."` reference into (interface, enum).
///
/// A bare name refers to an enum of `current`.
pub fn split_enum_ref<'a>(reference: &'a str, current: &'a str) -> (&'a str, &'a str) {
    match reference.split_once('.') {
        Some((interface, name)) => (interface, name),
        None => (current, reference),
    }
}
