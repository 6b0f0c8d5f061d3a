//! Parse and validation errors

use std::fmt;
use thiserror::Error;

/// A protocol document could not be loaded.
///
/// `context` names the offending element, e.g.
/// `interface 'wl_display' request 'sync' arg 'callback'`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context}: {kind}")]
pub struct ParseError {
    pub context: String,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(context: impl Into<String>, kind: ParseErrorKind) -> Self {
        ParseError {
            context: context.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    Io(String),
    Xml { position: usize, message: String },
    MissingAttribute(&'static str),
    InvalidAttribute { name: &'static str, value: String },
    UnexpectedElement(String),
    MissingProtocol,
    DuplicateInterface(String),
    DuplicateMessage { kind: &'static str, name: String },
    DuplicateArg(String),
    DuplicateEnum(String),
    DuplicateEntry(String),
    UnknownInterface(String),
    UnknownEnum(String),
    EnumOnInvalidType(&'static str),
    InvalidVersion(u32),
    SinceTooNew { since: u32, version: u32 },
    NullNotAllowed(&'static str),
    InvalidName(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::Io(message) => write!(f, "I/O error: {}", message),
            ParseErrorKind::Xml { position, message } => {
                write!(f, "XML error at byte {}: {}", position, message)
            }
            ParseErrorKind::MissingAttribute(name) => {
                write!(f, "missing required attribute '{}'", name)
            }
            ParseErrorKind::InvalidAttribute { name, value } => {
                write!(f, "invalid value '{}' for attribute '{}'", value, name)
            }
            ParseErrorKind::UnexpectedElement(name) => write!(f, "unexpected element <{}>", name),
            ParseErrorKind::MissingProtocol => write!(f, "document has no <protocol> element"),
            ParseErrorKind::DuplicateInterface(name) => {
                write!(f, "interface '{}' is defined more than once", name)
            }
            ParseErrorKind::DuplicateMessage { kind, name } => {
                write!(f, "{} '{}' is defined more than once", kind, name)
            }
            ParseErrorKind::DuplicateArg(name) => {
                write!(f, "argument '{}' is defined more than once", name)
            }
            ParseErrorKind::DuplicateEnum(name) => {
                write!(f, "enum '{}' is defined more than once", name)
            }
            ParseErrorKind::DuplicateEntry(name) => {
                write!(f, "entry '{}' is defined more than once", name)
            }
            ParseErrorKind::UnknownInterface(name) => {
                write!(f, "reference to undefined interface '{}'", name)
            }
            ParseErrorKind::UnknownEnum(name) => write!(f, "reference to undefined enum '{}'", name),
            ParseErrorKind::EnumOnInvalidType(kind) => {
                write!(f, "enum attribute is not allowed on '{}' arguments", kind)
            }
            ParseErrorKind::InvalidVersion(version) => {
                write!(f, "invalid version {}, versions start at 1", version)
            }
            ParseErrorKind::SinceTooNew { since, version } => write!(
                f,
                "since version {} exceeds the interface version {}",
                since, version
            ),
            ParseErrorKind::NullNotAllowed(kind) => {
                write!(f, "allow-null is not allowed on '{}' arguments", kind)
            }
            ParseErrorKind::InvalidName(name) => write!(
                f,
                "'{}' is not a valid name, only ASCII letters, digits and '_' are allowed",
                name
            ),
        }
    }
}
