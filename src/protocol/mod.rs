//! Wayland protocol description tables
//!
//! Static descriptors of interfaces and their messages, as emitted by
//! waywire-scanner. The engine consults these to frame, validate and route
//! every message; opcodes are indices into `requests` and `events`.

pub mod core;
pub mod errors;
pub mod types;

pub use self::core::{wl_callback, wl_display, wl_registry};
pub use errors::*;
pub use types::*;

use std::fmt;

/// Wire type of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentType {
    Int,
    Uint,
    Fixed,
    Str,
    Object,
    NewId,
    Array,
    Fd,
}

impl ArgumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgumentType::Int => "int",
            ArgumentType::Uint => "uint",
            ArgumentType::Fixed => "fixed",
            ArgumentType::Str => "string",
            ArgumentType::Object => "object",
            ArgumentType::NewId => "new_id",
            ArgumentType::Array => "array",
            ArgumentType::Fd => "fd",
        }
    }
}

/// One argument of a message signature
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub kind: ArgumentType,
    pub nullable: bool,
    /// Statically known interface of an object or new_id argument
    pub interface: Option<&'static Interface>,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageDesc {
    pub name: &'static str,
    pub since: u32,
    pub is_destructor: bool,
    pub signature: &'static [ArgSpec],
}

impl MessageDesc {
    pub fn fd_count(&self) -> usize {
        self.signature
            .iter()
            .filter(|arg| arg.kind == ArgumentType::Fd)
            .count()
    }
}

/// Interface descriptor. Interfaces reference each other, so Debug only
/// prints the name and version.
pub struct Interface {
    pub name: &'static str,
    pub version: u32,
    pub requests: &'static [MessageDesc],
    pub events: &'static [MessageDesc],
}

impl Interface {
    /// Messages this side may send
    pub fn outgoing(&self, side: Side) -> &'static [MessageDesc] {
        match side {
            Side::Client => self.requests,
            Side::Server => self.events,
        }
    }

    /// Messages this side receives
    pub fn incoming(&self, side: Side) -> &'static [MessageDesc] {
        self.outgoing(side.peer())
    }

    /// Interfaces are identified by name; the same protocol may be
    /// generated into several crates.
    pub fn same_as(&self, other: &Interface) -> bool {
        std::ptr::eq(self, other) || self.name == other.name
    }
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}

/// Padding helper - arguments are padded to 4-byte boundaries
pub fn pad(n: usize) -> usize {
    (4 - (n % 4)) % 4
}

/// Calculate padded length
pub fn padded_len(n: usize) -> usize {
    n + pad(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        assert_eq!(padded_len(0), 0);
        assert_eq!(padded_len(1), 4);
        assert_eq!(padded_len(3), 4);
        assert_eq!(padded_len(4), 4);
        assert_eq!(padded_len(5), 8);
    }

    #[test]
    fn test_core_descriptors() {
        let display = &wl_display::WL_DISPLAY_INTERFACE;
        assert_eq!(display.name, "wl_display");
        assert_eq!(display.requests[0].name, "sync");
        assert_eq!(display.requests[1].name, "get_registry");
        assert_eq!(display.events[0].name, "error");
        assert_eq!(display.events[1].name, "delete_id");

        let sync = &display.requests[wl_display::REQ_SYNC_OPCODE as usize];
        let child = sync.signature[0].interface.unwrap();
        assert!(child.same_as(&wl_callback::WL_CALLBACK_INTERFACE));

        let done = &wl_callback::WL_CALLBACK_INTERFACE.events[0];
        assert!(done.is_destructor);
        assert_eq!(
            display.outgoing(Side::Server)[1].name,
            display.incoming(Side::Client)[1].name
        );
        assert_eq!(format!("{:?}", display), "Interface { name: \"wl_display\", version: 1 }");
    }
}
