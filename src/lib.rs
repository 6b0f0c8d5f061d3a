//! waywire - Wayland wire protocol runtime
//!
//! The runtime half of waywire: the byte-exact wire codec, the per
//! connection object table and the connection engine that frames, validates
//! and dispatches messages. Protocol bindings are generated from the XML
//! descriptions by `waywire-scanner` and call into this crate.

pub mod client;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod wire;

pub use connection::{Connection, ConnectionState, ObjectData, ObjectInfo};
pub use error::Error;
pub use protocol::{Interface, ObjectId, Side};
pub use wire::{Argument, Fixed, Message, WEnum};

/// Runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
pub(crate) mod test_protocol {
    include!(concat!(env!("OUT_DIR"), "/calculator_unit.rs"));
}
