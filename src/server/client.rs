//! Client session management
//!
//! A [`Client`] is the server end of one connection together with what we
//! know about the process on the other side.

use crate::connection::socket::Credentials;
use crate::connection::Connection;
use crate::error::Error;

/// Represents a connected Wayland client
#[derive(Debug)]
pub struct Client {
    /// The connection to this client
    connection: Connection,

    /// Peer process identity, where the platform provides it
    credentials: Option<Credentials>,
}

impl Client {
    /// Create a new client session
    pub fn new(connection: Connection, credentials: Option<Credentials>) -> Self {
        Client {
            connection,
            credentials,
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
    }

    pub fn connection(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Dispatch requests until the connection closes.
    ///
    /// A client hanging up or a clean shutdown is not an error.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            match self.connection.blocking_dispatch() {
                Ok(_) => {}
                Err(Error::Disconnected) => return Ok(()),
                Err(Error::Closed) if self.connection.close_reason().is_none() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the connection
    pub fn disconnect(&mut self) {
        self.connection.shutdown();
    }
}
