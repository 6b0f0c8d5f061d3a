//! Server side glue
//!
//! A [`Display`] holds the state shared by every client of a compositor:
//! the advertised globals and the event serial. Each accepted socket
//! becomes a [`Client`] that owns its connection and runs on its own
//! thread; the display is the only thing clients share.

mod client;
pub mod listener;

pub use client::Client;
pub use listener::{serve, spawn_client};

use crate::connection::socket::UnixTransport;
use crate::connection::Connection;
use crate::error::Error;
use crate::protocol::{wl_display, wl_registry, ErrorCode, Interface, ObjectId, Side, DISPLAY_ID};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A server-side handle to a protocol object, implemented by generated code
pub trait Resource: Sized {
    fn interface() -> &'static Interface;

    fn from_id(id: ObjectId) -> Self;

    fn id(&self) -> ObjectId;

    /// Version the client bound the object at
    fn version(&self, conn: &Connection) -> Result<u32, Error> {
        conn.object_info(self.id()).map(|info| info.version)
    }

    /// Send `wl_display.error` about this object and close the connection
    fn post_error(&self, conn: &mut Connection, code: u32, message: impl Into<String>) {
        conn.post_error(self.id(), code, message)
    }
}

type BindFn = dyn Fn(&mut Connection, ObjectId, u32) -> Result<(), Error> + Send + Sync;

#[derive(Clone)]
struct Global {
    name: u32,
    interface: &'static Interface,
    version: u32,
    bind: Arc<BindFn>,
}

struct DisplayState {
    globals: Vec<Global>,
    next_name: u32,
}

/// Shared compositor state
#[derive(Clone)]
pub struct Display {
    state: Arc<Mutex<DisplayState>>,
    serial: Arc<AtomicU32>,
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

impl Display {
    pub fn new() -> Self {
        Display {
            state: Arc::new(Mutex::new(DisplayState {
                globals: Vec::new(),
                next_name: 1,
            })),
            serial: Arc::new(AtomicU32::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        // the state stays consistent even if a client thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advertise a global of `R`'s interface, up to `version`.
    ///
    /// `bind` runs on the client's thread each time a client binds it, with
    /// the new resource and the version the client asked for. Returns the
    /// global's name.
    pub fn create_global<R, F>(&self, version: u32, bind: F) -> Result<u32, Error>
    where
        R: Resource + 'static,
        F: Fn(&mut Connection, R, u32) -> Result<(), Error> + Send + Sync + 'static,
    {
        let interface = R::interface();
        if version == 0 || version > interface.version {
            return Err(Error::InvalidVersion {
                interface: interface.name,
                version,
            });
        }
        let mut state = self.lock();
        let name = state.next_name;
        state.next_name += 1;
        state.globals.push(Global {
            name,
            interface,
            version,
            bind: Arc::new(move |conn: &mut Connection, id: ObjectId, version: u32| {
                bind(conn, R::from_id(id), version)
            }),
        });
        log::info!("Created global {} {} v{}", name, interface.name, version);
        Ok(name)
    }

    /// Stop advertising a global. Clients that already bound it keep their
    /// objects; registries created afterwards no longer list it.
    pub fn remove_global(&self, name: u32) -> bool {
        let mut state = self.lock();
        let before = state.globals.len();
        state.globals.retain(|global| global.name != name);
        let removed = state.globals.len() != before;
        if removed {
            log::info!("Removed global {}", name);
        }
        removed
    }

    /// `(name, interface, version)` of every global
    pub fn globals(&self) -> Vec<(u32, &'static str, u32)> {
        self.lock()
            .globals
            .iter()
            .map(|global| (global.name, global.interface.name, global.version))
            .collect()
    }

    fn find_global(&self, name: u32) -> Option<Global> {
        self.lock()
            .globals
            .iter()
            .find(|global| global.name == name)
            .cloned()
    }

    /// Next event serial, shared by all clients
    pub fn next_serial(&self) -> u32 {
        self.serial.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Attach the display handler to the server end of `conn`
    pub fn attach(&self, conn: &mut Connection) -> Result<(), Error> {
        if conn.side() != Side::Server {
            return Err(Error::InvalidId);
        }
        conn.set_object_data(
            DISPLAY_ID,
            wl_display::server::handler(DisplayHandler {
                display: self.clone(),
            }),
        )
    }

    /// Accept a connected socket as a new client
    pub fn insert_client(&self, stream: UnixStream) -> Result<Client, Error> {
        let transport = UnixTransport::new(stream);
        let credentials = match transport.peer_credentials() {
            Ok(credentials) => Some(credentials),
            Err(e) => {
                log::debug!("No peer credentials: {}", e);
                None
            }
        };
        let mut conn = Connection::new(Side::Server, transport);
        self.attach(&mut conn)?;
        Ok(Client::new(conn, credentials))
    }
}

struct DisplayHandler {
    display: Display,
}

impl wl_display::server::Handler for DisplayHandler {
    fn request(
        &self,
        conn: &mut Connection,
        _object: wl_display::server::WlDisplay,
        request: wl_display::server::Request,
    ) -> Result<(), Error> {
        match request {
            wl_display::server::Request::Sync { callback } => {
                callback.done(conn, self.display.next_serial())
            }
            wl_display::server::Request::GetRegistry { registry } => {
                conn.set_object_data(
                    registry.id(),
                    wl_registry::server::handler(RegistryHandler {
                        display: self.display.clone(),
                    }),
                )?;
                for (name, interface, version) in self.display.globals() {
                    registry.global(conn, name, interface, version)?;
                }
                Ok(())
            }
        }
    }
}

struct RegistryHandler {
    display: Display,
}

impl wl_registry::server::Handler for RegistryHandler {
    fn request(
        &self,
        conn: &mut Connection,
        registry: wl_registry::server::WlRegistry,
        request: wl_registry::server::Request,
    ) -> Result<(), Error> {
        let wl_registry::server::Request::Bind { name, id } = request;
        let invalid_object: u32 = ErrorCode::InvalidObject.into();

        let global = match self.display.find_global(name) {
            Some(global) => global,
            None => {
                registry.post_error(conn, invalid_object, format!("invalid global {}", name));
                return Ok(());
            }
        };
        if global.interface.name != id.interface {
            registry.post_error(
                conn,
                invalid_object,
                format!(
                    "invalid interface for global {}: have {}, wanted {}",
                    name, id.interface, global.interface.name
                ),
            );
            return Ok(());
        }
        if id.version == 0 || id.version > global.version {
            registry.post_error(
                conn,
                invalid_object,
                format!(
                    "invalid version for global {} ({}): have {}, wanted {}",
                    name, id.interface, id.version, global.version
                ),
            );
            return Ok(());
        }

        match conn.bind_object(id.id, global.interface, id.version, None) {
            Ok(()) => {}
            Err(Error::IdCollision) | Err(Error::InvalidId) => {
                registry.post_error(conn, invalid_object, format!("invalid new id {}", id.id));
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        log::debug!(
            "Client bound global {} as {}@{} v{}",
            name,
            global.interface.name,
            id.id,
            id.version
        );
        (global.bind)(conn, id.id, id.version)
    }
}
