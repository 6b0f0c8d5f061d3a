//! Client side glue
//!
//! Connecting to a compositor, the display handler every client connection
//! needs, round trips and the global registry.

use crate::connection::socket::{socket_path, UnixTransport};
use crate::connection::{Connection, ObjectData};
use crate::error::Error;
use crate::protocol::{wl_callback, wl_display, wl_registry, Interface, ObjectId, ProtocolError, Side, DISPLAY_ID};
use std::env;
use std::io;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A client-side handle to a protocol object, implemented by generated code
pub trait Proxy: Sized {
    fn interface() -> &'static Interface;

    fn from_id(id: ObjectId) -> Self;

    fn id(&self) -> ObjectId;

    /// Version the object was created with
    fn version(&self, conn: &Connection) -> Result<u32, Error> {
        conn.object_info(self.id()).map(|info| info.version)
    }

    fn is_alive(&self, conn: &Connection) -> bool {
        conn.object_info(self.id()).is_ok()
    }
}

/// Connect using the environment.
///
/// `WAYLAND_SOCKET` names an already connected descriptor and wins when
/// set; otherwise `WAYLAND_DISPLAY` (default `wayland-0`) is resolved
/// against `XDG_RUNTIME_DIR`.
pub fn connect() -> Result<Connection, Error> {
    if let Ok(value) = env::var("WAYLAND_SOCKET") {
        let fd: RawFd = value.trim().parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("WAYLAND_SOCKET is not a descriptor: {:?}", value),
            )
        })?;
        // the descriptor must not leak into child processes
        env::remove_var("WAYLAND_SOCKET");
        log::debug!("Connecting through inherited socket {}", fd);
        // SAFETY: the parent handed this descriptor over to us and nothing
        // else in the process owns it.
        let stream = unsafe { UnixStream::from_raw_fd(fd) };
        return connect_to(stream);
    }

    let name = env::var("WAYLAND_DISPLAY").unwrap_or_else(|_| "wayland-0".to_string());
    let path = socket_path(&name)?;
    log::debug!("Connecting to {}", path.display());
    let stream = UnixStream::connect(&path)?;
    connect_to(stream)
}

/// Set up the client end of a connection over `stream`
pub fn connect_to(stream: UnixStream) -> Result<Connection, Error> {
    let mut conn = Connection::new(Side::Client, UnixTransport::new(stream));
    conn.set_object_data(DISPLAY_ID, wl_display::client::on_event(display_event))?;
    Ok(conn)
}

fn display_event(
    conn: &mut Connection,
    _display: wl_display::client::WlDisplay,
    event: wl_display::client::Event,
) -> Result<(), Error> {
    match event {
        wl_display::client::Event::Error {
            object_id,
            code,
            message,
        } => {
            let interface = conn
                .object_info(object_id)
                .map(|info| info.interface.name)
                .unwrap_or("unknown");
            Err(Error::Protocol(ProtocolError::new(
                object_id, interface, code, message,
            )))
        }
        wl_display::client::Event::DeleteId { id } => conn.acknowledge_id(ObjectId(id)),
    }
}

/// The display proxy of a connection
pub fn display(_conn: &Connection) -> wl_display::client::WlDisplay {
    wl_display::client::WlDisplay::from_id(DISPLAY_ID)
}

/// Block until the server has processed every request sent so far
pub fn roundtrip(conn: &mut Connection) -> Result<(), Error> {
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    display(conn).sync(
        conn,
        Some(wl_callback::client::on_event(move |_, _, _event| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })),
    )?;
    while !done.load(Ordering::SeqCst) {
        conn.blocking_dispatch()?;
    }
    Ok(())
}

/// A global advertised through `wl_registry.global`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

/// Registry plus the globals it has announced
#[derive(Debug)]
pub struct GlobalList {
    registry: wl_registry::client::WlRegistry,
    globals: Arc<Mutex<Vec<GlobalInfo>>>,
}

impl GlobalList {
    /// Create a registry and wait for the initial burst of globals
    pub fn new(conn: &mut Connection) -> Result<Self, Error> {
        let globals = Arc::new(Mutex::new(Vec::new()));
        let list = globals.clone();
        let registry = display(conn).get_registry(
            conn,
            Some(wl_registry::client::on_event(move |_, _, event| {
                let mut globals = list.lock().unwrap_or_else(|e| e.into_inner());
                match event {
                    wl_registry::client::Event::Global {
                        name,
                        interface,
                        version,
                    } => {
                        log::debug!("Global {} {} v{}", name, interface, version);
                        globals.push(GlobalInfo {
                            name,
                            interface,
                            version,
                        });
                    }
                    wl_registry::client::Event::GlobalRemove { name } => {
                        globals.retain(|global| global.name != name);
                    }
                }
                Ok(())
            })),
        )?;
        roundtrip(conn)?;
        Ok(GlobalList { registry, globals })
    }

    pub fn registry(&self) -> wl_registry::client::WlRegistry {
        self.registry
    }

    /// Currently advertised globals, in announcement order
    pub fn globals(&self) -> Vec<GlobalInfo> {
        self.globals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn find(&self, interface: &str) -> Option<GlobalInfo> {
        self.globals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|global| global.interface == interface)
            .cloned()
    }

    /// Bind the first global of `P`'s interface at `version`
    pub fn bind<P: Proxy>(
        &self,
        conn: &mut Connection,
        version: u32,
        data: Option<Arc<dyn ObjectData>>,
    ) -> Result<P, Error> {
        let interface = P::interface();
        let global = self
            .find(interface.name)
            .ok_or(Error::MissingGlobal(interface.name))?;
        if version == 0 || version > global.version || version > interface.version {
            return Err(Error::InvalidVersion {
                interface: interface.name,
                version,
            });
        }
        self.registry.bind::<P>(conn, global.name, version, data)
    }
}
