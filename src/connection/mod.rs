//! Connection engine
//!
//! A [`Connection`] owns the transport, the object table and both message
//! queues of one end of a Wayland connection. Incoming frames are decoded
//! against the protocol tables and dispatched to the handler attached to
//! their target object, strictly in arrival order.

pub mod socket;

use crate::error::Error;
use crate::protocol::{
    wl_display, ArgumentType, Interface, MessageDesc, ObjectId, ProtocolError, Side,
    DISPLAY_ID,
};
use crate::resources::ObjectTable;
use crate::wire::{self, Argument, Message, MAX_FDS_OUT};
use socket::Transport;
use std::collections::VecDeque;
use std::env;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

/// Size of a single read from the transport
const READ_CHUNK: usize = 4096;

/// Behaviour attached to an object; receives every message addressed to it
pub trait ObjectData: Send + Sync {
    fn dispatch(&self, conn: &mut Connection, msg: Message) -> Result<(), Error>;

    /// The object was released, by a destructor or by connection close
    fn destroyed(&self, _object: ObjectId) {}
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// Public view of a live object
#[derive(Debug, Clone, Copy)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub interface: &'static Interface,
    pub version: u32,
}

type CloseListener = Box<dyn FnOnce(Option<&Error>) + Send>;

/// One end of a connection
pub struct Connection {
    side: Side,
    state: ConnectionState,
    transport: Box<dyn Transport>,
    objects: ObjectTable<Option<Arc<dyn ObjectData>>>,

    out_bytes: Vec<u8>,
    out_fds: VecDeque<OwnedFd>,
    in_bytes: Vec<u8>,
    in_fds: VecDeque<OwnedFd>,

    close_reason: Option<Error>,
    close_listeners: Vec<CloseListener>,

    /// Trace every message, from `WAYLAND_DEBUG`
    debug: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.side)
            .field("state", &self.state)
            .field("objects", &self.objects.len())
            .field("queued_out", &self.out_bytes.len())
            .field("queued_in", &self.in_bytes.len())
            .finish()
    }
}

fn debug_enabled(side: Side) -> bool {
    match env::var("WAYLAND_DEBUG") {
        Ok(value) => value == "1" || value == side.as_str(),
        Err(_) => false,
    }
}

impl Connection {
    /// Wrap a transport; the display object is bound at id 1 without data
    pub fn new(side: Side, transport: impl Transport + 'static) -> Self {
        let mut objects = ObjectTable::new(side);
        // cannot collide in an empty table
        let _ = objects.bind(DISPLAY_ID, &wl_display::WL_DISPLAY_INTERFACE, 1, None);
        Connection {
            side,
            state: ConnectionState::Open,
            transport: Box::new(transport),
            objects,
            out_bytes: Vec::new(),
            out_fds: VecDeque::new(),
            in_bytes: Vec::new(),
            in_fds: VecDeque::new(),
            close_reason: None,
            close_listeners: Vec::new(),
            debug: debug_enabled(side),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Why the connection closed; `None` while open or after `shutdown()`
    pub fn close_reason(&self) -> Option<&Error> {
        self.close_reason.as_ref()
    }

    fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Open => Ok(()),
            _ => Err(Error::Closed),
        }
    }

    /// Create an object in our own id range without announcing it
    pub fn create_object(
        &mut self,
        interface: &'static Interface,
        version: u32,
        data: Option<Arc<dyn ObjectData>>,
    ) -> Result<ObjectId, Error> {
        self.ensure_open()?;
        check_version(interface, version)?;
        self.objects.allocate(interface, version, data)
    }

    /// Register an object the peer already created at `id`, as the server
    /// does for the untyped `new_id` of `wl_registry.bind`
    pub fn bind_object(
        &mut self,
        id: ObjectId,
        interface: &'static Interface,
        version: u32,
        data: Option<Arc<dyn ObjectData>>,
    ) -> Result<(), Error> {
        self.ensure_open()?;
        if id.allocator() == self.side {
            return Err(Error::InvalidId);
        }
        check_version(interface, version)?;
        self.objects.bind(id, interface, version, data)
    }

    /// Attach or replace the handler of a live object
    pub fn set_object_data(&mut self, id: ObjectId, data: Arc<dyn ObjectData>) -> Result<(), Error> {
        self.objects.set_data(id, Some(data)).map(|_| ())
    }

    pub fn object_info(&self, id: ObjectId) -> Result<ObjectInfo, Error> {
        let object = self.objects.lookup(id)?;
        Ok(ObjectInfo {
            id,
            interface: object.interface,
            version: object.version,
        })
    }

    /// Number of live objects, the display included
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// The peer is done with `id` (`wl_display.delete_id`)
    pub fn acknowledge_id(&mut self, id: ObjectId) -> Result<(), Error> {
        if self.objects.is_live(id) {
            log::debug!("delete_id for live object {}, releasing it", id);
            self.release_object(id)?;
        }
        if !self.objects.acknowledge(id) {
            log::debug!("delete_id for {} which is not awaiting acknowledgment", id);
        }
        Ok(())
    }

    /// Queue a message.
    ///
    /// Fails without queuing anything when the target is unknown, the
    /// message does not exist in our direction, the object version is too
    /// old, or the arguments do not match the signature. Sending a
    /// destructor releases the target.
    pub fn send(&mut self, msg: Message) -> Result<(), Error> {
        self.ensure_open()?;
        let (interface, version) = {
            let object = self.objects.lookup(msg.object)?;
            (object.interface, object.version)
        };
        let desc = outgoing_desc(interface, self.side, msg.opcode)?;
        if desc.since > version {
            return Err(Error::VersionMismatch {
                interface: interface.name,
                message: desc.name,
                since: desc.since,
                version,
                id: msg.object,
            });
        }

        let fd_count = desc.fd_count();
        if fd_count > 0 && self.out_fds.len() + fd_count > MAX_FDS_OUT {
            self.flush()?;
        }
        if self.debug {
            log::info!(
                "[{}] -> {}",
                self.side,
                format_message(interface, desc, &msg)
            );
        }

        let object = msg.object;
        wire::encode_message(msg, desc.signature, &mut self.out_bytes, &mut self.out_fds)?;
        if desc.is_destructor {
            self.release_object(object)?;
        }
        Ok(())
    }

    /// Queue a message creating a new object.
    ///
    /// The null new_id placeholder in `msg` is replaced by a freshly
    /// allocated id. `version` defaults to the version of the sending
    /// object. Nothing is allocated if the message cannot be queued.
    pub fn send_constructor(
        &mut self,
        mut msg: Message,
        interface: &'static Interface,
        version: Option<u32>,
        data: Option<Arc<dyn ObjectData>>,
    ) -> Result<ObjectId, Error> {
        self.ensure_open()?;
        let parent_version = self.objects.lookup(msg.object)?.version;
        let version = version.unwrap_or(parent_version).min(interface.version);
        check_version(interface, version)?;

        let id = self.objects.allocate(interface, version, data)?;
        let mut substituted = false;
        for arg in msg.args.iter_mut() {
            match arg {
                Argument::NewId(slot) if slot.is_null() => {
                    *slot = id;
                    substituted = true;
                    break;
                }
                Argument::UntypedNewId(new_id) if new_id.id.is_null() => {
                    new_id.id = id;
                    substituted = true;
                    break;
                }
                _ => {}
            }
        }

        let result = if substituted {
            self.send(msg)
        } else {
            Err(Error::BadMessage {
                interface: self.objects.lookup(msg.object)?.interface.name,
                opcode: msg.opcode,
            })
        };
        if let Err(e) = result {
            // roll the allocation back
            if self.objects.release(id).is_ok() {
                self.objects.acknowledge(id);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Report a fatal error to the client and close the connection
    pub fn post_error(&mut self, object: ObjectId, code: u32, message: impl Into<String>) {
        let message = message.into();
        let interface = match self.objects.lookup(object) {
            Ok(o) => o.interface.name,
            Err(_) => "unknown",
        };
        let error = ProtocolError::new(object, interface, code, message.clone());
        log::error!("[{}] posting {}", self.side, error);
        if self.side == Side::Server {
            if let Err(e) = self.send_display_error(object, code, &message) {
                log::warn!("Could not send wl_display.error: {}", e);
            }
        }
        self.close(Some(Error::Protocol(error)));
    }

    fn send_display_error(&mut self, object: ObjectId, code: u32, message: &str) -> Result<(), Error> {
        let object = if self.objects.is_live(object) {
            object
        } else {
            DISPLAY_ID
        };
        self.send(Message::new(
            DISPLAY_ID,
            wl_display::EVT_ERROR_OPCODE,
            vec![
                Argument::Object(object),
                Argument::Uint(code),
                Argument::Str(Some(message.to_string())),
            ],
        ))
    }

    fn release_object(&mut self, id: ObjectId) -> Result<(), Error> {
        let object = self.objects.release(id)?;
        if self.side == Side::Server && id.allocator() == Side::Client {
            self.send(Message::new(
                DISPLAY_ID,
                wl_display::EVT_DELETE_ID_OPCODE,
                vec![Argument::Uint(id.0)],
            ))?;
        }
        if let Some(data) = object.data {
            data.destroyed(id);
        }
        Ok(())
    }

    /// Write queued output. Stops without error when the socket is full.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.state == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        if let Err(e) = self.write_queued() {
            let err = Error::from(e);
            self.close(Some(err.clone()));
            return Err(err);
        }
        Ok(())
    }

    fn write_queued(&mut self) -> io::Result<()> {
        while !self.out_bytes.is_empty() {
            let fds: Vec<RawFd> = self
                .out_fds
                .iter()
                .take(MAX_FDS_OUT)
                .map(|fd| fd.as_raw_fd())
                .collect();
            match self.transport.send(&self.out_bytes, &fds) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ))
                }
                Ok(written) => {
                    self.out_bytes.drain(..written);
                    // our copies are closed once the peer has its own
                    self.out_fds.drain(..fds.len());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Read whatever the transport has, returning the number of bytes.
    ///
    /// End of stream closes the connection with [`Error::Disconnected`].
    pub fn read(&mut self) -> Result<usize, Error> {
        self.ensure_open()?;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.transport.recv(&mut buf, &mut self.in_fds) {
                Ok(0) => {
                    log::info!("[{}] peer hung up", self.side);
                    self.close(Some(Error::Disconnected));
                    return Err(Error::Disconnected);
                }
                Ok(n) => {
                    self.in_bytes.extend_from_slice(&buf[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) => {
                    let err = Error::from(e);
                    self.close(Some(err.clone()));
                    return Err(err);
                }
            }
        }
    }

    /// Dispatch every complete frame already read, in order.
    ///
    /// Returns the number of frames processed. A partial frame stays
    /// buffered for the next call. A protocol violation by the peer closes
    /// the connection and is returned.
    pub fn dispatch_pending(&mut self) -> Result<usize, Error> {
        self.ensure_open()?;
        let mut processed = 0;
        loop {
            let (target, msg) = match self.next_message() {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err((object, err)) => return Err(self.fail(object, err)),
            };
            processed += 1;
            if let Some(target) = target {
                self.deliver(target, msg)?;
            }
            if self.state != ConnectionState::Open {
                return Err(self.close_reason.clone().unwrap_or(Error::Closed));
            }
        }
        Ok(processed)
    }

    /// Decode the next frame. `Ok(Some((None, msg)))` is a message for a
    /// zombie that must be dropped.
    #[allow(clippy::type_complexity)]
    fn next_message(&mut self) -> Result<Option<(Option<Target>, Message)>, (ObjectId, Error)> {
        let (header, body_len) = match wire::split_frame(&self.in_bytes) {
            Ok(Some((header, body))) => (header, body.len()),
            Ok(None) => return Ok(None),
            Err(e) => return Err((DISPLAY_ID, e.into())),
        };
        let id = header.object;

        let (interface, version, live) = match self.objects.lookup(id) {
            Ok(object) => (object.interface, object.version, true),
            Err(e) => match self.objects.zombie(id) {
                Some((interface, version)) => (interface, version, false),
                None => return Err((DISPLAY_ID, e)),
            },
        };
        let desc = match interface.incoming(self.side).get(header.opcode as usize) {
            Some(desc) => desc,
            None => {
                return Err((
                    id,
                    Error::InvalidOpcode {
                        interface: interface.name,
                        opcode: header.opcode,
                    },
                ))
            }
        };
        if desc.since > version {
            return Err((
                id,
                Error::VersionMismatch {
                    interface: interface.name,
                    message: desc.name,
                    since: desc.since,
                    version,
                    id,
                },
            ));
        }

        let frame_len = wire::HEADER_SIZE + body_len;
        let decoded = wire::decode_message(
            header,
            &self.in_bytes[wire::HEADER_SIZE..frame_len],
            desc.signature,
            &mut self.in_fds,
        );
        self.in_bytes.drain(..frame_len);
        let msg = decoded.map_err(|e| (id, Error::from(e)))?;

        if self.debug {
            log::info!(
                "[{}] {}{}",
                self.side,
                if live { "<- " } else { "<- (zombie) " },
                format_message(interface, desc, &msg)
            );
        }
        if !live {
            log::debug!(
                "[{}] dropping {}.{} for released object {}",
                self.side,
                interface.name,
                desc.name,
                id
            );
            self.bind_orphans(desc, version, &msg)
                .map_err(|e| (id, e))?;
            return Ok(Some((None, msg)));
        }

        self.resolve_arguments(desc, version, &msg)
            .map_err(|e| (id, e))?;
        Ok(Some((
            Some(Target {
                interface,
                desc,
                id,
            }),
            msg,
        )))
    }

    /// Check object arguments and bind typed new_ids at the parent's version
    fn resolve_arguments(
        &mut self,
        desc: &'static MessageDesc,
        version: u32,
        msg: &Message,
    ) -> Result<(), Error> {
        for (arg, spec) in msg.args.iter().zip(desc.signature) {
            match (arg, spec.kind) {
                (Argument::Object(id), ArgumentType::Object) if !id.is_null() => {
                    let actual = match self.objects.lookup(*id) {
                        Ok(object) => object.interface,
                        Err(e) => match self.objects.zombie(*id) {
                            Some((interface, _)) => interface,
                            None => return Err(e),
                        },
                    };
                    if let Some(expected) = spec.interface {
                        if !expected.same_as(actual) {
                            return Err(Error::WrongInterface {
                                id: *id,
                                expected: expected.name,
                                actual: actual.name,
                            });
                        }
                    }
                }
                (Argument::NewId(id), ArgumentType::NewId) => {
                    let interface = match spec.interface {
                        Some(interface) => interface,
                        None => continue,
                    };
                    if id.allocator() == self.side {
                        return Err(Error::InvalidId);
                    }
                    self.objects
                        .bind(*id, interface, version.min(interface.version), None)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Objects created by a message to a zombie are born released, so the
    /// peer's id range stays dense and later messages to them are dropped too
    fn bind_orphans(
        &mut self,
        desc: &'static MessageDesc,
        version: u32,
        msg: &Message,
    ) -> Result<(), Error> {
        for (arg, spec) in msg.args.iter().zip(desc.signature) {
            if let (Argument::NewId(id), Some(interface)) = (arg, spec.interface) {
                if id.allocator() == self.side {
                    return Err(Error::InvalidId);
                }
                self.objects
                    .bind(*id, interface, version.min(interface.version), None)?;
                self.release_object(*id)?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, target: Target, msg: Message) -> Result<(), Error> {
        let data = match self.objects.data(target.id) {
            Ok(data) => data.clone(),
            Err(e) => return Err(self.fail(target.id, e)),
        };
        match data {
            Some(data) => {
                if let Err(e) = data.dispatch(self, msg) {
                    if self.state != ConnectionState::Open {
                        return Err(e);
                    }
                    if e.is_fatal() {
                        return Err(self.fail(target.id, e));
                    }
                    log::warn!(
                        "[{}] handler for {}@{}.{} failed: {}",
                        self.side,
                        target.interface.name,
                        target.id,
                        target.desc.name,
                        e
                    );
                }
            }
            // a server must act on every request that is not a destructor
            None if self.side == Side::Server && !target.desc.is_destructor => {
                let err = Error::Handler(format!(
                    "no handler for {}@{}.{}",
                    target.interface.name, target.id, target.desc.name
                ));
                return Err(self.fail(target.id, err));
            }
            None => log::warn!(
                "[{}] no handler for {}@{}.{}, message dropped",
                self.side,
                target.interface.name,
                target.id,
                target.desc.name
            ),
        }
        if target.desc.is_destructor
            && self.state == ConnectionState::Open
            && self.objects.is_live(target.id)
        {
            self.release_object(target.id)?;
        }
        Ok(())
    }

    /// Close on a fatal dispatch error, telling a client why first
    fn fail(&mut self, object: ObjectId, err: Error) -> Error {
        if self.state == ConnectionState::Open {
            log::error!("[{}] fatal error on object {}: {}", self.side, object, err);
            if self.side == Side::Server && !matches!(err, Error::Io(_) | Error::Disconnected) {
                let code: u32 = err.error_code().into();
                if let Err(e) = self.send_display_error(object, code, &err.to_string()) {
                    log::warn!("Could not send wl_display.error: {}", e);
                }
            }
            self.close(Some(err.clone()));
        }
        err
    }

    /// Flush, then dispatch; block for input if nothing was pending
    pub fn blocking_dispatch(&mut self) -> Result<usize, Error> {
        self.flush()?;
        let processed = self.dispatch_pending()?;
        if processed > 0 {
            return Ok(processed);
        }
        loop {
            self.read()?;
            let processed = self.dispatch_pending()?;
            if processed > 0 {
                return Ok(processed);
            }
        }
    }

    /// Register a callback run once when the connection closes
    pub fn on_close(&mut self, listener: impl FnOnce(Option<&Error>) + Send + 'static) {
        if self.state == ConnectionState::Closed {
            listener(self.close_reason.as_ref());
        } else {
            self.close_listeners.push(Box::new(listener));
        }
    }

    /// Close without error
    pub fn shutdown(&mut self) {
        self.close(None);
    }

    fn close(&mut self, reason: Option<Error>) {
        if self.state != ConnectionState::Open {
            return;
        }
        self.state = ConnectionState::Closing;
        match &reason {
            Some(reason) => log::info!("[{}] closing: {}", self.side, reason),
            None => log::info!("[{}] closing", self.side),
        }

        if !matches!(reason, Some(Error::Io(_)) | Some(Error::Disconnected)) {
            if let Err(e) = self.write_queued() {
                log::debug!("[{}] final flush failed: {}", self.side, e);
            }
        }
        self.out_bytes.clear();
        self.out_fds.clear();
        self.in_bytes.clear();
        self.in_fds.clear();

        for (id, object) in self.objects.clear() {
            if let Some(data) = object.data {
                data.destroyed(id);
            }
        }
        if let Err(e) = self.transport.shutdown() {
            log::debug!("[{}] transport shutdown failed: {}", self.side, e);
        }

        self.close_reason = reason;
        self.state = ConnectionState::Closed;
        for listener in std::mem::take(&mut self.close_listeners) {
            listener(self.close_reason.as_ref());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close(None);
    }
}

/// Where a decoded message goes
#[derive(Clone, Copy)]
struct Target {
    interface: &'static Interface,
    desc: &'static MessageDesc,
    id: ObjectId,
}

fn outgoing_desc(
    interface: &'static Interface,
    side: Side,
    opcode: u16,
) -> Result<&'static MessageDesc, Error> {
    interface
        .outgoing(side)
        .get(opcode as usize)
        .ok_or(Error::InvalidOpcode {
            interface: interface.name,
            opcode,
        })
}

fn check_version(interface: &'static Interface, version: u32) -> Result<(), Error> {
    if version == 0 || version > interface.version {
        return Err(Error::InvalidVersion {
            interface: interface.name,
            version,
        });
    }
    Ok(())
}

/// `wl_display@1.sync(new id @3)`
fn format_message(interface: &Interface, desc: &MessageDesc, msg: &Message) -> String {
    let args: Vec<String> = msg.args.iter().map(|arg| arg.to_string()).collect();
    format!(
        "{}@{}.{}({})",
        interface.name,
        msg.object,
        desc.name,
        args.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{self, Proxy};
    use crate::protocol::{wl_callback, ErrorCode, SERVER_ID_BASE};
    use crate::server::{Client, Display, Resource};
    use crate::test_protocol::{calculator, calculator_result};
    use std::fs::File;
    use std::io::Write;
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Client and server ends of one socket pair, stepped by hand
    fn pair() -> (Connection, Client) {
        init_logging();
        let (a, b) = UnixStream::pair().unwrap();
        let server = Display::new().insert_client(b).unwrap();
        let client = client::connect_to(a).unwrap();
        (client, server)
    }

    /// Deliver everything the client queued to the server and back
    fn exchange(client: &mut Connection, server: &mut Client) {
        client.flush().unwrap();
        server.connection().blocking_dispatch().unwrap();
        server.connection().flush().unwrap();
    }

    fn calculator_handler() -> Arc<dyn ObjectData> {
        calculator::server::on_request(|conn, calc, request| match request {
            calculator::server::Request::Add { a, b, result } => {
                result.value(conn, a.wrapping_add(b))
            }
            calculator::server::Request::Scale {
                value,
                factor,
                result,
            } => result.value(conn, (value as f64 * factor).round() as i32),
            calculator::server::Request::Store { label, header, fd } => {
                let size = File::from(fd).metadata()?.len() as u32;
                calc.stored(conn, label.as_deref(), size + header.len() as u32)
            }
            calculator::server::Request::SetMode { .. } => Ok(()),
            calculator::server::Request::Destroy => Ok(()),
        })
    }

    /// A calculator at id 2 on both ends, bypassing the registry
    fn calculators(
        client: &mut Connection,
        server: &mut Client,
        client_version: u32,
        server_version: u32,
        data: Option<Arc<dyn ObjectData>>,
    ) -> calculator::client::Calculator {
        let id = client
            .create_object(&calculator::CALCULATOR_INTERFACE, client_version, data)
            .unwrap();
        server
            .connection()
            .bind_object(
                id,
                &calculator::CALCULATOR_INTERFACE,
                server_version,
                Some(calculator_handler()),
            )
            .unwrap();
        calculator::client::Calculator::from_id(id)
    }

    fn record_values(values: &Arc<Mutex<Vec<i32>>>) -> Option<Arc<dyn ObjectData>> {
        let values = values.clone();
        Some(calculator_result::client::on_event(move |_, _, event| {
            let calculator_result::client::Event::Value { v } = event;
            values.lock().unwrap().push(v);
            Ok(())
        }))
    }

    #[test]
    fn test_sync_and_delete_id() {
        let (mut client, mut server) = pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let callback = client::display(&client)
            .sync(
                &mut client,
                Some(wl_callback::client::on_event(move |_, _, event| {
                    let wl_callback::client::Event::Done { callback_data } = event;
                    assert_eq!(callback_data, 1);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
        assert_eq!(callback.id(), ObjectId(2));

        exchange(&mut client, &mut server);
        // done, then delete_id
        assert_eq!(client.blocking_dispatch().unwrap(), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(client.object_info(callback.id()).is_err());

        // acknowledged, so the next callback reuses the id
        let next = client::display(&client).sync(&mut client, None).unwrap();
        assert_eq!(next.id(), ObjectId(2));
    }

    #[test]
    fn test_results_dispatch_in_order() {
        let (mut client, mut server) = pair();
        let calc = calculators(&mut client, &mut server, 2, 2, None);
        let values = Arc::new(Mutex::new(Vec::new()));

        calc.add(&mut client, 1, 2, record_values(&values)).unwrap();
        calc.add(&mut client, 30, 40, record_values(&values)).unwrap();
        calc.scale(&mut client, 10, 0.5, record_values(&values))
            .unwrap();
        exchange(&mut client, &mut server);
        while values.lock().unwrap().len() < 3 {
            client.blocking_dispatch().unwrap();
        }
        assert_eq!(*values.lock().unwrap(), vec![3, 70, 5]);
    }

    #[test]
    fn test_slow_handlers_keep_arrival_order() {
        let (mut client, mut server) = pair();
        let id = client
            .create_object(&calculator::CALCULATOR_INTERFACE, 1, None)
            .unwrap();
        server
            .connection()
            .bind_object(
                id,
                &calculator::CALCULATOR_INTERFACE,
                1,
                Some(calculator::server::on_request(|conn, _, request| {
                    if let calculator::server::Request::Add { a, b, result } = request {
                        if a == 1 {
                            thread::sleep(Duration::from_millis(50));
                        }
                        result.value(conn, a + b)?;
                    }
                    Ok(())
                })),
            )
            .unwrap();
        let calc = calculator::client::Calculator::from_id(id);

        let order = Arc::new(Mutex::new(Vec::new()));
        for a in 1..=4 {
            let order = order.clone();
            calc.add(
                &mut client,
                a,
                10,
                Some(calculator_result::client::on_event(move |_, _, event| {
                    let calculator_result::client::Event::Value { v } = event;
                    if v == 11 {
                        thread::sleep(Duration::from_millis(50));
                    }
                    order.lock().unwrap().push(v);
                    Ok(())
                })),
            )
            .unwrap();
        }
        exchange(&mut client, &mut server);
        while order.lock().unwrap().len() < 4 {
            client.blocking_dispatch().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![11, 12, 13, 14]);
    }

    #[test]
    fn test_client_and_server_ids_are_disjoint() {
        let (mut client, mut server) = pair();
        let c = client
            .create_object(&calculator::CALCULATOR_INTERFACE, 1, None)
            .unwrap();
        let s = server
            .connection()
            .create_object(&calculator::CALCULATOR_INTERFACE, 1, None)
            .unwrap();
        assert!(c.get() < SERVER_ID_BASE);
        assert!(s.get() >= SERVER_ID_BASE);
        assert!(matches!(
            client.bind_object(c, &calculator::CALCULATOR_INTERFACE, 1, None),
            Err(Error::InvalidId)
        ));
    }

    #[test]
    fn test_version_gating_on_send() {
        let (mut client, mut server) = pair();
        let calc = calculators(&mut client, &mut server, 1, 1, None);
        let err = calc.scale(&mut client, 1, 1.0, None).unwrap_err();
        assert!(matches!(
            err,
            Error::VersionMismatch {
                message: "scale",
                since: 2,
                version: 1,
                ..
            }
        ));
        // nothing queued, no id consumed
        assert!(client.out_bytes.is_empty());
        assert_eq!(client.object_count(), 2);
    }

    #[test]
    fn test_version_gating_on_receive_is_fatal() {
        let (mut client, mut server) = pair();
        // the client believes it has version 2, the server bound version 1
        let calc = calculators(&mut client, &mut server, 2, 1, None);
        calc.scale(&mut client, 1, 1.0, None).unwrap();
        client.flush().unwrap();

        let err = server.connection().blocking_dispatch().unwrap_err();
        assert!(matches!(err, Error::VersionMismatch { .. }));
        assert!(server.connection().is_closed());

        let err = loop {
            match client.blocking_dispatch() {
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        match err {
            Error::Protocol(error) => {
                assert_eq!(error.code, u32::from(ErrorCode::InvalidMethod));
                assert_eq!(error.object_id, calc.id());
            }
            other => panic!("expected a protocol error, got {:?}", other),
        }
        assert!(matches!(client.close_reason(), Some(Error::Protocol(_))));
    }

    #[test]
    fn test_unknown_object_is_fatal() {
        let (mut client, mut server) = pair();
        // created on the client only
        let id = client
            .create_object(&calculator::CALCULATOR_INTERFACE, 1, None)
            .unwrap();
        calculator::client::Calculator::from_id(id)
            .add(&mut client, 1, 1, None)
            .unwrap();
        client.flush().unwrap();

        let err = server.connection().blocking_dispatch().unwrap_err();
        assert!(matches!(err, Error::UnknownObject(unknown) if unknown == id));

        match client.blocking_dispatch().unwrap_err() {
            Error::Protocol(error) => {
                assert_eq!(error.code, u32::from(ErrorCode::InvalidObject));
                assert_eq!(error.object_id, DISPLAY_ID);
            }
            other => panic!("expected a protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_events_for_destroyed_objects_are_dropped() {
        let (mut client, mut server) = pair();
        let stored = Arc::new(AtomicUsize::new(0));
        let counter = stored.clone();
        let calc = calculators(
            &mut client,
            &mut server,
            2,
            2,
            Some(calculator::client::on_event(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );

        calc.destroy(&mut client).unwrap();
        client.flush().unwrap();
        // the server speaks before it has seen the destroy
        calculator::server::Calculator::from_id(calc.id())
            .stored(server.connection(), Some("late"), 4)
            .unwrap();
        server.connection().flush().unwrap();

        assert_eq!(client.blocking_dispatch().unwrap(), 1);
        assert_eq!(stored.load(Ordering::SeqCst), 0);
        assert!(!client.is_closed());

        // destroy reaches the server, delete_id comes back
        server.connection().blocking_dispatch().unwrap();
        server.connection().flush().unwrap();
        client.blocking_dispatch().unwrap();
        let reused = client
            .create_object(&calculator::CALCULATOR_INTERFACE, 1, None)
            .unwrap();
        assert_eq!(reused, calc.id());
    }

    #[test]
    fn test_fd_travels_with_its_message() {
        let (mut client, mut server) = pair();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let log = sizes.clone();
        let calc = calculators(
            &mut client,
            &mut server,
            2,
            2,
            Some(calculator::client::on_event(move |_, _, event| {
                if let calculator::client::Event::Stored { label, size } = event {
                    log.lock().unwrap().push((label, size));
                }
                Ok(())
            })),
        );

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"0123456789").unwrap();
        calc.store(&mut client, Some("blob"), vec![1, 2], file.as_fd())
            .unwrap();
        calc.store(&mut client, None, Vec::new(), file.as_fd())
            .unwrap();
        exchange(&mut client, &mut server);
        while sizes.lock().unwrap().len() < 2 {
            client.blocking_dispatch().unwrap();
        }
        assert_eq!(
            *sizes.lock().unwrap(),
            vec![(Some("blob".to_string()), 12), (None, 10)]
        );
    }

    #[test]
    fn test_send_validation() {
        let (mut client, _server) = pair();
        let err = client
            .send(Message::new(ObjectId(9), 0, Vec::new()))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownObject(_)));

        let err = client
            .send(Message::new(DISPLAY_ID, 2, Vec::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidOpcode {
                interface: "wl_display",
                opcode: 2
            }
        ));

        // get_registry with a uint where the new_id goes
        let err = client
            .send(Message::new(DISPLAY_ID, 1, vec![Argument::Uint(5)]))
            .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert!(client.out_bytes.is_empty());
        assert!(!client.is_closed());
    }

    #[test]
    fn test_close_releases_everything() {
        struct Tracker(Arc<AtomicUsize>);

        impl ObjectData for Tracker {
            fn dispatch(&self, _conn: &mut Connection, _msg: Message) -> Result<(), Error> {
                Ok(())
            }

            fn destroyed(&self, _object: ObjectId) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut client, mut server) = pair();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = client
                .create_object(
                    &calculator::CALCULATOR_INTERFACE,
                    1,
                    Some(Arc::new(Tracker(destroyed.clone()))),
                )
                .unwrap();
            ids.push(id);
        }
        assert!(client.object_info(ids[0]).is_ok());
        let closed = Arc::new(AtomicUsize::new(0));
        let flag = closed.clone();
        client.on_close(move |reason| {
            assert!(reason.is_none());
            flag.fetch_add(1, Ordering::SeqCst);
        });

        client.shutdown();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(client.object_count(), 0);
        for id in ids.into_iter().chain([DISPLAY_ID]) {
            assert!(matches!(client.object_info(id), Err(Error::UnknownObject(_))));
        }
        assert!(matches!(client.flush(), Err(Error::Closed)));

        let err = server.connection().blocking_dispatch().unwrap_err();
        assert!(matches!(err, Error::Disconnected));
        assert!(matches!(
            server.connection().close_reason(),
            Some(Error::Disconnected)
        ));
    }

    /// Transport replaying fixed chunks and recording what was sent
    struct ScriptTransport {
        incoming: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Transport for ScriptTransport {
        fn send(&mut self, bytes: &[u8], _fds: &[RawFd]) -> io::Result<usize> {
            self.sent.lock().unwrap().extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn recv(&mut self, buf: &mut [u8], _fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                None => Ok(0),
            }
        }

        fn shutdown(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn scripted(side: Side, chunks: Vec<Vec<u8>>) -> (Connection, Arc<Mutex<Vec<u8>>>) {
        init_logging();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let conn = Connection::new(
            side,
            ScriptTransport {
                incoming: chunks.into(),
                sent: sent.clone(),
            },
        );
        (conn, sent)
    }

    fn scripted_server(display: &Display, chunks: Vec<Vec<u8>>) -> (Connection, Arc<Mutex<Vec<u8>>>) {
        let (mut conn, sent) = scripted(Side::Server, chunks);
        display.attach(&mut conn).unwrap();
        (conn, sent)
    }

    #[test]
    fn test_partial_frames_wait_for_the_rest() {
        // wl_display.sync(new id 2)
        let sync = vec![1, 0, 0, 0, 0, 0, 12, 0, 2, 0, 0, 0];
        let (mut conn, sent) = scripted_server(&Display::new(), vec![sync[..5].to_vec(), sync[5..].to_vec()]);

        assert_eq!(conn.read().unwrap(), 5);
        assert_eq!(conn.dispatch_pending().unwrap(), 0);
        assert_eq!(conn.read().unwrap(), 7);
        assert_eq!(conn.dispatch_pending().unwrap(), 1);
        conn.flush().unwrap();

        // wl_callback.done(serial 1), then wl_display.delete_id(2)
        assert_eq!(
            *sent.lock().unwrap(),
            vec![2, 0, 0, 0, 0, 0, 12, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 12, 0, 2, 0, 0, 0]
        );
    }

    #[test]
    fn test_malformed_frame_reports_invalid_method() {
        let (mut conn, sent) = scripted_server(&Display::new(), vec![vec![1, 0, 0, 0, 0, 0, 6, 0]]);
        conn.read().unwrap();
        let err = conn.dispatch_pending().unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        assert!(conn.is_closed());

        let sent = sent.lock().unwrap();
        // wl_display.error(display, invalid_method, ...)
        assert_eq!(&sent[..6], &[1, 0, 0, 0, 0, 0]);
        assert_eq!(&sent[8..16], &[1, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_registry_bind_checks_the_global() {
        // get_registry(new id 2), then bind(name 7, "calculator", v1, new id 3)
        let mut frames = vec![1, 0, 0, 0, 1, 0, 12, 0, 2, 0, 0, 0];
        frames.extend_from_slice(&[2, 0, 0, 0, 0, 0, 36, 0, 7, 0, 0, 0, 11, 0, 0, 0]);
        frames.extend_from_slice(b"calculator\0\0");
        frames.extend_from_slice(&[1, 0, 0, 0, 3, 0, 0, 0]);
        let (mut conn, _sent) = scripted_server(&Display::new(), vec![frames]);

        conn.read().unwrap();
        let err = conn.dispatch_pending().unwrap_err();
        match err {
            Error::Protocol(error) => {
                assert_eq!(error.object_id, ObjectId(2));
                assert_eq!(error.code, u32::from(ErrorCode::InvalidObject));
                assert_eq!(error.message, "invalid global 7");
            }
            other => panic!("expected a protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_new_ids_sent_to_released_objects_are_tracked() {
        // calculator@2.spawned(new id 0xff000000), then calculator_result@0xff000000.value(7)
        let mut frames = vec![2, 0, 0, 0, 2, 0, 12, 0, 0, 0, 0, 0xff];
        frames.extend_from_slice(&[0, 0, 0, 0xff, 0, 0, 12, 0, 7, 0, 0, 0]);
        let (mut conn, _sent) = scripted(Side::Client, vec![frames]);

        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        let id = conn
            .create_object(
                &calculator::CALCULATOR_INTERFACE,
                2,
                Some(calculator::client::on_event(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
        calculator::client::Calculator::from_id(id)
            .destroy(&mut conn)
            .unwrap();

        conn.read().unwrap();
        assert_eq!(conn.dispatch_pending().unwrap(), 2);
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(events.load(Ordering::SeqCst), 0);

        let orphan = ObjectId(SERVER_ID_BASE);
        assert!(conn.object_info(orphan).is_err());
        assert_eq!(
            conn.objects.zombie(orphan).map(|(interface, _)| interface.name),
            Some("calculator_result")
        );
    }

    #[test]
    fn test_registry_bind_rejects_a_bad_new_id() {
        let display = Display::new();
        display
            .create_global::<calculator::server::Calculator, _>(1, |_, _, _| Ok(()))
            .unwrap();
        // get_registry(new id 2), then bind(name 1, "calculator", v1, new id 2)
        let mut frames = vec![1, 0, 0, 0, 1, 0, 12, 0, 2, 0, 0, 0];
        frames.extend_from_slice(&[2, 0, 0, 0, 0, 0, 36, 0, 1, 0, 0, 0, 11, 0, 0, 0]);
        frames.extend_from_slice(b"calculator\0\0");
        frames.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);
        let (mut conn, sent) = scripted_server(&display, vec![frames]);

        conn.read().unwrap();
        match conn.dispatch_pending().unwrap_err() {
            Error::Protocol(error) => {
                assert_eq!(error.object_id, ObjectId(2));
                assert_eq!(error.code, u32::from(ErrorCode::InvalidObject));
                assert_eq!(error.message, "invalid new id 2");
            }
            other => panic!("expected a protocol error, got {:?}", other),
        }
        assert!(conn.is_closed());

        // wl_registry.global first, wl_display.error after it
        let sent = sent.lock().unwrap();
        assert_eq!(&sent[..8], &[2, 0, 0, 0, 0, 0, 32, 0]);
        assert_eq!(&sent[32..38], &[1, 0, 0, 0, 0, 0]);
        assert_eq!(&sent[40..48], &[2, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_server_requests_without_handler_are_fatal() {
        // calculator@2.add(1, 2, new id 3)
        let frame = vec![2, 0, 0, 0, 0, 0, 20, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0];
        let (mut conn, sent) = scripted_server(&Display::new(), vec![frame]);
        conn.bind_object(ObjectId(2), &calculator::CALCULATOR_INTERFACE, 1, None)
            .unwrap();

        conn.read().unwrap();
        let err = conn.dispatch_pending().unwrap_err();
        assert!(matches!(err, Error::Handler(_)));
        assert!(conn.is_closed());

        // wl_display.error(calculator@2, implementation, ...)
        let sent = sent.lock().unwrap();
        assert_eq!(&sent[..6], &[1, 0, 0, 0, 0, 0]);
        assert_eq!(&sent[8..16], &[2, 0, 0, 0, 3, 0, 0, 0]);
    }
}
