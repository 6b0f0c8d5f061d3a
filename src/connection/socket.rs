//! Unix socket transport
//!
//! Bytes go through `sendmsg`/`recvmsg`; file descriptors ride along as
//! `SCM_RIGHTS` control messages.

use nix::cmsg_space;
use nix::errno::Errno;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::collections::VecDeque;
use std::env;
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Descriptors accepted per `recvmsg` call
const MAX_FDS_IN: usize = 28;

/// Number of `wayland-N` names tried by [`Listener::bind_auto`]
const AUTO_SOCKETS: u32 = 32;

/// Byte and descriptor transport under a connection
pub trait Transport: Send {
    /// Write some of `bytes`, attaching `fds` to the first byte written.
    /// Returns how many bytes went out; the descriptors are sent whenever
    /// the count is non-zero.
    fn send(&mut self, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize>;

    /// Read into `buf`, appending received descriptors to `fds`.
    /// Zero means the peer closed its end.
    fn recv(&mut self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize>;

    fn shutdown(&mut self) -> io::Result<()>;
}

/// Identity of the process on the other end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Transport over a connected Unix stream socket
#[derive(Debug)]
pub struct UnixTransport {
    stream: UnixStream,
}

impl UnixTransport {
    pub fn new(stream: UnixStream) -> Self {
        UnixTransport { stream }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    /// Credentials of the peer process
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn peer_credentials(&self) -> io::Result<Credentials> {
        use nix::sys::socket::{getsockopt, sockopt};
        let creds = getsockopt(&self.stream, sockopt::PeerCredentials)?;
        Ok(Credentials {
            pid: creds.pid(),
            uid: creds.uid(),
            gid: creds.gid(),
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub fn peer_credentials(&self) -> io::Result<Credentials> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "peer credentials are not available on this platform",
        ))
    }
}

fn send_flags() -> MsgFlags {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        MsgFlags::MSG_NOSIGNAL
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        MsgFlags::empty()
    }
}

fn recv_flags() -> MsgFlags {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        MsgFlags::MSG_CMSG_CLOEXEC
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        MsgFlags::empty()
    }
}

impl Transport for UnixTransport {
    fn send(&mut self, bytes: &[u8], fds: &[RawFd]) -> io::Result<usize> {
        let iov = [IoSlice::new(bytes)];
        let rights = [ControlMessage::ScmRights(fds)];
        let cmsgs: &[ControlMessage] = if fds.is_empty() { &[] } else { &rights };
        loop {
            match sendmsg::<()>(self.stream.as_raw_fd(), &iov, cmsgs, send_flags(), None) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        let mut cmsg_buffer = cmsg_space!([RawFd; MAX_FDS_IN]);
        let mut iov = [IoSliceMut::new(buf)];
        let msg = loop {
            match recvmsg::<()>(
                self.stream.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                recv_flags(),
            ) {
                Ok(msg) => break msg,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        };
        let received = msg.bytes;
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                for raw in raw_fds {
                    // SAFETY: the kernel just installed this descriptor for us
                    // and nothing else refers to it.
                    fds.push_back(unsafe { OwnedFd::from_raw_fd(raw) });
                }
            }
        }
        Ok(received)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(std::net::Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// `$XDG_RUNTIME_DIR`
pub fn runtime_dir() -> io::Result<PathBuf> {
    match env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Err(io::Error::new(
            io::ErrorKind::NotFound,
            "XDG_RUNTIME_DIR is not set",
        )),
    }
}

/// Resolve a display name the way `WAYLAND_DISPLAY` is interpreted:
/// absolute paths are used as is, anything else is relative to the
/// runtime directory.
pub fn socket_path(name: &str) -> io::Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(runtime_dir()?.join(name))
    }
}

/// Listening socket that removes its file when dropped
#[derive(Debug)]
pub struct Listener {
    listener: UnixListener,
    path: PathBuf,
}

impl Listener {
    /// Bind at `path`, replacing a stale socket file left by a dead server
    pub fn bind(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} is in use by a running server", path.display()),
                ));
            }
            log::debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        log::info!("Listening on {}", path.display());
        Ok(Listener {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Bind a display name, see [`socket_path`]
    pub fn bind_name(name: &str) -> io::Result<Self> {
        Self::bind(socket_path(name)?)
    }

    /// Bind the first free `wayland-N` socket in the runtime directory
    pub fn bind_auto() -> io::Result<Self> {
        let dir = runtime_dir()?;
        for n in 0..AUTO_SOCKETS {
            match Self::bind(dir.join(format!("wayland-{}", n))) {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "no free wayland socket name",
        ))
    }

    pub fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept()?;
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of the socket, suitable for `WAYLAND_DISPLAY`
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[test]
    fn test_bytes_and_fds_cross_a_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = UnixTransport::new(a);
        let mut right = UnixTransport::new(b);

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"payload").unwrap();

        assert_eq!(left.send(b"abcd", &[file.as_raw_fd()]).unwrap(), 4);
        drop(file);

        let mut buf = [0u8; 16];
        let mut fds = VecDeque::new();
        let n = right.recv(&mut buf, &mut fds).unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert_eq!(fds.len(), 1);

        let mut received = std::fs::File::from(fds.pop_front().unwrap());
        received.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        received.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "payload");
    }

    #[test]
    fn test_eof_after_shutdown() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut left = UnixTransport::new(a);
        let mut right = UnixTransport::new(b);
        left.shutdown().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(right.recv(&mut buf, &mut VecDeque::new()).unwrap(), 0);
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    #[test]
    fn test_peer_credentials() {
        let (a, _b) = UnixStream::pair().unwrap();
        let creds = UnixTransport::new(a).peer_credentials().unwrap();
        assert_eq!(creds.pid as u32, std::process::id());
    }

    #[test]
    fn test_listener_replaces_stale_socket_and_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayland-test");
        {
            let listener = Listener::bind(&path).unwrap();
            assert_eq!(listener.name(), Some("wayland-test"));

            // a live server owns the name
            let err = Listener::bind(&path).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::AddrInUse);

            let _client = UnixStream::connect(&path).unwrap();
            listener.accept().unwrap();
        }
        assert!(!path.exists());

        // leftover file from a crashed server
        let stale = UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());
        let listener = Listener::bind(&path).unwrap();
        assert_eq!(listener.path(), path.as_path());
    }

    #[test]
    fn test_socket_path() {
        assert_eq!(
            socket_path("/tmp/display").unwrap(),
            PathBuf::from("/tmp/display")
        );
    }
}
