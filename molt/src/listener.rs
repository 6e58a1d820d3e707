//! Listening socket ownership, inheritance, and descriptor export.
//!
//! A [`Listener`] is bound at most once per server instance. For a
//! handoff, [`Listener::export_fd`] duplicates the descriptor without
//! `FD_CLOEXEC` so it survives `exec` into the successor, which rebuilds
//! its listener from the inherited descriptor via
//! [`Listener::from_inherited`] — the import path never re-binds.

#![allow(unsafe_code)]

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};

/// Name of the environment variable carrying the inherited listener
/// descriptor to a spawned successor.
pub const ENV_LISTEN_FD: &str = "MOLT_LISTEN_FD";

/// Owner of the one OS-level listening socket of a server instance.
///
/// Dropping the listener closes the socket; a blocked accept in the
/// supervisor loop is abandoned structurally (the loop exits before the
/// drop) and subsequent connection attempts are refused by the OS.
#[derive(Debug)]
pub struct Listener {
    /// The nonblocking socket registered with the tokio reactor.
    inner: TcpListener,
}

impl Listener {
    /// Binds a fresh listening socket on `addr` (`host:port`).
    ///
    /// Must be called within a tokio runtime. An invalid or in-use
    /// address produces [`Error::Bind`].
    pub fn bind(addr: &str) -> Result<Self> {
        let std_listener = std::net::TcpListener::bind(addr).map_err(|e| Error::Bind {
            addr: addr.to_owned(),
            source: e,
        })?;
        Self::from_std(std_listener)
    }

    /// Rebuilds a listener from the descriptor inherited through
    /// [`ENV_LISTEN_FD`], if present.
    ///
    /// Returns `Ok(None)` on a cold start (variable absent). The socket
    /// is already bound by the parent; no bind call is made. On adoption
    /// the variable is removed so it cannot leak to spawned children or
    /// feed a second adoption.
    pub fn from_inherited() -> Result<Option<Self>> {
        let Ok(fd_str) = std::env::var(ENV_LISTEN_FD) else {
            return Ok(None);
        };
        let fd: RawFd = fd_str
            .parse()
            .map_err(|_| Error::Config(format!("invalid {ENV_LISTEN_FD} value: {fd_str}")))?;
        // The variable described one descriptor for one adoption. Left in
        // place it would leak a stale fd number to every child the
        // application spawns, and a second adoption in this process would
        // double-own the descriptor.
        // SAFETY: adoption runs during startup, before the application
        // spawns threads that touch the environment.
        unsafe { std::env::remove_var(ENV_LISTEN_FD) };
        Self::from_fd(fd).map(Some)
    }

    /// Adopts ownership of an already-bound listening descriptor.
    fn from_fd(fd: RawFd) -> Result<Self> {
        // SAFETY: the fd was duplicated by the parent specifically for this
        // process and left open across exec; nothing else owns it here.
        let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        Self::from_std(std_listener)
    }

    /// Registers a std listener with the tokio reactor.
    fn from_std(std_listener: std::net::TcpListener) -> Result<Self> {
        std_listener.set_nonblocking(true)?;
        Ok(Self {
            inner: TcpListener::from_std(std_listener)?,
        })
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accepts one connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    /// Duplicates the listening descriptor for inheritance by a child.
    ///
    /// The duplicate is created with `dup(2)`, which leaves `FD_CLOEXEC`
    /// clear on the copy, so it survives `exec`. The original descriptor
    /// is unaffected and this listener keeps accepting.
    pub fn export_fd(&self) -> io::Result<OwnedFd> {
        // SAFETY: dup() on a valid descriptor; the listener outlives the call.
        let dup = unsafe { libc::dup(self.inner.as_raw_fd()) };
        if dup == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: dup is a freshly created, valid descriptor we now own.
        Ok(unsafe { OwnedFd::from_raw_fd(dup) })
    }
}

/// Serializes tests that read or write [`ENV_LISTEN_FD`]; the
/// environment is process-global and [`Listener::from_inherited`] both
/// reads and clears it.
#[cfg(test)]
pub(crate) static INHERIT_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use std::os::unix::io::IntoRawFd;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let l = Listener::bind("127.0.0.1:0").unwrap();
        let addr = l.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn bind_invalid_addr_fails() {
        let err = Listener::bind("not-an-address").unwrap_err();
        assert!(matches!(err, Error::Bind { .. }));
    }

    #[tokio::test]
    async fn exported_fd_accepts_without_rebind() {
        let original = Listener::bind("127.0.0.1:0").unwrap();
        let addr = original.local_addr().unwrap();

        let exported = original.export_fd().unwrap();
        // Simulated successor: rebuild from the raw descriptor, no bind.
        let inherited = Listener::from_fd(exported.into_raw_fd()).unwrap();
        assert_eq!(inherited.local_addr().unwrap(), addr);

        // Original closes, as the parent does after a handoff.
        drop(original);

        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            s.write_all(b"ping").await.unwrap();
        });
        let (mut conn, _) = inherited.accept().await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn adoption_clears_inherited_fd_variable() {
        let _env = INHERIT_ENV_LOCK.lock().unwrap();
        let original = Listener::bind("127.0.0.1:0").unwrap();
        let addr = original.local_addr().unwrap();
        let exported = original.export_fd().unwrap();

        // SAFETY: serialized with every other environment reader by the
        // lock held above.
        unsafe { std::env::set_var(ENV_LISTEN_FD, exported.into_raw_fd().to_string()) };
        let inherited = Listener::from_inherited().unwrap().expect("fd advertised");

        assert_eq!(inherited.local_addr().unwrap(), addr);
        assert!(
            std::env::var(ENV_LISTEN_FD).is_err(),
            "adopted descriptor number must not leak to spawned children"
        );
    }

    #[tokio::test]
    async fn from_inherited_absent_is_cold_start() {
        let _env = INHERIT_ENV_LOCK.lock().unwrap();
        assert!(Listener::from_inherited().unwrap().is_none());
    }
}
