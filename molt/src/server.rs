//! The process supervisor: state machine, accept loop, and drain.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::handoff::{self, RestartGuard};
use crate::listener::Listener;
use crate::pidfile;
use crate::signal::{self, Event};
use crate::state::{Lifecycle, State};
use crate::tls::TlsDecorator;
use crate::tracker::ConnTracker;

/// Fixed maximum duration of the drain phase after shutdown begins.
pub const DRAIN_GRACE: Duration = Duration::from_secs(60);

/// Pause after a failed accept. Persistent failures such as fd
/// exhaustion would otherwise spin the supervisor loop hot.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The server's sole request handler.
///
/// Routing, templating, rewrites, and compression all live behind this
/// seam; the core only accepts connections and hands them over.
pub trait Application: Send + Sync + 'static {
    /// Serves one accepted connection to completion.
    fn handle(&self, conn: Conn) -> impl Future<Output = io::Result<()>> + Send;
}

/// An accepted connection, TLS-terminated when the server is configured
/// for it. Implements [`AsyncRead`] + [`AsyncWrite`].
pub struct Conn {
    /// The underlying stream.
    stream: ConnStream,
    /// Remote peer address.
    peer: SocketAddr,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("peer", &self.peer)
            .field("tls", &matches!(self.stream, ConnStream::Tls(_)))
            .finish_non_exhaustive()
    }
}

/// Plaintext or TLS-decorated stream.
enum ConnStream {
    /// Direct TCP stream.
    Plain(TcpStream),
    /// Handshaken TLS stream.
    Tls(Box<TlsStream<TcpStream>>),
}

impl Conn {
    /// Wraps a plaintext stream.
    pub(crate) fn plain(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: ConnStream::Plain(stream),
            peer,
        }
    }

    /// Wraps a TLS-decorated stream.
    pub(crate) fn tls(stream: TlsStream<TcpStream>, peer: SocketAddr) -> Self {
        Self {
            stream: ConnStream::Tls(Box::new(stream)),
            peer,
        }
    }

    /// Remote peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            ConnStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().stream {
            ConnStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            ConnStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().stream {
            ConnStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ConnStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Lifecycle state shared between the supervisor loop, connection tasks,
/// and external observers. One explicit object, no process globals.
#[derive(Debug, Default)]
struct ServerContext {
    /// Current lifecycle state.
    lifecycle: Lifecycle,
    /// In-flight connection counter.
    tracker: Arc<ConnTracker>,
    /// Mutual exclusion for handoff attempts.
    restart_guard: RestartGuard,
}

/// Cloneable observer of a running server's lifecycle.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    /// Shared context of the observed server.
    ctx: Arc<ServerContext>,
}

impl ServerHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.ctx.lifecycle.current()
    }

    /// Number of in-flight connections.
    pub fn in_flight(&self) -> usize {
        self.ctx.tracker.count()
    }

    /// Whether a handoff is currently in progress.
    pub fn handoff_in_progress(&self) -> bool {
        self.ctx.restart_guard.is_held()
    }
}

/// An HTTP(S) server with zero-downtime handoff and graceful shutdown.
///
/// Construction validates the configuration, binds the listening socket
/// (or adopts an inherited one on a handoff), and loads TLS material —
/// all failures are synchronous and no partial server is produced.
#[derive(Debug)]
pub struct Server<A: Application> {
    /// Validated configuration.
    config: ServerConfig,
    /// The one listening socket.
    listener: Listener,
    /// Per-connection TLS handshaker, when configured.
    tls: Option<TlsDecorator>,
    /// The request handler.
    app: Arc<A>,
    /// Shared lifecycle state.
    ctx: Arc<ServerContext>,
    /// Whether this process adopted an inherited descriptor.
    is_successor: bool,
}

impl<A: Application> Server<A> {
    /// Builds a server from `config` with `app` as the request handler.
    ///
    /// If a listening descriptor was inherited from a parent during a
    /// handoff, it is adopted without a second bind; otherwise a fresh
    /// socket is bound on the configured address. Must be called within
    /// a tokio runtime.
    pub fn new(config: ServerConfig, app: A) -> Result<Self> {
        let config = config.validate()?;

        let (listener, is_successor) = match Listener::from_inherited()? {
            Some(inherited) => (inherited, true),
            None => (Listener::bind(&config.addr)?, false),
        };

        let tls = if config.tls_enabled() {
            Some(TlsDecorator::from_pem(&config.tls_cert, &config.tls_key)?)
        } else {
            None
        };

        Ok(Self {
            config,
            listener,
            tls,
            app: Arc::new(app),
            ctx: Arc::new(ServerContext::default()),
            is_successor,
        })
    }

    /// The validated configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The bound local address (useful with an ephemeral port).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Whether this process was spawned as a handoff successor.
    pub fn is_successor(&self) -> bool {
        self.is_successor
    }

    /// Returns an observer handle, valid across [`Server::run`].
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Runs the server with triggers taken from OS signals.
    ///
    /// Returns after the drain completes (or its grace period elapses)
    /// following a termination signal.
    pub async fn run(self) -> Result<()> {
        let events = signal::listen()?;
        self.run_with_events(events).await
    }

    /// Runs the server, draining `events` strictly one at a time.
    ///
    /// This is [`Server::run`] with the trigger source made explicit, for
    /// embedding under an outer supervisor or driving from tests.
    pub async fn run_with_events(self, mut events: mpsc::Receiver<Event>) -> Result<()> {
        let Self {
            config,
            listener,
            tls,
            app,
            ctx,
            is_successor,
        } = self;

        pidfile::record(&config.pid_file)?;

        ctx.lifecycle.advance(State::Running);
        if is_successor {
            handoff::notify_parent();
        }
        let addr = listener.local_addr()?;
        info!(%addr, pid = std::process::id(), successor = is_successor, "server started");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Restart) => Self::handle_restart(&ctx, &listener),
                    Some(Event::Shutdown) | None => {
                        ctx.lifecycle.advance(State::ShuttingDown);
                        info!("shutdown begun; closing listener");
                        break;
                    }
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => Self::dispatch(&ctx, &app, tls.clone(), stream, peer),
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
            }
        }

        // Closing the socket here is what refuses new connection attempts;
        // already-accepted connections are unaffected.
        drop(listener);

        info!(in_flight = ctx.tracker.count(), "waiting for connections to finish");
        if !ctx.tracker.drain(DRAIN_GRACE).await {
            warn!(
                remaining = ctx.tracker.count(),
                "grace period elapsed; forcing shutdown"
            );
        }
        ctx.lifecycle.advance(State::Terminate);
        info!("server shut down");
        Ok(())
    }

    /// Handles one restart trigger under the restart guard.
    ///
    /// After a successful spawn the guard stays held: the parent takes no
    /// further action until the successor signals it to terminate. On
    /// spawn failure the guard is released and serving continues.
    fn handle_restart(ctx: &ServerContext, listener: &Listener) {
        if !ctx.restart_guard.try_acquire() {
            debug!("handoff already in progress; ignoring restart trigger");
            return;
        }
        info!("restart trigger received; spawning successor");
        match handoff::spawn_successor(listener) {
            Ok(pid) => info!(successor_pid = pid, "successor spawned; awaiting takeover"),
            Err(e) => {
                error!(error = %e, "handoff failed; continuing to serve");
                ctx.restart_guard.release();
            }
        }
    }

    /// Hands an accepted stream to the application on its own task.
    fn dispatch(
        ctx: &ServerContext,
        app: &Arc<A>,
        tls: Option<TlsDecorator>,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        let guard = ctx.tracker.guard();
        let app = Arc::clone(app);
        tokio::spawn(async move {
            let _guard = guard;
            let conn = match tls {
                Some(decorator) => match decorator.accept(stream).await {
                    Ok(s) => Conn::tls(s, peer),
                    Err(e) => {
                        debug!(%peer, error = %e, "TLS handshake failed");
                        return;
                    }
                },
                None => Conn::plain(stream, peer),
            };
            if let Err(e) = app.handle(conn).await {
                debug!(%peer, error = %e, "connection handler error");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream as ClientStream;

    use super::*;

    struct Hello;

    impl Application for Hello {
        fn handle(&self, mut conn: Conn) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                conn.write_all(b"hello\n").await?;
                conn.shutdown().await
            }
        }
    }

    struct EchoOnce;

    impl Application for EchoOnce {
        fn handle(&self, mut conn: Conn) -> impl Future<Output = io::Result<()>> + Send {
            async move {
                let mut byte = [0u8; 1];
                conn.read_exact(&mut byte).await?;
                conn.write_all(&byte).await?;
                conn.shutdown().await
            }
        }
    }

    fn test_config(pid_path: &Path) -> ServerConfig {
        ServerConfig {
            addr: "127.0.0.1:0".into(),
            pid_file: pid_path.to_str().unwrap().into(),
            ..ServerConfig::default()
        }
    }

    /// [`Server::new`] reads the inherited-descriptor variable, so it
    /// serializes with the listener tests that set it.
    fn new_server<A: Application>(config: ServerConfig, app: A) -> Server<A> {
        let _env = crate::listener::INHERIT_ENV_LOCK.lock().unwrap();
        Server::new(config, app).unwrap()
    }

    async fn wait_for_state(handle: &ServerHandle, want: State) {
        for _ in 0..200 {
            if handle.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("state {want:?} not reached (at {:?})", handle.state());
    }

    #[tokio::test]
    async fn cold_start_serves_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("server.pid");

        let server = new_server(test_config(&pid_path), Hello);
        assert!(!server.is_successor());
        let addr = server.local_addr().unwrap();
        let handle = server.handle();

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(server.run_with_events(rx));

        wait_for_state(&handle, State::Running).await;
        assert_eq!(
            std::fs::read_to_string(&pid_path).unwrap(),
            std::process::id().to_string()
        );

        let mut client = ClientStream::connect(addr).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello\n");

        tx.send(Event::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(handle.state(), State::Terminate);
        assert!(
            ClientStream::connect(addr).await.is_err(),
            "closed listener must refuse new connections"
        );
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("server.pid");

        let server = new_server(test_config(&pid_path), EchoOnce);
        let addr = server.local_addr().unwrap();
        let handle = server.handle();

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(server.run_with_events(rx));
        wait_for_state(&handle, State::Running).await;

        // Open a connection and wait for it to be accepted.
        let mut client = ClientStream::connect(addr).await.unwrap();
        for _ in 0..200 {
            if handle.in_flight() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.in_flight(), 1);

        tx.send(Event::Shutdown).await.unwrap();
        wait_for_state(&handle, State::ShuttingDown).await;

        // The in-flight connection still completes during the drain.
        client.write_all(b"x").await.unwrap();
        let mut byte = [0u8; 1];
        client.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"x");
        drop(client);

        task.await.unwrap().unwrap();
        assert_eq!(handle.state(), State::Terminate);
        assert_eq!(handle.in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_after_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("server.pid");

        let server = new_server(test_config(&pid_path), Hello);
        let handle = server.handle();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(server.run_with_events(rx));
        wait_for_state(&handle, State::Running).await;

        tx.send(Event::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(handle.state(), State::Terminate);

        // A late trigger has nothing left to act on and nothing regresses.
        let _ = tx.send(Event::Shutdown).await;
        assert_eq!(handle.state(), State::Terminate);
    }

    #[tokio::test]
    async fn restart_trigger_while_handoff_in_progress_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("server.pid");

        let server = new_server(test_config(&pid_path), Hello);
        let addr = server.local_addr().unwrap();
        let handle = server.handle();

        // Simulate an in-progress handoff before any trigger arrives.
        assert!(server.ctx.restart_guard.try_acquire());

        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(server.run_with_events(rx));
        wait_for_state(&handle, State::Running).await;

        tx.send(Event::Restart).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No spawn happened, the server keeps serving.
        assert_eq!(handle.state(), State::Running);
        assert!(handle.handoff_in_progress());
        let mut client = ClientStream::connect(addr).await.unwrap();
        let mut out = String::new();
        client.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello\n");

        tx.send(Event::Shutdown).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bad_pid_path_fails_run() {
        let config = ServerConfig {
            addr: "127.0.0.1:0".into(),
            pid_file: "/nonexistent-dir/server.pid".into(),
            ..ServerConfig::default()
        };
        let server = new_server(config, Hello);
        let (_tx, rx) = mpsc::channel(4);
        let err = server.run_with_events(rx).await.unwrap_err();
        assert!(matches!(err, crate::Error::PidFile(_)));
    }
}
