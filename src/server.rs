//! Single-threaded, poll-driven transfer server
//!
//! One pass = one multiplexer wait followed by a dispatch over the listener
//! and then every registered connection in registration order. Connections
//! accepted during a pass are not serviced until a later wait reports them.

use crate::connection::{Connection, DisconnectReason, State};
use crate::logger::{Logger, NoopLogger};
use crate::poll::{Interest, Poller, Waker};
use crate::protocol::{CHUNK_SIZE, DEFAULT_PORT, DEFAULT_QUEUE};
use crate::registry::{Cursor, Registry};
use crate::sys;
use anyhow::{Context, Result};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub queue: i32,
    /// Multiplexer wait bound; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Directory bare file names are resolved against.
    pub root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            queue: DEFAULT_QUEUE,
            timeout: None,
            root: PathBuf::from("."),
        }
    }
}

/// Termination request flag. Safe to set from any thread; the event loop
/// samples it once at the end of every pass. Setting it also wakes a wait
/// that would otherwise block indefinitely.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    fn new() -> io::Result<Self> {
        Ok(ShutdownHandle {
            requested: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Waker::new()?),
        })
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.waker.wake();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Poll set layout: listener, shutdown waker, then the registry in order.
const LISTENER_SLOT: usize = 0;
const WAKER_SLOT: usize = 1;
const FIRST_CONN_SLOT: usize = 2;

pub struct Server {
    // Field order matters: connections drop before the listener.
    registry: Registry<Connection<TcpStream>>,
    listener: TcpListener,
    poller: Poller,
    scratch: Vec<u8>,
    root: PathBuf,
    timeout: Option<Duration>,
    shutdown: ShutdownHandle,
    next_token: u64,
    logger: Box<dyn Logger>,
}

impl Server {
    /// Bind and listen. Any failure here is fatal to the server.
    pub fn start(config: ServerConfig) -> Result<Self> {
        if !config.root.is_dir() {
            anyhow::bail!("root is not a directory: {}", config.root.display());
        }
        let listener = sys::bind_listener(&config.host, config.port, config.queue)
            .with_context(|| format!("start listening on {}:{}", config.host, config.port))?;
        let addr = listener.local_addr().context("query listening address")?;
        info!(%addr, root = %config.root.display(), queue = config.queue, "listening");
        let shutdown = ShutdownHandle::new().context("create shutdown waker")?;

        Ok(Server {
            registry: Registry::new(),
            listener,
            poller: Poller::new(),
            scratch: vec![0u8; CHUNK_SIZE],
            root: config.root,
            timeout: config.timeout,
            shutdown,
            next_token: 1,
            logger: Box::new(NoopLogger),
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn Logger>) -> Self {
        if let Ok(addr) = self.listener.local_addr() {
            logger.started(addr);
        }
        self.logger = logger;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Loop until a termination request is seen, then tear everything down.
    pub fn run(mut self) -> Result<()> {
        let timeout = self.timeout;
        while self.run_one_pass(timeout)? {}
        self.stop();
        Ok(())
    }

    /// One wait + dispatch pass. Returns `false` once termination has been
    /// requested. Only a multiplexer failure is an error; everything that
    /// goes wrong on a single connection just closes that connection.
    pub fn run_one_pass(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let sources = [
            (self.listener.as_raw_fd(), Interest::Readable),
            (self.shutdown.waker.as_raw_fd(), Interest::Readable),
        ];
        let sources = sources.into_iter().chain(self.registry.sources());
        let ready = self.poller.wait(sources, timeout).context("poll")?;

        if ready > 0 {
            if self.poller.readiness(WAKER_SLOT).is_readable() {
                debug!("woken for shutdown");
                self.shutdown.waker.drain();
            }
            for (i, entry) in self.registry.iter_mut().enumerate() {
                entry.ready = self.poller.readiness(FIRST_CONN_SLOT + i);
            }
            if self.poller.readiness(LISTENER_SLOT).is_readable() {
                self.on_accept();
            }
            self.dispatch();
        }

        Ok(!self.shutdown.is_requested())
    }

    fn on_accept(&mut self) {
        let (stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => return,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "dropping client: cannot make socket non-blocking");
            return;
        }
        let token = self.next_token;
        self.next_token += 1;
        info!(token, %peer, "accepted client");
        self.logger.accepted(token, peer);
        self.registry.insert(Interest::Readable, Connection::new(token, stream, peer));
    }

    fn dispatch(&mut self) {
        let mut cursor = Cursor::start();
        while let Some(entry) = self.registry.get_mut(cursor) {
            let ready = entry.ready;
            let conn = &mut entry.conn;
            let was_waiting = matches!(conn.state(), State::Waiting(_));

            let outcome = if ready.is_hung_up() {
                Err(DisconnectReason::HungUp)
            } else if ready.is_errored() {
                Err(DisconnectReason::SocketError)
            } else if was_waiting {
                if ready.is_readable() {
                    conn.on_header(&self.root)
                } else {
                    Ok(())
                }
            } else {
                // Past the header, interest tells uploads and downloads apart.
                match conn.interest() {
                    Interest::Readable if ready.is_readable() => conn.on_upload(&mut self.scratch),
                    Interest::Writable if ready.is_writable() => conn.on_download(&mut self.scratch),
                    _ => Ok(()),
                }
            };

            match outcome {
                Ok(()) => {
                    if was_waiting {
                        if let (Some(command), Some(file)) = (conn.command(), conn.file_name()) {
                            self.logger.header(conn.token(), command, file);
                        }
                    }
                    entry.interest = entry.conn.interest();
                    cursor = cursor.next();
                }
                Err(reason) => cursor = self.disconnect(cursor, reason),
            }
        }
    }

    /// Drop the connection under `cursor` (closing its socket and file) and
    /// return the cursor that continues the pass.
    fn disconnect(&mut self, cursor: Cursor, reason: DisconnectReason) -> Cursor {
        let Some((entry, next)) = self.registry.remove(cursor) else {
            return cursor;
        };
        close(self.logger.as_ref(), entry.conn, &reason);
        next
    }

    /// Close every connection in registry order, then the listener.
    pub fn stop(mut self) {
        let count = self.registry.len();
        info!(connections = count, "stopping server");
        for entry in self.registry.drain() {
            close(self.logger.as_ref(), entry.conn, &DisconnectReason::Shutdown);
        }
        self.logger.stopped(count);
        debug!("closing listener");
        drop(self.listener);
    }
}

/// Log and journal the end of `conn`, then drop it (socket and file).
fn close(logger: &dyn Logger, conn: Connection<TcpStream>, reason: &DisconnectReason) {
    info!(
        token = conn.token(),
        peer = %conn.peer(),
        state = conn.state().name(),
        bytes = conn.bytes(),
        %reason,
        "disconnecting client"
    );
    logger.disconnected(conn.token(), conn.peer(), conn.bytes(), &reason.to_string());
}
