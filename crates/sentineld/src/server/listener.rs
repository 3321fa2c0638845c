//! TCP listener running the accept loop on a background thread.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::mem;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use super::SERVER_TARGET;
use super::pipeline::ConnectionHandler;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Errors surfaced while binding or running the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The host did not resolve.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host as configured.
        host: String,
        /// Port as configured.
        port: u16,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// The host resolved to nothing.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host as configured.
        host: String,
        /// Port as configured.
        port: u16,
    },
    /// Binding failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Resolved address.
        addr: SocketAddr,
        /// Bind failure.
        #[source]
        source: io::Error,
    },
    /// The socket could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}

/// A bound, not yet accepting, TCP listener.
#[derive(Debug)]
pub(crate) struct SocketListener {
    listener: TcpListener,
    address: SocketAddr,
}

impl SocketListener {
    pub(crate) fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let listener = bind_tcp(host, port)?;
        let address = listener
            .local_addr()
            .map_err(|source| ListenerError::NonBlocking { source })?;
        Ok(Self { listener, address })
    }

    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Starts accepting. Once stopped, the accept thread waits up to
    /// `drain_timeout` for open connections before it exits.
    pub(crate) fn start(
        self,
        handler: Arc<ConnectionHandler>,
        drain_timeout: Duration,
    ) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            let connections = run_accept_loop(&self, &shutdown_flag, &handler);
            drain(connections, drain_timeout);
        });
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        self.handle
            .take()
            .map_or(Ok(()), |handle| handle.join().map_err(|_| ListenerError::ThreadPanic))
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: &SocketListener,
    shutdown: &AtomicBool,
    handler: &Arc<ConnectionHandler>,
) -> Vec<JoinHandle<()>> {
    info!(
        target: SERVER_TARGET,
        address = %listener.address,
        "socket listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    let mut connections = Vec::new();
    while !shutdown.load(Ordering::SeqCst) {
        match accept_connection(&listener.listener) {
            Ok(Some(stream)) => {
                last_error = None;
                let connection = Arc::clone(handler);
                reap(&mut connections);
                connections.push(thread::spawn(move || connection.handle(stream)));
            }
            Ok(None) => thread::sleep(ACCEPT_BACKOFF),
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: SERVER_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    info!(
        target: SERVER_TARGET,
        address = %listener.address,
        "socket listener stopped"
    );
    connections
}

/// Joins finished connection threads and keeps the rest.
fn reap(connections: &mut Vec<JoinHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        mem::take(connections).into_iter().partition(JoinHandle::is_finished);
    *connections = running;
    for handle in finished {
        if handle.join().is_err() {
            warn!(target: SERVER_TARGET, "connection thread panicked");
        }
    }
}

/// Waits for open connections until `timeout` passes.
fn drain(mut connections: Vec<JoinHandle<()>>, timeout: Duration) {
    reap(&mut connections);
    if connections.is_empty() {
        return;
    }
    info!(
        target: SERVER_TARGET,
        connections = connections.len(),
        "waiting for open connections"
    );
    let deadline = Instant::now().checked_add(timeout);
    while !connections.is_empty() && deadline.is_none_or(|deadline| Instant::now() < deadline) {
        thread::sleep(ACCEPT_BACKOFF);
        reap(&mut connections);
    }
    if !connections.is_empty() {
        warn!(
            target: SERVER_TARGET,
            connections = connections.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "connections still open at the shutdown deadline"
        );
    }
}

fn accept_connection(listener: &TcpListener) -> io::Result<Option<TcpStream>> {
    match listener.accept() {
        Ok((stream, _)) => {
            stream.set_nonblocking(false)?;
            Ok(Some(stream))
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::mpsc;

    #[rstest]
    fn binds_an_ephemeral_port() {
        let listener = SocketListener::bind("127.0.0.1", 0).expect("bind");
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[rstest]
    fn reports_a_taken_port() {
        let first = SocketListener::bind("127.0.0.1", 0).expect("bind");
        let port = first.local_addr().port();

        let error = SocketListener::bind("127.0.0.1", port).expect_err("port in use");

        assert!(matches!(error, ListenerError::BindTcp { .. }));
    }

    #[rstest]
    fn drain_waits_for_running_connections() {
        let (release, gate) = mpsc::channel::<()>();
        let connection = thread::spawn(move || {
            gate.recv().ok();
        });
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            release.send(()).ok();
        });

        let started = Instant::now();
        drain(vec![connection], Duration::from_secs(5));

        assert!(started.elapsed() >= Duration::from_millis(100));
        releaser.join().expect("join releaser");
    }

    #[rstest]
    fn drain_gives_up_at_the_deadline() {
        let (release, gate) = mpsc::channel::<()>();
        let connection = thread::spawn(move || {
            gate.recv().ok();
        });

        let started = Instant::now();
        drain(vec![connection], Duration::from_millis(100));

        assert!(started.elapsed() < Duration::from_secs(5));
        release.send(()).ok();
    }
}
