//! Accept loop shared by every TCP listener in the crate

use crate::pool::WorkerPool;

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns a listening socket and the connections it has handed out.
///
/// The accept loop takes the listener out and closes it when it returns.
/// `stop` ends that loop and shuts the read half of every live connection,
/// so sessions finish their current command and then see end-of-stream.
#[derive(Debug)]
pub struct Acceptor {
    name: &'static str,
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    stopping: AtomicBool,
    next_connection: AtomicU64,
    connections: Mutex<HashMap<u64, TcpStream>>,
}

impl Acceptor {
    pub fn new(name: &'static str, listener: TcpListener) -> io::Result<Arc<Self>> {
        let local_addr = listener.local_addr()?;
        Ok(Arc::new(Self {
            name,
            listener: Mutex::new(Some(listener)),
            local_addr,
            stopping: AtomicBool::new(false),
            next_connection: AtomicU64::new(0),
            connections: Mutex::new(HashMap::new()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Number of connections currently being served or waiting for a worker
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Accept connections until `stop` is called, handing each one to `pool`.
    ///
    /// The listening socket is closed on return. Fails if the loop has
    /// already been started, or when accepting fails for another reason.
    pub fn run<H>(self: &Arc<Self>, pool: &WorkerPool, handler: Arc<H>) -> io::Result<()>
    where
        H: Fn(TcpStream) + Send + Sync + 'static,
    {
        let listener = self.take_listener()?;
        self.accept_loop(listener, pool, handler)
    }

    fn take_listener(&self) -> io::Result<TcpListener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} accept loop already started", self.name),
                )
            })
    }

    fn accept_loop<H>(
        self: &Arc<Self>,
        listener: TcpListener,
        pool: &WorkerPool,
        handler: Arc<H>,
    ) -> io::Result<()>
    where
        H: Fn(TcpStream) + Send + Sync + 'static,
    {
        info!(listener = self.name, addr = %self.local_addr, "accepting connections");

        for stream in listener.incoming() {
            if self.is_stopping() {
                break;
            }

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!(listener = self.name, error = %e, "accept failed");
                    return Err(e);
                }
            };

            let id = self.track(&stream);
            let acceptor = Arc::clone(self);
            let handler = Arc::clone(&handler);
            pool.execute(move || {
                handler(stream);
                if let Some(id) = id {
                    acceptor.untrack(id);
                }
            });
        }

        info!(listener = self.name, "accept loop finished");
        Ok(())
    }

    /// Run the accept loop on its own thread with a pool of `workers`.
    ///
    /// A failed accept stops the acceptor. `finish` receives the loop's
    /// result once every session has drained.
    pub fn spawn<H, F>(
        self: &Arc<Self>,
        workers: usize,
        handler: H,
        finish: F,
    ) -> io::Result<JoinHandle<()>>
    where
        H: Fn(TcpStream) + Send + Sync + 'static,
        F: FnOnce(io::Result<()>) + Send + 'static,
    {
        let listener = self.take_listener()?;
        let pool = WorkerPool::new(self.name, workers)?;
        let acceptor = Arc::clone(self);

        thread::Builder::new()
            .name(format!("{}-accept", self.name))
            .spawn(move || {
                let result = acceptor.accept_loop(listener, &pool, Arc::new(handler));
                if result.is_err() {
                    acceptor.stop();
                }
                pool.join();
                finish(result);
            })
    }

    /// Stop accepting and close the read half of tracked connections.
    /// Calling it more than once is harmless.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        // unblock the accept call
        if let Err(e) = TcpStream::connect_timeout(&wake_address(self.local_addr), WAKE_TIMEOUT) {
            debug!(listener = self.name, error = %e, "wake-up connection failed");
        }

        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        for stream in connections.values() {
            shutdown_read(stream);
        }
        debug!(listener = self.name, open = connections.len(), "acceptor stopped");
    }

    fn track(&self, stream: &TcpStream) -> Option<u64> {
        let clone = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(listener = self.name, error = %e, "connection not tracked");
                return None;
            }
        };

        let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        // stop() may have drained the table already
        if self.is_stopping() {
            shutdown_read(&clone);
        }
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        connections.insert(id, clone);
        Some(id)
    }

    fn untrack(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

fn shutdown_read(stream: &TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Read) {
        if e.kind() != io::ErrorKind::NotConnected {
            debug!(error = %e, "shutting down connection failed");
        }
    }
}

/// Listeners bound to the wildcard address are reached via loopback
fn wake_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::sync::mpsc;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn echo_once(stream: TcpStream) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap_or(0) > 0 {
            writer.write_all(line.as_bytes()).unwrap();
            line.clear();
        }
    }

    fn spawn_acceptor() -> (Arc<Acceptor>, thread::JoinHandle<io::Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let acceptor = Acceptor::new("test", listener).unwrap();
        let runner = Arc::clone(&acceptor);
        let handle = thread::spawn(move || {
            let pool = WorkerPool::new("test", 4)?;
            runner.run(&pool, Arc::new(echo_once))
        });
        (acceptor, handle)
    }

    #[test]
    fn test_wake_address_maps_unspecified_to_loopback() {
        let addr: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(wake_address(addr), "127.0.0.1:4000".parse().unwrap());

        let addr: SocketAddr = "[::]:4000".parse().unwrap();
        assert_eq!(wake_address(addr), "[::1]:4000".parse().unwrap());

        let addr: SocketAddr = "10.0.0.7:25".parse().unwrap();
        assert_eq!(wake_address(addr), addr);
    }

    #[test]
    fn test_serves_connections_and_stops() {
        let (acceptor, handle) = spawn_acceptor();

        let mut client = TcpStream::connect(acceptor.local_addr()).unwrap();
        client.set_read_timeout(Some(TIMEOUT)).unwrap();
        client.write_all(b"hello\n").unwrap();
        let mut reader = BufReader::new(client.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "hello\n");
        drop(reader);
        drop(client);

        acceptor.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_ends_open_sessions() {
        let (acceptor, handle) = spawn_acceptor();

        let client = TcpStream::connect(acceptor.local_addr()).unwrap();
        client.set_read_timeout(Some(TIMEOUT)).unwrap();
        // make sure the connection has been accepted and tracked
        let mut writer = client.try_clone().unwrap();
        writer.write_all(b"ping\n").unwrap();
        let mut reader = BufReader::new(client);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            acceptor.stop();
            done_tx.send(handle.join().is_ok()).unwrap();
        });

        // the pool is dropped at the end of run, which waits for the
        // session; it only finishes because stop closed its read half
        assert!(done_rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn test_spawn_reports_clean_finish() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let acceptor = Acceptor::new("spawned", listener).unwrap();
        let (tx, rx) = mpsc::channel();

        let handle = acceptor
            .spawn(2, echo_once, move |result| tx.send(result.is_ok()).unwrap())
            .unwrap();
        acceptor.stop();
        handle.join().unwrap();

        assert!(rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn test_listener_closed_after_stop() {
        let (acceptor, handle) = spawn_acceptor();
        acceptor.stop();
        handle.join().unwrap().unwrap();

        assert!(TcpStream::connect_timeout(&acceptor.local_addr(), TIMEOUT).is_err());
    }

    #[test]
    fn test_accept_loop_starts_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let acceptor = Acceptor::new("once", listener).unwrap();

        let handle = acceptor.spawn(1, echo_once, |_| {}).unwrap();
        let again = acceptor.spawn(1, echo_once, |_| {});
        assert_eq!(again.unwrap_err().kind(), io::ErrorKind::AlreadyExists);

        acceptor.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_twice() {
        let (acceptor, handle) = spawn_acceptor();
        acceptor.stop();
        acceptor.stop();
        handle.join().unwrap().unwrap();
        assert_eq!(acceptor.connection_count(), 0);
    }
}
