//! RPC server implementation
//!
//! Owns the listening socket and accepts a bounded number of TCP clients.

use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::*;
use socket2::{Domain, Protocol, Socket, Type};

use super::bridge::{ConnectionId, MainThreadBridge};
use super::config::{CapacityPolicy, RpcConfig};
use super::connection::{ConnectionInfo, ConnectionTable, spawn_connection};
use super::dispatch::Dispatcher;
use super::errors::ConnectionError;
use super::frame::write_frame;
use super::registry::HandlerRegistry;
use super::types::Response;

const LISTEN_BACKLOG: i32 = 8;

/// RPC server that listens for connections and dispatches requests
pub struct RpcServer {
    config: RpcConfig,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    connections: Arc<ConnectionTable>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RpcServer {
    /// Binds the listener and starts accepting clients.
    ///
    /// Main-thread commands are only executed once the host calls
    /// [`MainThreadBridge::drain`] on [`RpcServer::bridge`] from its tick.
    pub fn start(config: RpcConfig, registry: HandlerRegistry) -> Result<Self, ConnectionError> {
        config.validate()?;

        let addr = resolve(&config)?;
        let listener = bind_listener(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        info!("RPC server listening on TCP: {}", local_addr);

        let running = Arc::new(AtomicBool::new(true));
        let bridge = Arc::new(MainThreadBridge::new(config.drain_budget()));
        let dispatcher = Dispatcher::new(Arc::new(registry), bridge);
        let connections = Arc::new(ConnectionTable::default());

        let acceptor = Acceptor {
            listener,
            running: running.clone(),
            dispatcher: dispatcher.clone(),
            connections: connections.clone(),
            max_connections: config.max_connections,
            capacity_policy: config.capacity_policy,
            max_frame: config.max_frame_bytes,
            write_timeout: config.write_timeout(),
            next_id: 1,
            workers: Vec::new(),
        };
        let accept_thread = thread::Builder::new()
            .name("rpc-accept".to_string())
            .spawn(move || acceptor.run())?;

        Ok(Self {
            config,
            local_addr,
            running,
            dispatcher,
            connections,
            accept_thread: Some(accept_thread),
        })
    }

    /// Address actually bound, useful when the configured port was 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Queue of main-thread invocations, to be drained once per tick
    pub fn bridge(&self) -> &Arc<MainThreadBridge> {
        self.dispatcher.bridge()
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.dispatcher.registry()
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops accepting, closes every connection and waits for their threads
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.bridge().close();

        if let Some(thread) = self.accept_thread.take() {
            if thread.join().is_err() {
                error!("RPC accept thread panicked");
            }
            info!("RPC server on {} stopped", self.local_addr);
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve(config: &RpcConfig) -> Result<SocketAddr, ConnectionError> {
    let endpoint = format!("{}:{}", config.host, config.port);
    (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|_| ConnectionError::Resolve(endpoint.clone()))?
        .next()
        .ok_or(ConnectionError::Resolve(endpoint))
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ConnectionError> {
    let bind_error = |source| ConnectionError::Bind { addr, source };

    let socket =
        Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)).map_err(bind_error)?;
    socket.set_reuse_address(true).map_err(bind_error)?;
    socket.bind(&addr.into()).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
    Ok(socket.into())
}

struct Acceptor {
    listener: TcpListener,
    running: Arc<AtomicBool>,
    dispatcher: Dispatcher,
    connections: Arc<ConnectionTable>,
    max_connections: usize,
    capacity_policy: CapacityPolicy,
    max_frame: usize,
    write_timeout: Duration,
    next_id: ConnectionId,
    workers: Vec<JoinHandle<()>>,
}

impl Acceptor {
    fn run(mut self) {
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    error!("TCP accept error: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
            self.workers.retain(|w| !w.is_finished());
            self.connections.prune_closed();
        }

        self.connections.close_all();
        for w in self.workers.drain(..) {
            if w.join().is_err() {
                error!("RPC connection thread panicked");
            }
        }
        self.connections.prune_closed();
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.connections.live() >= self.max_connections {
            match self.capacity_policy {
                CapacityPolicy::Reject => {
                    info!("Rejecting connection from {}: server at capacity", peer);
                    reject(stream);
                    return;
                }
                CapacityPolicy::EvictOldest => {
                    if let Some(id) = self.connections.close_oldest() {
                        info!("Evicting connection {} to admit {}", id, peer);
                    }
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        match spawn_connection(
            id,
            stream,
            peer,
            &self.connections,
            self.dispatcher.clone(),
            self.max_frame,
            self.write_timeout,
        ) {
            Ok(handle) => {
                info!("Connection {} accepted from {}", id, peer);
                self.workers.push(handle);
            }
            Err(e) => error!("Failed to set up connection from {}: {}", peer, e),
        }
    }
}

fn reject(mut stream: TcpStream) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_write_timeout(Some(Duration::from_secs(1)));
    if let Err(e) = write_frame(&mut stream, &Response::error(None, "server at capacity")) {
        debug!("Failed to notify rejected client: {}", e);
    }
    let _ = stream.shutdown(Shutdown::Both);
}
