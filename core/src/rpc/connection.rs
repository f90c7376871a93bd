//! Per-client connection lifecycle

use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, select};
use log::*;
use serde::Serialize;
use strum::Display;

use super::bridge::{ConnectionId, ResponseSink};
use super::dispatch::{Dispatched, Dispatcher};
use super::errors::ConnectionError;
use super::frame::{FrameDecoder, write_frame};
use super::types::Response;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether the connection counts towards the connection limit
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

/// Diagnostic view of one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub state: ConnectionState,
}

struct Slot {
    info: ConnectionInfo,
    /// Handle used to unblock the reader from outside
    control: TcpStream,
    close_tx: Sender<()>,
}

impl Slot {
    /// Stops the reader and tells the writer to flush and shut the socket
    fn close(&mut self) {
        if self.info.state.is_live() {
            self.info.state = ConnectionState::Closing;
        }
        let _ = self.close_tx.try_send(());
        let _ = self.control.shutdown(Shutdown::Read);
    }
}

/// Connections oldest first. Closed ones stay listed until pruned.
#[derive(Default)]
pub struct ConnectionTable {
    slots: Mutex<Vec<Slot>>,
}

impl ConnectionTable {
    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.lock().iter().map(|s| s.info.clone()).collect()
    }

    /// Connections counting towards the connection limit
    pub fn live(&self) -> usize {
        self.lock().iter().filter(|s| s.info.state.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn set_state(&self, id: ConnectionId, state: ConnectionState) {
        if let Some(s) = self.lock().iter_mut().find(|s| s.info.id == id) {
            s.info.state = state;
        }
    }

    fn remove(&self, id: ConnectionId) {
        self.lock().retain(|s| s.info.id != id);
    }

    /// Forgets connections whose threads have finished
    pub fn prune_closed(&self) -> usize {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|s| s.info.state != ConnectionState::Closed);
        before - slots.len()
    }

    /// Asks a connection to shut down. Its threads finish asynchronously.
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.lock().iter_mut().find(|s| s.info.id == id) {
            Some(s) => {
                s.close();
                true
            }
            None => false,
        }
    }

    /// Closes the longest-lived connection still in service
    pub fn close_oldest(&self) -> Option<ConnectionId> {
        let mut slots = self.lock();
        let oldest = slots.iter_mut().find(|s| s.info.state.is_live())?;
        oldest.close();
        Some(oldest.info.id)
    }

    pub fn close_all(&self) {
        for s in self.lock().iter_mut() {
            s.close();
        }
    }
}

/// Registers a freshly accepted stream and starts its reader and writer threads
pub(super) fn spawn_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    table: &Arc<ConnectionTable>,
    dispatcher: Dispatcher,
    max_frame: usize,
    write_timeout: Duration,
) -> Result<JoinHandle<()>, ConnectionError> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(write_timeout))?;
    let control = stream.try_clone()?;
    let writer = stream.try_clone()?;
    let (close_tx, close_rx) = crossbeam_channel::bounded(1);

    table.lock().push(Slot {
        info: ConnectionInfo {
            id,
            peer,
            state: ConnectionState::Connecting,
        },
        control,
        close_tx: close_tx.clone(),
    });

    let conn = Connection {
        id,
        stream,
        decoder: FrameDecoder::new(max_frame),
        dispatcher,
        table: table.clone(),
        close_tx,
    };
    let spawned = thread::Builder::new()
        .name(format!("rpc-conn-{}", id))
        .spawn(move || conn.run(writer, close_rx));
    match spawned {
        Ok(handle) => Ok(handle),
        Err(e) => {
            table.remove(id);
            Err(e.into())
        }
    }
}

struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    decoder: FrameDecoder,
    dispatcher: Dispatcher,
    table: Arc<ConnectionTable>,
    close_tx: Sender<()>,
}

impl Connection {
    fn run(mut self, writer: TcpStream, close_rx: Receiver<()>) {
        let id = self.id;
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let writer_thread = thread::Builder::new()
            .name(format!("rpc-conn-{}-tx", id))
            .spawn(move || write_loop(id, writer, &out_rx, &close_rx));

        match writer_thread {
            Ok(writer_thread) => {
                self.table.set_state(id, ConnectionState::Active);
                debug!("Connection {} active", id);

                self.read_loop(&out_tx);

                self.table.set_state(id, ConnectionState::Closing);
                let _ = self.close_tx.try_send(());
                drop(out_tx);
                if writer_thread.join().is_err() {
                    error!("Connection {} writer thread panicked", id);
                }
            }
            Err(e) => error!("Connection {}: cannot start writer: {}", id, e),
        }

        let _ = self.stream.shutdown(Shutdown::Both);
        self.table.set_state(id, ConnectionState::Closed);
        info!("Connection {} closed", id);
    }

    fn read_loop(&mut self, out_tx: &ResponseSink) {
        let id = self.id;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => {
                    debug!("Connection {}: end of stream", id);
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Connection {}: read error: {}", id, e);
                    return;
                }
            };
            self.decoder.feed(&buf[..n]);

            loop {
                match self.decoder.next_frame() {
                    Ok(Some(frame)) => match self.dispatcher.dispatch(id, frame, out_tx) {
                        Dispatched::Immediate(resp) => {
                            if out_tx.send(resp).is_err() {
                                return;
                            }
                        }
                        Dispatched::Queued(_) => (),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Connection {}: {}, disconnecting", id, e);
                        let _ = out_tx.send(Response::error(None, &e));
                        return;
                    }
                }
            }
        }
    }
}

fn write_loop(
    id: ConnectionId,
    mut stream: TcpStream,
    out_rx: &Receiver<Response>,
    close_rx: &Receiver<()>,
) {
    let mut write = |resp: &Response| match write_frame(&mut stream, resp) {
        Ok(()) => true,
        Err(e) => {
            debug!("Connection {}: write failed: {}", id, e);
            false
        }
    };

    loop {
        select! {
            recv(out_rx) -> msg => match msg {
                Ok(resp) => {
                    if !write(&resp) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(close_rx) -> _ => {
                // Flush responses that were ready before the close
                while let Ok(resp) = out_rx.try_recv() {
                    if !write(&resp) {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    use serde_json::{Value, json};

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        (server, client)
    }

    fn slot(id: ConnectionId, stream: &TcpStream, close_tx: Sender<()>) -> Slot {
        Slot {
            info: ConnectionInfo {
                id,
                peer: stream.peer_addr().unwrap(),
                state: ConnectionState::Active,
            },
            control: stream.try_clone().unwrap(),
            close_tx,
        }
    }

    #[test]
    fn close_flushes_ready_responses() {
        let (server, client) = socket_pair();
        let (close_tx, close_rx) = crossbeam_channel::bounded(1);
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        out_tx.send(Response::ok("1", json!({"pong": true}))).unwrap();
        out_tx.send(Response::ok("2", json!({"pong": true}))).unwrap();

        let mut s = slot(1, &server, close_tx);
        s.close();
        assert_eq!(s.info.state, ConnectionState::Closing);
        write_loop(1, server, &out_rx, &close_rx);

        let mut reader = BufReader::new(client);
        for id in ["1", "2"] {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let resp: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(resp["id"], id);
        }
        let mut line = String::new();
        assert_eq!(reader.read_line(&mut line).unwrap(), 0);
    }

    #[test]
    fn closed_slots_listed_until_pruned() {
        let (a, _ca) = socket_pair();
        let (b, _cb) = socket_pair();
        let table = ConnectionTable::default();
        table.lock().push(slot(1, &a, crossbeam_channel::bounded(1).0));
        table.lock().push(slot(2, &b, crossbeam_channel::bounded(1).0));

        assert_eq!(table.close_oldest(), Some(1));
        assert_eq!(table.live(), 1);
        table.set_state(1, ConnectionState::Closed);

        let states: Vec<_> = table.snapshot().iter().map(|c| c.state).collect();
        assert_eq!(states, vec![ConnectionState::Closed, ConnectionState::Active]);
        assert_eq!(table.prune_closed(), 1);
        assert_eq!(table.snapshot()[0].id, 2);
        assert_eq!(table.prune_closed(), 0);
    }
}
