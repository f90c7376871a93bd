//! Routing of decoded frames to handlers

use std::sync::Arc;

use log::*;
use serde_json::Value;

use super::bridge::{ConnectionId, MainThreadBridge, PendingInvocation, ResponseSink, catch_panic};
use super::errors::ProtocolError;
use super::registry::{Handler, HandlerRegistry};
use super::types::{Request, Response};

/// What happened to a dispatched frame
#[derive(Debug)]
pub enum Dispatched {
    /// Answered on the calling thread
    Immediate(Response),
    /// Queued for the main thread; the response arrives through the sink
    Queued(u64),
}

/// Validates requests and routes them by execution context.
/// Never blocks on the engine.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    bridge: Arc<MainThreadBridge>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, bridge: Arc<MainThreadBridge>) -> Self {
        Self { registry, bridge }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<MainThreadBridge> {
        &self.bridge
    }

    pub fn dispatch(&self, connection: ConnectionId, frame: Value, sink: &ResponseSink) -> Dispatched {
        let request = match Request::from_frame(frame) {
            Ok(r) => r,
            Err((id, e)) => {
                debug!("Connection {}: rejected request: {}", connection, e);
                return Dispatched::Immediate(Response::error(id, e));
            }
        };

        let Some(entry) = self.registry.get(&request.command) else {
            debug!(
                "Connection {}: unknown command {:?}",
                connection, request.command
            );
            return Dispatched::Immediate(Response::error(
                Some(request.id),
                ProtocolError::UnknownCommand,
            ));
        };

        if let Err(e) = entry.validate(&request.args) {
            debug!(
                "Connection {}: {} rejected: {}",
                connection, request.command, e
            );
            return Dispatched::Immediate(Response::error(Some(request.id), e));
        }

        let args = Value::Object(request.args);
        match &entry.handler {
            Handler::AnyThread(prepare) => {
                let response = match prepare(args) {
                    Ok(call) => match catch_panic(entry.name, || call(&*self.registry)) {
                        Ok(result) => Response::ok(request.id, result),
                        Err(e) => Response::error(Some(request.id), e),
                    },
                    Err(e) => {
                        debug!("Connection {}: {} rejected: {}", connection, entry.name, e);
                        Response::error(Some(request.id), e)
                    }
                };
                Dispatched::Immediate(response)
            }
            Handler::MainThread(prepare) => {
                let call = match prepare(args) {
                    Ok(call) => call,
                    Err(e) => {
                        debug!("Connection {}: {} rejected: {}", connection, entry.name, e);
                        return Dispatched::Immediate(Response::error(Some(request.id), e));
                    }
                };
                let request_id = request.id;
                match self.bridge.enqueue(PendingInvocation {
                    connection,
                    request_id: request_id.clone(),
                    command: entry.name,
                    call,
                    sink: sink.clone(),
                }) {
                    Ok(seq) => {
                        trace!(
                            "Connection {}: queued {} as #{}",
                            connection, entry.name, seq
                        );
                        Dispatched::Queued(seq)
                    }
                    Err(e) => Dispatched::Immediate(Response::error(Some(request_id), e)),
                }
            }
        }
    }
}
