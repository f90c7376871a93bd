//! Error taxonomy of the control channel

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use super::registry::FieldKind;
use crate::engine::EngineError;

/// Malformed byte stream. The offending connection is dropped.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame exceeds maximum size ({len} > {max} bytes)")]
    Oversize { len: usize, max: usize },
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Request rejected before reaching a handler. The connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request must be a JSON object")]
    NotAnObject,
    #[error("missing request id")]
    MissingId,
    #[error("request id must be a string")]
    InvalidId,
    #[error("command must be a non-empty string")]
    InvalidCommand,
    #[error("args must be an object")]
    InvalidArgs,
    #[error("unknown command")]
    UnknownCommand,
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),
    #[error("argument {field} must be {expected}")]
    ArgumentType {
        field: &'static str,
        expected: FieldKind,
    },
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Failure while executing a handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("failed to encode result: {0}")]
    Encode(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("server shutting down")]
    ShuttingDown,
}

/// Socket-level failure
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("cannot resolve listen address {0}")]
    Resolve(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command already registered: {0}")]
    Duplicate(&'static str),
}
