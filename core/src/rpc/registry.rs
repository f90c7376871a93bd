//! Table of named commands and their argument schemas

use std::collections::HashMap;
use std::sync::Arc;

use log::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use strum::{Display, IntoStaticStr};

use super::errors::{HandlerError, ProtocolError, RegistryError};
use crate::engine::EngineState;

/// Where a handler is allowed to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionContext {
    /// Engine state access; runs on the tick thread through the bridge
    MainThread,
    /// Runs on the network thread as soon as the request is decoded
    AnyThread,
}

/// JSON shape of a single argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Bool,
    /// Array of exactly three numbers
    Vec3,
    Object,
}

impl FieldKind {
    pub fn matches(self, v: &Value) -> bool {
        match self {
            Self::String => v.is_string(),
            Self::Number => v.is_number(),
            Self::Integer => v.is_u64(),
            Self::Bool => v.is_boolean(),
            Self::Vec3 => v
                .as_array()
                .is_some_and(|a| a.len() == 3 && a.iter().all(Value::is_number)),
            Self::Object => v.is_object(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    #[serde(skip)]
    pub alias: Option<&'static str>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            alias: None,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            alias: None,
            kind,
            required: false,
        }
    }

    pub const fn alias(self, alias: &'static str) -> Self {
        Self {
            alias: Some(alias),
            ..self
        }
    }
}

/// Main-thread work with its arguments already decoded
pub type MainThreadCall =
    Box<dyn FnOnce(&mut dyn EngineState) -> Result<Value, HandlerError> + Send>;
/// Work that does not touch engine state, arguments already decoded
pub type AnyThreadCall = Box<dyn FnOnce(&HandlerRegistry) -> Result<Value, HandlerError> + Send>;

/// Decodes raw arguments into a call. Runs on the network thread so that
/// undecodable requests are answered before they reach the bridge.
pub type MainThreadFn = Box<dyn Fn(Value) -> Result<MainThreadCall, ProtocolError> + Send + Sync>;
pub type AnyThreadFn = Box<dyn Fn(Value) -> Result<AnyThreadCall, ProtocolError> + Send + Sync>;

pub enum Handler {
    MainThread(MainThreadFn),
    AnyThread(AnyThreadFn),
}

impl Handler {
    /// Wraps a typed main-thread handler, decoding arguments and encoding
    /// the result through serde
    pub fn main_thread<A, R>(f: fn(&mut dyn EngineState, A) -> Result<R, HandlerError>) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
    {
        Self::MainThread(Box::new(
            move |args: Value| -> Result<MainThreadCall, ProtocolError> {
                let args: A = decode_args(args)?;
                Ok(Box::new(move |state: &mut dyn EngineState| {
                    encode_result(&f(state, args)?)
                }))
            },
        ))
    }

    /// Wraps a typed handler that does not touch engine state
    pub fn any_thread<A, R>(f: fn(&HandlerRegistry, A) -> Result<R, HandlerError>) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
    {
        Self::AnyThread(Box::new(
            move |args: Value| -> Result<AnyThreadCall, ProtocolError> {
                let args: A = decode_args(args)?;
                Ok(Box::new(move |registry: &HandlerRegistry| {
                    encode_result(&f(registry, args)?)
                }))
            },
        ))
    }

    pub fn context(&self) -> ExecutionContext {
        match self {
            Self::MainThread(_) => ExecutionContext::MainThread,
            Self::AnyThread(_) => ExecutionContext::AnyThread,
        }
    }
}

fn decode_args<A: DeserializeOwned>(args: Value) -> Result<A, ProtocolError> {
    serde_json::from_value(args).map_err(|e| ProtocolError::InvalidArguments(e.to_string()))
}

fn encode_result<R: Serialize>(result: &R) -> Result<Value, HandlerError> {
    serde_json::to_value(result).map_err(|e| HandlerError::Encode(e.to_string()))
}

pub struct HandlerEntry {
    pub name: &'static str,
    pub summary: &'static str,
    pub schema: &'static [FieldSpec],
    pub handler: Handler,
}

impl HandlerEntry {
    pub fn context(&self) -> ExecutionContext {
        self.handler.context()
    }

    /// Checks presence and JSON type of every declared argument.
    /// Undeclared arguments are ignored.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), ProtocolError> {
        for field in self.schema {
            let value = args
                .get(field.name)
                .or_else(|| field.alias.and_then(|a| args.get(a)))
                .filter(|v| !v.is_null());
            match value {
                None if field.required => return Err(ProtocolError::MissingArgument(field.name)),
                None => (),
                Some(v) if !field.kind.matches(v) => {
                    return Err(ProtocolError::ArgumentType {
                        field: field.name,
                        expected: field.kind,
                    });
                }
                Some(_) => (),
            }
        }
        Ok(())
    }
}

/// Startup-time table of commands, read-only once shared
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<&'static str, Arc<HandlerEntry>>,
    order: Vec<&'static str>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in command
    pub fn with_builtin_commands() -> Self {
        let mut registry = Self::new();
        for entry in super::handlers::builtin_commands() {
            if let Err(e) = registry.register(entry) {
                error!("{}", e);
            }
        }
        registry
    }

    pub fn register(&mut self, entry: HandlerEntry) -> Result<(), RegistryError> {
        if self.entries.contains_key(entry.name) {
            return Err(RegistryError::Duplicate(entry.name));
        }
        self.order.push(entry.name);
        self.entries.insert(entry.name, Arc::new(entry));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HandlerEntry>> {
        self.entries.get(name)
    }

    /// Entries in registration order
    pub fn entries(&self) -> impl Iterator<Item = &Arc<HandlerEntry>> {
        self.order.iter().filter_map(|n| self.entries.get(n))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
