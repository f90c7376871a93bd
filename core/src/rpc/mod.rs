//! Remote control channel
//!
//! Lets an external agent drive a running engine over TCP. Requests and
//! responses are JSON documents, one per line:
//!
//! ```text
//! {"id":"1","command":"spawn_actor","args":{"class":"Cube","location":[0,0,0]}}
//! {"id":"1","status":"ok","result":{"actor_id":"Cube_1",...}}
//! ```
//!
//! Network threads decode and validate requests. Commands touching engine
//! state are queued on the [`MainThreadBridge`], which the host drains from
//! its tick with an explicit [`EngineState`](crate::engine::EngineState).

mod bridge;
mod config;
mod connection;
mod dispatch;
mod errors;
mod frame;
mod handlers;
mod registry;
mod server;
mod types;


pub use bridge::{
    ConnectionId, DrainBudget, DrainReport, MainThreadBridge, PendingInvocation, ResponseSink,
};
pub use config::{CapacityPolicy, RpcConfig};
pub use connection::{ConnectionInfo, ConnectionState};
pub use dispatch::{Dispatched, Dispatcher};
pub use errors::*;
pub use frame::{DEFAULT_MAX_FRAME_BYTES, FrameDecoder, encode_frame, write_frame};
pub use handlers::execute;
pub use registry::{
    ExecutionContext, FieldKind, FieldSpec, Handler, HandlerEntry, HandlerRegistry,
};
pub use server::RpcServer;
pub use types::*;
