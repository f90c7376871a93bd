//! Hand-off of main-thread invocations from network threads to the engine tick

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::*;
use serde_json::Value;

use super::errors::HandlerError;
use super::registry::MainThreadCall;
use super::types::Response;
use crate::engine::EngineState;

pub type ConnectionId = u64;

/// Delivers a finished response to the owning connection's writer
pub type ResponseSink = Sender<Response>;

/// Limits on how much work one drain may do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainBudget {
    pub max_invocations: usize,
    pub max_time: Option<Duration>,
}

impl Default for DrainBudget {
    fn default() -> Self {
        Self {
            max_invocations: 32,
            max_time: None,
        }
    }
}

/// A main-thread command waiting for the next tick, arguments already decoded
pub struct PendingInvocation {
    pub connection: ConnectionId,
    pub request_id: String,
    pub command: &'static str,
    pub call: MainThreadCall,
    pub sink: ResponseSink,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Invocations run this drain
    pub executed: usize,
    /// Of those, how many produced an error response
    pub failed: usize,
    /// Responses dropped because their connection was gone
    pub discarded: usize,
    /// Invocations left in the queue for a later tick
    pub deferred: usize,
}

#[derive(Default)]
struct Queue {
    items: VecDeque<(u64, PendingInvocation)>,
    next_seq: u64,
}

/// Single FIFO of pending invocations shared by every connection
pub struct MainThreadBridge {
    queue: Mutex<Queue>,
    budget: DrainBudget,
    accepting: AtomicBool,
}

impl MainThreadBridge {
    pub fn new(budget: DrainBudget) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            budget,
            accepting: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // Handlers never run under the lock so a poisoned queue is still consistent
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn budget(&self) -> DrainBudget {
        self.budget
    }

    /// Appends an invocation, returning its position in global FIFO order
    pub fn enqueue(&self, invocation: PendingInvocation) -> Result<u64, HandlerError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(HandlerError::ShuttingDown);
        }
        let mut q = self.lock();
        let seq = q.next_seq;
        q.next_seq += 1;
        q.items.push_back((seq, invocation));
        Ok(seq)
    }

    /// Number of invocations waiting
    pub fn pending(&self) -> usize {
        self.lock().items.len()
    }

    /// Stops accepting new invocations. Queued ones can still be drained.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    /// Runs queued invocations against the engine state, oldest first, within
    /// the drain budget. Called once per tick from the engine's main thread.
    pub fn drain(&self, state: &mut dyn EngineState) -> DrainReport {
        let started = Instant::now();
        let max_invocations = self.budget.max_invocations.max(1);
        let mut report = DrainReport::default();

        while report.executed < max_invocations {
            if report.executed > 0
                && self
                    .budget
                    .max_time
                    .is_some_and(|limit| started.elapsed() >= limit)
            {
                break;
            }

            let Some((seq, inv)) = self.lock().items.pop_front() else {
                break;
            };

            let PendingInvocation {
                connection,
                request_id,
                command,
                call,
                sink,
            } = inv;
            let result = catch_panic(command, || call(&mut *state));
            let response = match result {
                Ok(result) => Response::ok(request_id, result),
                Err(e) => {
                    report.failed += 1;
                    debug!(
                        "Invocation #{} ({}) on connection {} failed: {}",
                        seq, command, connection, e
                    );
                    Response::error(Some(request_id), e)
                }
            };
            report.executed += 1;

            if sink.send(response).is_err() {
                report.discarded += 1;
                debug!(
                    "Connection {} closed, discarding response of invocation #{}",
                    connection, seq
                );
            }
        }

        report.deferred = self.pending();
        if report.deferred > 0 {
            trace!("{} invocation(s) deferred to next tick", report.deferred);
        }
        report
    }
}

/// Runs a handler body, converting a panic into a [`HandlerError`]
pub(super) fn catch_panic<F>(command: &str, f: F) -> Result<Value, HandlerError>
where
    F: FnOnce() -> Result<Value, HandlerError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let msg = panic_message(payload.as_ref());
        error!("Handler {} panicked: {}", command, msg);
        Err(HandlerError::Panicked(msg))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
