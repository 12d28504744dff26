use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use super::error::WorkError;
use super::response_handler::BoxedResponseHandler;

/// Anything a worker can be asked to process. The key names the slot the
/// worker's answer belongs to.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Identifies one unit of work, e.g. the howler whose votes we want.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkDescriptor {
    pub key: String,
}

impl WorkDescriptor {
    pub fn new(key: impl Into<String>) -> Self {
        WorkDescriptor { key: key.into() }
    }
}

impl From<&str> for WorkDescriptor {
    fn from(key: &str) -> Self {
        WorkDescriptor::new(key)
    }
}

impl Keyed for WorkDescriptor {
    fn key(&self) -> &str {
        &self.key
    }
}

/// Outcome of one descriptor, either computed by a worker or synthesized by
/// the deadline fallback (`is_default`).
#[derive(Debug, Clone, PartialEq)]
pub struct WorkResult {
    pub key: String,
    pub value: i64,
    pub elapsed: Duration,
    pub is_default: bool,
}

impl WorkResult {
    pub fn genuine(key: impl Into<String>, value: i64, elapsed: Duration) -> Self {
        WorkResult {
            key: key.into(),
            value,
            elapsed,
            is_default: false,
        }
    }

    pub fn fallback(key: impl Into<String>, value: i64, elapsed: Duration) -> Self {
        WorkResult {
            key: key.into(),
            value,
            elapsed,
            is_default: true,
        }
    }
}

/// One result per submitted descriptor.
pub type BatchResults = HashMap<WorkDescriptor, WorkResult>;

/// Envelope delivered to a worker's mailbox.
///
/// A message either carries a payload, optionally with a responder that
/// receives the worker's report, or asks the worker to stop.
#[derive(Debug)]
pub struct Message<R, Response: Send + Debug> {
    pub payload: Option<R>,
    pub stop: bool,
    pub responder: Option<BoxedResponseHandler<Response>>,
}

impl<R, Response: Send + Debug> Message<R, Response> {
    pub fn work(payload: R, responder: Option<BoxedResponseHandler<Response>>) -> Self {
        Message {
            payload: Some(payload),
            stop: false,
            responder,
        }
    }

    pub fn stop() -> Self {
        Message {
            payload: None,
            stop: true,
            responder: None,
        }
    }
}

/// What a supervised worker tells its parent after handling one request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReport {
    Completed { worker_id: u32, result: WorkResult },
    /// The worker gave up; no result will ever come for `key`.
    Stopped {
        worker_id: u32,
        key: String,
        reason: WorkError,
    },
    /// The failure is the parent's problem now.
    Escalated {
        worker_id: u32,
        key: String,
        reason: WorkError,
    },
}

impl WorkerReport {
    pub fn key(&self) -> &str {
        match self {
            WorkerReport::Completed { result, .. } => &result.key,
            WorkerReport::Stopped { key, .. } | WorkerReport::Escalated { key, .. } => key,
        }
    }

    pub fn worker_id(&self) -> u32 {
        match self {
            WorkerReport::Completed { worker_id, .. }
            | WorkerReport::Stopped { worker_id, .. }
            | WorkerReport::Escalated { worker_id, .. } => *worker_id,
        }
    }
}
