use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::Error;

/// One request on its way to a responder queue.
///
/// `reply` is the only path back to the pending call that sent the request.
/// Dropping the envelope without answering cancels that call.
#[derive(Debug)]
pub struct Envelope {
    pub id: u64,
    pub service: String,
    pub payload: Value,
    pub reply: oneshot::Sender<Reply>,
}

/// Answer to the envelope with the same `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub result: Result<Value, String>,
}

/// Abstraction over the way requests reach a responder.
///
/// Both methods must return without waiting: availability is a snapshot and
/// `dispatch` either enqueues the envelope or fails.
pub trait Transport: Send + Sync {
    fn is_available(&self, service: &str) -> bool;

    fn dispatch(&self, envelope: Envelope) -> Result<(), Error>;
}

pub(crate) fn next_call_id() -> u64 {
    static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)
}
