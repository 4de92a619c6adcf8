//! Outstanding request bookkeeping.
//!
//! The table is mutated from four places: response arrival, status update
//! arrival, timer expiry and shutdown. All of them go through one mutex, and
//! removing an entry is the only way to complete its caller, so a request is
//! resolved at most once.
//!
//! Every re-armed timer bumps the entry's generation. A timer that already
//! woke up when a status update re-armed the entry finds a newer generation
//! and does nothing.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use starling_api::errors::NodeError;
use starling_api::message::{error_codes, ErrorInfo, Response, StatusUpdate};
use starling_api::types::NodeResult;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::scheduler::task::panic_message;

/// Called with every status update received for a request.
pub type StatusHandler = Arc<dyn Fn(StatusUpdate) + Send + Sync>;

/// Builds the error a timed out request is rejected with.
pub type TimeoutCallback = Arc<dyn Fn(TimeoutContext) -> NodeError + Send + Sync>;

/// What a custom timeout callback gets to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutContext {
    pub request_id: String,
    pub target: String,
    /// Time since the request was sent, status updates included
    pub elapsed: Duration,
}

struct PendingRequest {
    responder: oneshot::Sender<NodeResult<Response<Value>>>,
    target: String,
    sent_at: Instant,
    on_timeout: Option<TimeoutCallback>,
    on_status: Option<StatusHandler>,
    timer: JoinHandle<()>,
    generation: u64,
}

pub(crate) struct PendingTable {
    entries: Mutex<HashMap<String, PendingRequest>>,
    /// Deadline a status update restarts, whatever the request's own timeout was
    slide_timeout: Duration,
}

impl fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTable")
            .field("len", &self.len())
            .field("slide_timeout", &self.slide_timeout)
            .finish()
    }
}

impl PendingTable {
    pub(crate) fn new(slide_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            slide_timeout,
        })
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }

    /// Registers a request and starts its timer.
    ///
    /// Fails if a request with the same id is still pending; the pending one is
    /// left untouched.
    pub(crate) fn insert(
        self: &Arc<Self>,
        request_id: &str,
        target: &str,
        timeout: Duration,
        on_timeout: Option<TimeoutCallback>,
        on_status: Option<StatusHandler>,
    ) -> NodeResult<oneshot::Receiver<NodeResult<Response<Value>>>> {
        let mut entries = self.entries();
        if entries.contains_key(request_id) {
            debug!(request_id, "Rejected request with a pending request id");
            return Err(NodeError::DuplicateRequest {
                request_id: request_id.to_string(),
            });
        }

        let (responder, receiver) = oneshot::channel();
        let entry = PendingRequest {
            responder,
            target: target.to_string(),
            sent_at: Instant::now(),
            on_timeout,
            on_status,
            timer: self.arm(request_id, 0, timeout),
            generation: 0,
        };
        entries.insert(request_id.to_string(), entry);
        Ok(receiver)
    }

    fn arm(self: &Arc<Self>, request_id: &str, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let table = Arc::downgrade(self);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(table) = table.upgrade() {
                table.expire(&request_id, generation);
            }
        })
    }

    fn expire(&self, request_id: &str, generation: u64) {
        let entry = {
            let mut entries = self.entries();
            let current = entries
                .get(request_id)
                .is_some_and(|entry| entry.generation == generation);
            if current {
                entries.remove(request_id)
            } else {
                None
            }
        };
        let Some(entry) = entry else {
            return;
        };

        let context = TimeoutContext {
            request_id: request_id.to_string(),
            target: entry.target.clone(),
            elapsed: entry.sent_at.elapsed(),
        };
        debug!(
            request_id,
            target = %context.target,
            elapsed_ms = context.elapsed.as_millis() as u64,
            "Request timed out"
        );

        let err = match &entry.on_timeout {
            Some(callback) => match std::panic::catch_unwind(AssertUnwindSafe(|| callback(context.clone()))) {
                Ok(err) => err,
                Err(panic) => {
                    error!(request_id, panic = %panic_message(panic), "Timeout callback panicked");
                    timeout_error(context)
                }
            },
            None => timeout_error(context),
        };
        let _ = entry.responder.send(Err(err));
    }

    /// Completes the request a response belongs to. Returns false for unknown ids.
    pub(crate) fn resolve(&self, response: Response<Value>) -> bool {
        let Some(entry) = self.entries().remove(response.request_id()) else {
            return false;
        };
        entry.timer.abort();

        let result = if response.body.success {
            Ok(response)
        } else {
            let info = response
                .body
                .error
                .unwrap_or_else(|| {
                    ErrorInfo::new(error_codes::HANDLER_ERROR, "Request failed without error details")
                });
            Err(NodeError::Remote(info))
        };
        // The caller may have stopped waiting; that is not an error here.
        let _ = entry.responder.send(result);
        true
    }

    /// Slides the deadline of a request to a full timeout from now and runs its
    /// status handler. Returns false for unknown ids.
    pub(crate) fn slide(self: &Arc<Self>, update: StatusUpdate) -> bool {
        let handler = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&update.request_id) else {
                return false;
            };
            entry.timer.abort();
            entry.generation += 1;
            entry.timer = self.arm(&update.request_id, entry.generation, self.slide_timeout);
            entry.on_status.clone()
        };

        if let Some(handler) = handler {
            let request_id = update.request_id.clone();
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(update))) {
                error!(request_id = %request_id, panic = %panic_message(panic), "Status update handler panicked");
            }
        }
        true
    }

    /// Drops a request without completing it, e.g. when sending it failed.
    pub(crate) fn remove(&self, request_id: &str) {
        if let Some(entry) = self.entries().remove(request_id) {
            entry.timer.abort();
        }
    }

    /// Rejects every outstanding request. Returns how many were rejected.
    pub(crate) fn reject_all(&self, reason: impl Fn() -> NodeError) -> usize {
        let drained: Vec<PendingRequest> = self.entries().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            entry.timer.abort();
            let _ = entry.responder.send(Err(reason()));
        }
        count
    }
}

fn timeout_error(context: TimeoutContext) -> NodeError {
    NodeError::Timeout {
        target: context.target,
        elapsed: context.elapsed,
    }
}
