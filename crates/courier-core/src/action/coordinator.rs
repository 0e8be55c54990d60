use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    ActionArguments, ActionPayload, ActionResult, ActionRunner, ActionStatus, Completion,
    Situation,
};

// ---------------------------------------------------------------------------
// RequestId / BatchSummary / BatchHost
// ---------------------------------------------------------------------------

/// Identifies one accepted payload, from `batch_started` to `batch_finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-status tally for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub errors: usize,
    pub rejected: usize,
}

/// Whoever owns the resources tied to a request. `batch_finished` is called
/// exactly once per accepted payload, after every action has reported.
pub trait BatchHost: Send + Sync {
    fn batch_started(&self, _request: RequestId, _actions: usize) {}

    fn batch_finished(&self, request: RequestId, summary: BatchSummary);
}

// ---------------------------------------------------------------------------
// InFlightBatch
// ---------------------------------------------------------------------------

struct InFlightBatch {
    request: RequestId,
    total: usize,
    pending: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    rejected: AtomicUsize,
    host: Arc<dyn BatchHost>,
}

impl InFlightBatch {
    fn new(request: RequestId, total: usize, host: Arc<dyn BatchHost>) -> Self {
        Self {
            request,
            total,
            pending: AtomicUsize::new(total),
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            host,
        }
    }

    fn record(&self, result: &ActionResult) {
        let counter = match result.status() {
            ActionStatus::Completed => &self.completed,
            ActionStatus::Error => &self.errors,
            ActionStatus::Rejected => &self.rejected,
        };
        counter.fetch_add(1, Ordering::AcqRel);

        // Only the decrement that observes 1 may signal the host.
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let summary = BatchSummary {
                total: self.total,
                completed: self.completed.load(Ordering::Acquire),
                errors: self.errors.load(Ordering::Acquire),
                rejected: self.rejected.load(Ordering::Acquire),
            };
            info!(request = %self.request, ?summary, "action batch finished");
            self.host.batch_finished(self.request, summary);
        }
    }
}

// ---------------------------------------------------------------------------
// ActionCoordinator
// ---------------------------------------------------------------------------

/// Turns an actions payload into one runner call per entry and reports the
/// batch to the host once every entry has completed.
pub struct ActionCoordinator {
    runner: Arc<dyn ActionRunner>,
    host: Arc<dyn BatchHost>,
    next_request: AtomicU64,
}

impl ActionCoordinator {
    pub fn new(runner: Arc<dyn ActionRunner>, host: Arc<dyn BatchHost>) -> Self {
        Self {
            runner,
            host,
            next_request: AtomicU64::new(0),
        }
    }

    /// Validate and run a raw payload.
    ///
    /// Returns `None` (and signals nothing) when the payload is missing, blank
    /// or does not decode into at least one action. Never blocks on the
    /// actions themselves.
    pub fn run_actions_payload(
        &self,
        payload: Option<&str>,
        situation: Situation,
        metadata: HashMap<String, Value>,
    ) -> Option<RequestId> {
        let Some(raw) = payload.filter(|p| !p.trim().is_empty()) else {
            debug!("ignoring empty actions payload");
            return None;
        };
        match ActionPayload::parse(raw) {
            Ok(payload) => Some(self.run_payload(payload, situation, metadata)),
            Err(e) => {
                debug!(error = %e, "ignoring invalid actions payload");
                None
            }
        }
    }

    /// Run an already-decoded payload. Entries are handed to the runner in
    /// declared order; they may finish in any order.
    pub fn run_payload(
        &self,
        payload: ActionPayload,
        situation: Situation,
        metadata: HashMap<String, Value>,
    ) -> RequestId {
        let request = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed) + 1);
        let total = payload.len();
        let batch = Arc::new(InFlightBatch::new(request, total, Arc::clone(&self.host)));

        info!(request = %request, actions = total, %situation, "action batch started");
        self.host.batch_started(request, total);

        for (name, value) in payload.into_entries() {
            let args = ActionArguments::new(value, situation).with_metadata(metadata.clone());
            let batch = Arc::clone(&batch);
            let completion = Completion::new(move |result| batch.record(&result));
            self.runner.run(&name, args, completion);
        }

        request
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
