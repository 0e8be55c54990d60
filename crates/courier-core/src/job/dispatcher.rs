use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{JobDescriptor, JobHandler, JobKey, JobOutcome, RetryPolicy};

struct Shared {
    /// Keys queued but not yet started.
    queued: Mutex<HashSet<JobKey>>,
    tx: mpsc::UnboundedSender<JobDescriptor>,
    closed: watch::Sender<bool>,
}

// ---------------------------------------------------------------------------
// JobDispatcher
// ---------------------------------------------------------------------------

/// Cheap, cloneable handle for enqueueing jobs.
///
/// One dispatcher/worker pair is created per process (or per test) and
/// handed to the components that need it.
#[derive(Clone)]
pub struct JobDispatcher {
    shared: Arc<Shared>,
}

impl JobDispatcher {
    /// Create a dispatcher and the worker that drains it. The worker does
    /// nothing until it is run or spawned.
    pub fn new(retry: RetryPolicy) -> (Self, JobWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            queued: Mutex::new(HashSet::new()),
            tx,
            closed,
        });
        let worker = JobWorker {
            shared: Arc::clone(&shared),
            rx,
            closed: closed_rx,
            handlers: HashMap::new(),
            retry,
        };
        (Self { shared }, worker)
    }

    /// Enqueue `job`. Fire-and-forget: duplicates of a queued key and jobs
    /// dispatched after shutdown are dropped.
    pub fn dispatch(&self, job: JobDescriptor) {
        if self.is_closed() {
            warn!(component = %job.component(), action = %job.action(), "dispatcher shut down, dropping job");
            return;
        }

        let key = job.key();
        let mut queued = self
            .shared
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !queued.insert(key.clone()) {
            debug!(component = %key.component, action = %key.action, "job already queued, dropping duplicate");
            return;
        }
        if self.shared.tx.send(job).is_err() {
            queued.remove(&key);
            warn!(component = %key.component, action = %key.action, "job worker gone, dropping job");
            return;
        }
        debug!(component = %key.component, action = %key.action, "job queued");
    }

    pub fn is_queued(&self, key: &JobKey) -> bool {
        self.shared
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Stop accepting jobs. The worker finishes what is already queued and
    /// then exits. Pending retries are dropped.
    pub fn shutdown(&self) {
        if !self.shared.closed.send_replace(true) {
            info!("job dispatcher shutting down");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }
}

// ---------------------------------------------------------------------------
// JobWorker
// ---------------------------------------------------------------------------

/// Drains a [`JobDispatcher`] one job at a time, so two jobs with the same
/// key never run concurrently.
pub struct JobWorker {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<JobDescriptor>,
    closed: watch::Receiver<bool>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    retry: RetryPolicy,
}

impl JobWorker {
    /// Route jobs for `component` to `handler`.
    pub fn register(&mut self, component: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(component.into(), handler);
    }

    pub fn dispatcher(&self) -> JobDispatcher {
        JobDispatcher {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Take the next queued job without running it.
    pub fn try_next(&mut self) -> Option<JobDescriptor> {
        let job = self.rx.try_recv().ok()?;
        self.mark_started(&job);
        Some(job)
    }

    /// Run every job that is queued right now, including jobs those jobs
    /// enqueue. Retries scheduled for later are not waited for. Returns the
    /// number of jobs run.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut ran = 0;
        while let Some(job) = self.try_next() {
            self.execute(job).await;
            ran += 1;
        }
        ran
    }

    /// Run until the dispatcher shuts down, then drain the queue.
    pub async fn run(mut self) {
        info!(handlers = self.handlers.len(), "job worker started");
        loop {
            let next = tokio::select! {
                job = self.rx.recv() => job,
                _ = self.closed.changed() => None,
            };
            let Some(job) = next else {
                break;
            };
            self.mark_started(&job);
            self.execute(job).await;
        }
        let drained = self.run_until_idle().await;
        info!(drained, "job worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn mark_started(&self, job: &JobDescriptor) {
        self.shared
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job.key());
    }

    async fn execute(&self, job: JobDescriptor) {
        let Some(handler) = self.handlers.get(job.component()) else {
            warn!(component = %job.component(), action = %job.action(), "no handler registered for job");
            return;
        };

        let attempts_made = job.attempt() + 1;
        let outcome = AssertUnwindSafe(handler.perform(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                warn!(component = %job.component(), action = %job.action(), "job handler panicked");
                JobOutcome::Failure
            });

        match outcome {
            JobOutcome::Success => {
                debug!(component = %job.component(), action = %job.action(), "job finished");
            }
            JobOutcome::Failure => {
                warn!(component = %job.component(), action = %job.action(), attempts_made, "job failed, discarding");
            }
            JobOutcome::Retry if !self.retry.allows_retry(attempts_made) => {
                warn!(component = %job.component(), action = %job.action(), attempts_made, "job out of retries, discarding");
            }
            JobOutcome::Retry => {
                let delay = self.retry.delay_for(attempts_made);
                info!(component = %job.component(), action = %job.action(), attempts_made, delay_ms = delay.as_millis() as u64, "job will retry");
                let dispatcher = self.dispatcher();
                let job = job.next_attempt();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    dispatcher.dispatch(job);
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
