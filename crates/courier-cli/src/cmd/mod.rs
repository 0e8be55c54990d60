pub mod channel;
pub mod config;
pub mod init;
pub mod named_user;
pub mod run_actions;
pub mod serve;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use courier_core::action::{BatchHost, BatchSummary, RequestId};
use courier_core::config::Config;
use courier_core::job::JobWorker;
use courier_core::Courier;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// One-shot sessions
// ---------------------------------------------------------------------------

/// Forwards finished batches to the command waiting on them.
struct FinishedBatches(mpsc::UnboundedSender<(RequestId, BatchSummary)>);

impl BatchHost for FinishedBatches {
    fn batch_finished(&self, request: RequestId, summary: BatchSummary) {
        let _ = self.0.send((request, summary));
    }
}

/// A courier instance opened for a single command. Opening schedules the
/// named-user reconciliation left over from earlier runs; jobs queued by the
/// command run when the session is drained.
pub struct Session {
    pub courier: Courier,
    worker: JobWorker,
    finished: mpsc::UnboundedReceiver<(RequestId, BatchSummary)>,
}

impl Session {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load config")?;
        let (tx, finished) = mpsc::unbounded_channel();
        let (courier, worker) = Courier::open(root, &config, Arc::new(FinishedBatches(tx)))
            .context("failed to open courier store")?;
        courier
            .named_user()
            .init()
            .context("failed to schedule named user reconciliation")?;
        Ok(Self {
            courier,
            worker,
            finished,
        })
    }

    /// Wait for `request` to finish and return its summary.
    pub async fn wait_for(&mut self, request: RequestId) -> anyhow::Result<BatchSummary> {
        while let Some((finished, summary)) = self.finished.recv().await {
            if finished == request {
                return Ok(summary);
            }
        }
        anyhow::bail!("batch {request} never finished")
    }

    /// Run every queued job, then stop accepting new ones. Retries scheduled
    /// for later are left to the next run.
    pub async fn drain(mut self) -> usize {
        let ran = self.worker.run_until_idle().await;
        self.courier.shutdown();
        tracing::debug!(jobs = ran, "session drained");
        ran
    }
}

pub fn block_on<F: Future>(future: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new()?;
    Ok(rt.block_on(future))
}
