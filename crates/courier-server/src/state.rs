use std::path::{Path, PathBuf};
use std::sync::Arc;

use courier_core::action::{BatchHost, BatchSummary, RequestId};
use courier_core::config::Config;
use courier_core::job::{JobWorker, RetryPolicy};
use courier_core::remote::NamedUserClient;
use courier_core::store::KeyValueStore;
use courier_core::Courier;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Events pushed to `/api/events` subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseMessage {
    BatchStarted {
        request_id: RequestId,
        actions: usize,
    },
    BatchFinished {
        request_id: RequestId,
        summary: BatchSummary,
    },
}

impl SseMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SseMessage::BatchStarted { .. } => "batch_started",
            SseMessage::BatchFinished { .. } => "batch_finished",
        }
    }
}

/// Batch host that fans lifecycle signals out to SSE subscribers. Sends with
/// no subscriber are dropped.
pub struct BroadcastHost {
    tx: broadcast::Sender<SseMessage>,
}

impl BroadcastHost {
    pub fn new(tx: broadcast::Sender<SseMessage>) -> Self {
        Self { tx }
    }
}

impl BatchHost for BroadcastHost {
    fn batch_started(&self, request: RequestId, actions: usize) {
        let _ = self.tx.send(SseMessage::BatchStarted {
            request_id: request,
            actions,
        });
    }

    fn batch_finished(&self, request: RequestId, summary: BatchSummary) {
        debug!(request = %request, ?summary, "batch finished");
        let _ = self.tx.send(SseMessage::BatchFinished {
            request_id: request,
            summary,
        });
    }
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub courier: Courier,
    pub event_tx: broadcast::Sender<SseMessage>,
}

impl AppState {
    /// Open the courier instance configured under `root`. The returned
    /// worker is not running yet.
    pub fn open(root: &Path, config: &Config) -> courier_core::Result<(Self, JobWorker)> {
        let (tx, _) = broadcast::channel(64);
        let host = Arc::new(BroadcastHost::new(tx.clone()));
        let (courier, worker) = Courier::open(root, config, host)?;
        Ok((Self::with_courier(root.to_path_buf(), courier, tx), worker))
    }

    /// Wire state around an explicit store and client.
    pub fn assemble(
        root: PathBuf,
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn NamedUserClient>,
        retry: RetryPolicy,
    ) -> (Self, JobWorker) {
        let (tx, _) = broadcast::channel(64);
        let host = Arc::new(BroadcastHost::new(tx.clone()));
        let (courier, worker) = Courier::assemble(store, client, host, retry);
        (Self::with_courier(root, courier, tx), worker)
    }

    fn with_courier(root: PathBuf, courier: Courier, event_tx: broadcast::Sender<SseMessage>) -> Self {
        Self {
            root,
            courier,
            event_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_broadcasts_lifecycle_events() {
        let (tx, mut rx) = broadcast::channel(8);
        let host = BroadcastHost::new(tx);

        host.batch_started(request_id(), 2);
        host.batch_finished(request_id(), BatchSummary::default());

        let started = rx.try_recv().unwrap();
        assert_eq!(started.event_name(), "batch_started");
        let finished = rx.try_recv().unwrap();
        assert_eq!(finished.event_name(), "batch_finished");
    }

    #[test]
    fn messages_serialize_with_a_type_tag() {
        let msg = SseMessage::BatchStarted {
            request_id: request_id(),
            actions: 3,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({ "type": "batch_started", "request_id": 1, "actions": 3 })
        );
    }

    #[test]
    fn sending_without_subscribers_is_harmless() {
        let (tx, _) = broadcast::channel(8);
        BroadcastHost::new(tx).batch_finished(request_id(), BatchSummary::default());
    }

    fn request_id() -> RequestId {
        serde_json::from_value(serde_json::json!(1)).unwrap()
    }
}
