//! Wiring: one store, one dispatcher/worker pair, the named user, the
//! channel and the action pipeline that feeds them.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::action::{ActionCoordinator, ActionRegistry, BatchHost, RegistryRunner, RequestId, Situation};
use crate::channel::Channel;
use crate::config::Config;
use crate::error::Result;
use crate::job::{JobDispatcher, JobWorker, RetryPolicy};
use crate::named_user::{NamedUser, COMPONENT};
use crate::remote::{HttpNamedUserClient, NamedUserClient};
use crate::store::{KeyValueStore, RedbStore};

/// Cloneable handle to a fully wired courier instance.
#[derive(Clone)]
pub struct Courier {
    store: Arc<dyn KeyValueStore>,
    channel: Channel,
    named_user: NamedUser,
    registry: Arc<ActionRegistry>,
    coordinator: Arc<ActionCoordinator>,
    dispatcher: JobDispatcher,
}

impl Courier {
    /// Wire every component around `store`. The returned worker has the
    /// named-user handler registered and must be run or spawned by the
    /// caller.
    pub fn assemble(
        store: Arc<dyn KeyValueStore>,
        client: Arc<dyn NamedUserClient>,
        host: Arc<dyn BatchHost>,
        retry: RetryPolicy,
    ) -> (Self, JobWorker) {
        let (dispatcher, mut worker) = JobDispatcher::new(retry);
        let channel = Channel::new(Arc::clone(&store));
        let named_user = NamedUser::new(Arc::clone(&store), dispatcher.clone());
        worker.register(
            COMPONENT,
            Arc::new(named_user.job_handler(channel.clone(), client)),
        );

        let registry = Arc::new(ActionRegistry::with_builtins(
            channel.clone(),
            named_user.clone(),
        ));
        let runner = Arc::new(RegistryRunner::new(Arc::clone(&registry)));
        let coordinator = Arc::new(ActionCoordinator::new(runner, host));

        let courier = Self {
            store,
            channel,
            named_user,
            registry,
            coordinator,
            dispatcher,
        };
        (courier, worker)
    }

    /// Open the redb store under `root` and talk to the configured remote.
    pub fn open(root: &Path, config: &Config, host: Arc<dyn BatchHost>) -> Result<(Self, JobWorker)> {
        let store_path = config.store_path(root);
        let store = Arc::new(RedbStore::open(&store_path)?);
        let client = Arc::new(HttpNamedUserClient::new(&config.remote)?);
        info!(store = %store_path.display(), remote = %config.remote.base_url, "courier opened");
        Ok(Self::assemble(store, client, host, config.retry.clone()))
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn named_user(&self) -> &NamedUser {
        &self.named_user
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn coordinator(&self) -> &ActionCoordinator {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn run_actions(
        &self,
        payload: Option<&str>,
        situation: Situation,
        metadata: HashMap<String, Value>,
    ) -> Option<RequestId> {
        self.coordinator
            .run_actions_payload(payload, situation, metadata)
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
