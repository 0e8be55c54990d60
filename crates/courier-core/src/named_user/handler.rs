//! Reconciliation jobs for the named user.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use super::tag_groups::collapse;
use super::{
    NamedUser, ACTION_APPLY_TAG_GROUP_CHANGES, ACTION_CLEAR_PENDING_TAGS,
    ACTION_UPDATE_NAMED_USER, ACTION_UPDATE_TAG_GROUPS,
};
use crate::channel::Channel;
use crate::error::{CourierError, Result};
use crate::job::{JobDescriptor, JobHandler, JobOutcome};
use crate::remote::{NamedUserClient, RemoteResponse};

pub struct NamedUserJobHandler {
    named_user: NamedUser,
    channel: Channel,
    client: Arc<dyn NamedUserClient>,
}

impl NamedUserJobHandler {
    pub fn new(named_user: NamedUser, channel: Channel, client: Arc<dyn NamedUserClient>) -> Self {
        Self {
            named_user,
            channel,
            client,
        }
    }

    /// Run store work for a job on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&NamedUser, &Channel) -> Result<T> + Send + 'static,
    {
        let named_user = self.named_user.clone();
        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || f(&named_user, &channel))
            .await
            .map_err(|e| CourierError::Store(format!("store task failed: {e}")))?
    }

    async fn update_named_user(&self) -> Result<JobOutcome> {
        let (snapshot, channel_id) = self
            .blocking(|named_user, channel| Ok((named_user.snapshot()?, channel.id()?)))
            .await?;
        let Some(token) = snapshot.change_token else {
            if snapshot.last_updated_token.is_none() {
                debug!("named user never set, nothing to upload");
            }
            return Ok(JobOutcome::Success);
        };
        if snapshot.last_updated_token.as_ref() == Some(&token) {
            debug!("named user already up to date");
            return Ok(JobOutcome::Success);
        }

        let Some(channel_id) = channel_id else {
            info!("no channel id yet, skipping named user update");
            return Ok(JobOutcome::Success);
        };

        let response = match &snapshot.id {
            Some(id) => self.client.associate(id, &channel_id).await,
            None => self.client.disassociate(&channel_id).await,
        };
        let response = match response {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "named user update failed, will retry");
                return Ok(JobOutcome::Retry);
            }
        };

        Ok(match response.status {
            _ if response.is_server_error() => {
                warn!(status = response.status, "named user update hit a server error, will retry");
                JobOutcome::Retry
            }
            _ if response.is_success() => {
                let recorded = self
                    .blocking(move |named_user, _| named_user.mark_uploaded(&token))
                    .await?;
                if recorded {
                    info!(named_user = snapshot.id.as_deref().unwrap_or("<none>"), "named user updated");
                } else {
                    debug!("named user changed during upload, token not recorded");
                }
                self.named_user.dispatch(ACTION_UPDATE_TAG_GROUPS);
                JobOutcome::Success
            }
            403 => {
                info!("named user updates are server-only for this app, discarding");
                JobOutcome::Success
            }
            409 => {
                debug!("named user update superseded remotely, discarding");
                JobOutcome::Success
            }
            status => {
                warn!(status, "named user update rejected");
                JobOutcome::Failure
            }
        })
    }

    async fn update_tag_groups(&self) -> Result<JobOutcome> {
        let (snapshot, entries, discarded) = self
            .blocking(|named_user, _| {
                let snapshot = named_user.snapshot()?;
                let (entries, discarded) = named_user
                    .tag_queue()
                    .discard_stale(snapshot.change_token.as_ref())?;
                Ok((snapshot, entries, discarded))
            })
            .await?;
        if discarded > 0 {
            debug!(discarded, "dropped tag edits made for a previous named user");
        }
        if entries.is_empty() {
            return Ok(JobOutcome::Success);
        }
        let Some(id) = snapshot.id else {
            debug!(pending = entries.len(), "no named user, leaving tag edits queued");
            return Ok(JobOutcome::Success);
        };

        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let edits = collapse(entries.into_iter().flat_map(|e| e.edits));
        if edits.is_empty() {
            self.remove_entries(ids).await?;
            return Ok(JobOutcome::Success);
        }

        let response: RemoteResponse = match self.client.update_tag_groups(&id, &edits).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "tag group upload failed, will retry");
                return Ok(JobOutcome::Retry);
            }
        };

        if response.is_server_error() {
            warn!(status = response.status, "tag group upload hit a server error, will retry");
            return Ok(JobOutcome::Retry);
        }
        self.remove_entries(ids).await?;
        if response.is_success() {
            info!(groups = edits.len(), "tag groups uploaded");
            Ok(JobOutcome::Success)
        } else {
            warn!(status = response.status, "tag group upload rejected, dropping edits");
            Ok(JobOutcome::Failure)
        }
    }

    async fn remove_entries(&self, ids: Vec<String>) -> Result<()> {
        self.blocking(move |named_user, _| named_user.tag_queue().remove(&ids))
            .await
    }

    async fn clear_pending_tags(&self) -> Result<JobOutcome> {
        let cleared = self
            .blocking(|named_user, _| named_user.tag_queue().clear())
            .await?;
        debug!(cleared, "cleared pending named user tag edits");
        Ok(JobOutcome::Success)
    }

    async fn perform_action(&self, action: &str) -> Result<JobOutcome> {
        match action {
            ACTION_UPDATE_NAMED_USER => self.update_named_user().await,
            ACTION_APPLY_TAG_GROUP_CHANGES | ACTION_UPDATE_TAG_GROUPS => {
                self.update_tag_groups().await
            }
            ACTION_CLEAR_PENDING_TAGS => self.clear_pending_tags().await,
            other => {
                warn!(action = other, "unknown named user job");
                Ok(JobOutcome::Success)
            }
        }
    }
}

impl JobHandler for NamedUserJobHandler {
    fn perform<'a>(&'a self, job: &'a JobDescriptor) -> BoxFuture<'a, JobOutcome> {
        async move {
            match self.perform_action(job.action()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(action = %job.action(), error = %e, "named user job hit a storage error, will retry");
                    JobOutcome::Retry
                }
            }
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobDispatcher, JobWorker, RetryPolicy};
    use crate::named_user::tag_groups::TagGroupEdit;
    use crate::named_user::{COMPONENT, LAST_UPDATED_TOKEN_KEY};
    use crate::store::{KeyValueStore, MemoryStore, ThreadTrackingStore};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Associate(String, String),
        Disassociate(String),
        Tags(String, Vec<TagGroupEdit>),
    }

    /// Records calls and answers each with the next scripted status; `None`
    /// simulates a transport failure. Defaults to 200 once the script runs out.
    #[derive(Default)]
    struct FakeClient {
        calls: Mutex<Vec<Call>>,
        script: Mutex<Vec<Option<u16>>>,
    }

    impl FakeClient {
        fn scripted(script: Vec<Option<u16>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, call: Call) -> Result<RemoteResponse> {
            self.calls.lock().unwrap().push(call);
            let mut script = self.script.lock().unwrap();
            let next = if script.is_empty() {
                Some(200)
            } else {
                script.remove(0)
            };
            next.map(RemoteResponse::new)
                .ok_or_else(|| CourierError::Remote("connection refused".into()))
        }
    }

    impl NamedUserClient for FakeClient {
        fn associate<'a>(
            &'a self,
            named_user_id: &'a str,
            channel_id: &'a str,
        ) -> BoxFuture<'a, Result<RemoteResponse>> {
            let result = self.answer(Call::Associate(named_user_id.into(), channel_id.into()));
            async move { result }.boxed()
        }

        fn disassociate<'a>(&'a self, channel_id: &'a str) -> BoxFuture<'a, Result<RemoteResponse>> {
            let result = self.answer(Call::Disassociate(channel_id.into()));
            async move { result }.boxed()
        }

        fn update_tag_groups<'a>(
            &'a self,
            named_user_id: &'a str,
            edits: &'a [TagGroupEdit],
        ) -> BoxFuture<'a, Result<RemoteResponse>> {
            let result = self.answer(Call::Tags(named_user_id.into(), edits.to_vec()));
            async move { result }.boxed()
        }
    }

    struct Fixture {
        user: NamedUser,
        channel: Channel,
        handler: NamedUserJobHandler,
        client: Arc<FakeClient>,
        worker: JobWorker,
        store: Arc<MemoryStore>,
    }

    impl Fixture {
        fn new(script: Vec<Option<u16>>) -> Self {
            let store = Arc::new(MemoryStore::new());
            let (dispatcher, worker) = JobDispatcher::new(RetryPolicy::default());
            let user = NamedUser::new(store.clone(), dispatcher);
            let channel = Channel::new(store.clone());
            channel.set_id(Some("chan-1")).unwrap();
            let client = FakeClient::scripted(script);
            let handler = user.job_handler(channel.clone(), client.clone());
            Self {
                user,
                channel,
                handler,
                client,
                worker,
                store,
            }
        }

        async fn run(&self, action: &str) -> JobOutcome {
            self.handler
                .perform(&JobDescriptor::new(COMPONENT, action))
                .await
        }

        fn drain_queued(&mut self) -> Vec<String> {
            std::iter::from_fn(|| self.worker.try_next())
                .map(|job| job.action().to_string())
                .collect()
        }
    }

    fn tag_edit(group: &str, add: &[&str]) -> TagGroupEdit {
        let mut edit = TagGroupEdit::new(group);
        for tag in add {
            edit.add_tag(*tag);
        }
        edit
    }

    #[tokio::test]
    async fn fresh_install_uploads_nothing() {
        let f = Fixture::new(vec![]);
        assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, JobOutcome::Success);
        assert!(f.client.calls().is_empty());
    }

    #[tokio::test]
    async fn associate_records_token_and_schedules_tags() {
        let mut f = Fixture::new(vec![]);
        f.user.set_id(Some("alice")).unwrap();
        f.drain_queued();

        assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, JobOutcome::Success);
        assert_eq!(
            f.client.calls(),
            [Call::Associate("alice".into(), "chan-1".into())]
        );
        let token = f.user.change_token().unwrap().unwrap();
        assert_eq!(
            f.store.get(LAST_UPDATED_TOKEN_KEY).unwrap().as_deref(),
            Some(token.as_str())
        );
        assert_eq!(f.drain_queued(), [ACTION_UPDATE_TAG_GROUPS]);

        // Already uploaded: a second run is a no-op.
        assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, JobOutcome::Success);
        assert_eq!(f.client.calls().len(), 1);
    }

    #[tokio::test]
    async fn cleared_id_disassociates() {
        let f = Fixture::new(vec![]);
        f.user.set_id(Some("alice")).unwrap();
        f.run(ACTION_UPDATE_NAMED_USER).await;
        f.user.set_id(None).unwrap();

        assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, JobOutcome::Success);
        assert_eq!(f.client.calls()[1], Call::Disassociate("chan-1".into()));
    }

    #[tokio::test]
    async fn missing_channel_id_skips_the_upload() {
        let f = Fixture::new(vec![]);
        f.channel.set_id(None).unwrap();
        f.user.set_id(Some("alice")).unwrap();

        assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, JobOutcome::Success);
        assert!(f.client.calls().is_empty());
        assert_eq!(f.store.get(LAST_UPDATED_TOKEN_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn update_outcomes_follow_status() {
        let cases = [
            (None, JobOutcome::Retry),
            (Some(500), JobOutcome::Retry),
            (Some(503), JobOutcome::Retry),
            (Some(403), JobOutcome::Success),
            (Some(409), JobOutcome::Success),
            (Some(400), JobOutcome::Failure),
        ];
        for (status, expected) in cases {
            let f = Fixture::new(vec![status]);
            f.user.set_id(Some("alice")).unwrap();
            assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, expected, "status {status:?}");
            assert_eq!(f.store.get(LAST_UPDATED_TOKEN_KEY).unwrap(), None);
        }
    }

    #[tokio::test]
    async fn token_superseded_during_upload_is_not_recorded() {
        let f = Fixture::new(vec![]);
        f.user.set_id(Some("alice")).unwrap();
        let old = f.user.change_token().unwrap().unwrap();
        f.user.force_update().unwrap();

        assert!(!f.user.mark_uploaded(&old).unwrap());
        assert_eq!(f.run(ACTION_UPDATE_NAMED_USER).await, JobOutcome::Success);
        assert_eq!(
            f.store.get(LAST_UPDATED_TOKEN_KEY).unwrap(),
            f.user.change_token().unwrap().map(|t| t.to_string())
        );
    }

    #[tokio::test]
    async fn tag_upload_collapses_current_edits() {
        let f = Fixture::new(vec![]);
        f.user.set_id(Some("alice")).unwrap();
        f.user.edit_tag_groups().add_tag("loyalty", "gold").apply().unwrap();
        f.user
            .edit_tag_groups()
            .add_tag("loyalty", "vip")
            .add_tag("region", "eu")
            .apply()
            .unwrap();

        assert_eq!(f.run(ACTION_APPLY_TAG_GROUP_CHANGES).await, JobOutcome::Success);
        assert_eq!(
            f.client.calls(),
            [Call::Tags(
                "alice".into(),
                vec![tag_edit("loyalty", &["gold", "vip"]), tag_edit("region", &["eu"])]
            )]
        );
        assert!(f.user.tag_queue().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_tag_edits_are_never_uploaded() {
        let f = Fixture::new(vec![]);
        f.user.set_id(Some("alice")).unwrap();
        f.user.edit_tag_groups().add_tag("g", "old").apply().unwrap();
        f.user.set_id(Some("bob")).unwrap();

        assert_eq!(f.run(ACTION_APPLY_TAG_GROUP_CHANGES).await, JobOutcome::Success);
        assert!(f.client.calls().is_empty());
        assert!(f.user.tag_queue().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tag_edits_wait_for_an_id() {
        let f = Fixture::new(vec![]);
        f.user.set_id(None).unwrap();
        f.user.edit_tag_groups().add_tag("g", "t").apply().unwrap();

        assert_eq!(f.run(ACTION_UPDATE_TAG_GROUPS).await, JobOutcome::Success);
        assert!(f.client.calls().is_empty());
        assert_eq!(f.user.tag_queue().entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tag_upload_retries_keep_edits_and_rejections_drop_them() {
        let f = Fixture::new(vec![Some(502), None, Some(400)]);
        f.user.set_id(Some("alice")).unwrap();
        f.user.edit_tag_groups().add_tag("g", "t").apply().unwrap();

        assert_eq!(f.run(ACTION_UPDATE_TAG_GROUPS).await, JobOutcome::Retry);
        assert_eq!(f.run(ACTION_UPDATE_TAG_GROUPS).await, JobOutcome::Retry);
        assert_eq!(f.user.tag_queue().entries().unwrap().len(), 1);

        assert_eq!(f.run(ACTION_UPDATE_TAG_GROUPS).await, JobOutcome::Failure);
        assert!(f.user.tag_queue().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_drops_every_queued_edit() {
        let f = Fixture::new(vec![]);
        f.user.edit_tag_groups().add_tag("g", "a").apply().unwrap();
        f.user.edit_tag_groups().add_tag("g", "b").apply().unwrap();

        assert_eq!(f.run(ACTION_CLEAR_PENDING_TAGS).await, JobOutcome::Success);
        assert!(f.user.tag_queue().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_runs_the_full_identity_flow() {
        let mut f = Fixture::new(vec![]);
        f.worker.register(
            COMPONENT,
            Arc::new(f.user.job_handler(f.channel.clone(), f.client.clone())),
        );

        f.user.set_id(Some("alice")).unwrap();
        f.worker.run_until_idle().await;
        f.user.edit_tag_groups().add_tag("g", "t").apply().unwrap();
        f.worker.run_until_idle().await;

        assert_eq!(
            f.client.calls(),
            [
                Call::Associate("alice".into(), "chan-1".into()),
                Call::Tags("alice".into(), vec![tag_edit("g", &["t"])]),
            ]
        );
        assert!(f.user.tag_queue().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_work_runs_on_the_blocking_pool() {
        let store = Arc::new(ThreadTrackingStore::default());
        let (dispatcher, _worker) = JobDispatcher::new(RetryPolicy::default());
        let user = NamedUser::new(store.clone(), dispatcher);
        let channel = Channel::new(store.clone());
        channel.set_id(Some("chan-1")).unwrap();
        user.set_id(Some("alice")).unwrap();
        user.edit_tag_groups().add_tag("loyalty", "gold").apply().unwrap();
        let client = FakeClient::scripted(vec![]);
        let handler = user.job_handler(channel, client.clone());

        store.reset();
        for action in [
            ACTION_UPDATE_NAMED_USER,
            ACTION_UPDATE_TAG_GROUPS,
            ACTION_CLEAR_PENDING_TAGS,
        ] {
            let outcome = handler.perform(&JobDescriptor::new(COMPONENT, action)).await;
            assert_eq!(outcome, JobOutcome::Success, "{action}");
        }

        assert_eq!(client.calls().len(), 2);
        assert!(store.accesses() > 0);
        assert!(!store.touched_on(std::thread::current().id()));
    }
}
