//! Named-user identity.
//!
//! `NamedUser` owns the identity keys in the store. Every identity-affecting
//! write happens inside one critical section that persists the id, mints a
//! fresh change token, and enqueues the reconciliation jobs. The jobs read
//! whatever is current when they run, so a superseded job does no harm.

pub mod handler;
pub mod tag_groups;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::channel::Channel;
use crate::error::Result;
use crate::job::{JobDescriptor, JobDispatcher};
use crate::ledger::{ChangeToken, ChangeTokenLedger};
use crate::remote::NamedUserClient;
use crate::store::KeyValueStore;

pub use handler::NamedUserJobHandler;
pub use tag_groups::{QueuedTagEdit, TagEditQueue, TagGroupEdit, TagGroupsEditor};

pub const COMPONENT: &str = "named_user";

pub const ACTION_UPDATE_NAMED_USER: &str = "update_named_user";
pub const ACTION_CLEAR_PENDING_TAGS: &str = "clear_pending_named_user_tags";
pub const ACTION_APPLY_TAG_GROUP_CHANGES: &str = "apply_tag_group_changes";
pub const ACTION_UPDATE_TAG_GROUPS: &str = "update_named_user_tag_groups";

pub const MAX_NAMED_USER_ID_LENGTH: usize = 128;

pub(crate) const NAMED_USER_ID_KEY: &str = "named_user.id";
pub(crate) const CHANGE_TOKEN_KEY: &str = "named_user.change_token";
pub(crate) const LAST_UPDATED_TOKEN_KEY: &str = "named_user.last_updated_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetIdOutcome {
    /// Identity written, token re-minted, reconciliation scheduled.
    Updated,
    /// Same id with an existing token; nothing changed.
    Unchanged,
    /// Blank or over-long id; nothing changed.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedUserRecord {
    pub id: Option<String>,
    pub change_token: Option<ChangeToken>,
}

/// Identity as seen by the reconciliation jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub id: Option<String>,
    pub change_token: Option<ChangeToken>,
    pub last_updated_token: Option<ChangeToken>,
}

/// Cheap to clone; clones share the store, the dispatcher and the identity
/// lock.
#[derive(Clone)]
pub struct NamedUser {
    store: Arc<dyn KeyValueStore>,
    ledger: ChangeTokenLedger,
    tag_queue: TagEditQueue,
    dispatcher: JobDispatcher,
    lock: Arc<Mutex<()>>,
}

impl NamedUser {
    pub fn new(store: Arc<dyn KeyValueStore>, dispatcher: JobDispatcher) -> Self {
        Self {
            ledger: ChangeTokenLedger::new(Arc::clone(&store), CHANGE_TOKEN_KEY),
            tag_queue: TagEditQueue::new(Arc::clone(&store)),
            store,
            dispatcher,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Schedule reconciliation of whatever state survived the last run.
    pub fn init(&self) -> Result<()> {
        self.dispatch(ACTION_UPDATE_NAMED_USER);
        if self.id()?.is_some() {
            self.dispatch(ACTION_UPDATE_TAG_GROUPS);
        }
        Ok(())
    }

    pub fn id(&self) -> Result<Option<String>> {
        self.store.get(NAMED_USER_ID_KEY)
    }

    pub fn change_token(&self) -> Result<Option<ChangeToken>> {
        self.ledger.current()
    }

    pub fn record(&self) -> Result<NamedUserRecord> {
        let _guard = self.guard();
        Ok(NamedUserRecord {
            id: self.id()?,
            change_token: self.ledger.current()?,
        })
    }

    /// Associate the device with `id`, or disassociate it when `id` is
    /// `None`. Invalid ids are logged and reported as
    /// [`SetIdOutcome::Rejected`].
    pub fn set_id(&self, id: Option<&str>) -> Result<SetIdOutcome> {
        let id = match id.map(str::trim) {
            None => None,
            Some(candidate) => match validate_id(candidate) {
                Ok(()) => Some(candidate),
                Err(reason) => {
                    error!(reason, "rejected named user id");
                    return Ok(SetIdOutcome::Rejected);
                }
            },
        };

        let _guard = self.guard();
        let current = self.id()?;
        if current.as_deref() == id && self.ledger.current()?.is_some() {
            debug!("named user id unchanged");
            return Ok(SetIdOutcome::Unchanged);
        }
        self.update_locked(id)?;
        Ok(SetIdOutcome::Updated)
    }

    /// Re-send the current identity even though nothing changed locally.
    pub fn force_update(&self) -> Result<()> {
        let _guard = self.guard();
        let token = self.ledger.refresh()?;
        info!(change_token = %token, "forcing named user update");
        self.dispatch(ACTION_UPDATE_NAMED_USER);
        Ok(())
    }

    /// Make sure the remote side knows this device has no named user when
    /// none has ever been recorded. Behaves like `set_id(None)`: once a token
    /// exists for the null identity this is a no-op. Returns whether an
    /// update was scheduled.
    pub fn disassociate_if_null(&self) -> Result<bool> {
        let _guard = self.guard();
        if self.id()?.is_some() || self.ledger.current()?.is_some() {
            return Ok(false);
        }
        self.update_locked(None)?;
        Ok(true)
    }

    pub fn edit_tag_groups(&self) -> TagGroupsEditor<'_> {
        TagGroupsEditor::new(self)
    }

    /// Build the job handler that reconciles this named user through
    /// `client`.
    pub fn job_handler(
        &self,
        channel: Channel,
        client: Arc<dyn NamedUserClient>,
    ) -> NamedUserJobHandler {
        NamedUserJobHandler::new(self.clone(), channel, client)
    }

    pub(crate) fn queue_tag_edits(&self, edits: Vec<TagGroupEdit>) -> Result<()> {
        {
            let _guard = self.guard();
            let token = self.ledger.current()?;
            self.tag_queue.push(token, edits)?;
        }
        self.dispatch(ACTION_APPLY_TAG_GROUP_CHANGES);
        Ok(())
    }

    pub(crate) fn tag_queue(&self) -> &TagEditQueue {
        &self.tag_queue
    }

    pub(crate) fn snapshot(&self) -> Result<Snapshot> {
        let _guard = self.guard();
        Ok(Snapshot {
            id: self.id()?,
            change_token: self.ledger.current()?,
            last_updated_token: self
                .store
                .get(LAST_UPDATED_TOKEN_KEY)?
                .map(ChangeToken::from),
        })
    }

    /// Record `token` as uploaded if it is still the current token. Returns
    /// false when a newer write superseded it.
    pub(crate) fn mark_uploaded(&self, token: &ChangeToken) -> Result<bool> {
        let _guard = self.guard();
        if !self.ledger.is_current(token)? {
            return Ok(false);
        }
        self.store.put(LAST_UPDATED_TOKEN_KEY, token.as_str())?;
        Ok(true)
    }

    pub(crate) fn dispatch(&self, action: &str) {
        self.dispatcher.dispatch(JobDescriptor::new(COMPONENT, action));
    }

    fn update_locked(&self, id: Option<&str>) -> Result<()> {
        let token = ChangeToken::generate();
        self.store.write_batch(&[
            (NAMED_USER_ID_KEY, id),
            (self.ledger.key(), Some(token.as_str())),
        ])?;
        info!(named_user = id.unwrap_or("<none>"), change_token = %token, "named user changed");
        self.dispatch(ACTION_CLEAR_PENDING_TAGS);
        self.dispatch(ACTION_UPDATE_NAMED_USER);
        Ok(())
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate_id(candidate: &str) -> std::result::Result<(), &'static str> {
    if candidate.is_empty() {
        return Err("id must not be blank");
    }
    if candidate.chars().count() > MAX_NAMED_USER_ID_LENGTH {
        return Err("id is longer than 128 characters");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
