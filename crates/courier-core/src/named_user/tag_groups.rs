//! Named-user tag-group edits.
//!
//! Edits are queued in the store together with the change token that was
//! current when they were committed. When the queue is flushed, entries whose
//! token no longer matches the named user's current token are discarded: they
//! were made for an identity that has since been replaced.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use super::NamedUser;
use crate::error::Result;
use crate::ledger::ChangeToken;
use crate::store::KeyValueStore;

pub(crate) const QUEUED_TAG_EDITS_KEY: &str = "named_user.queued_tag_edits";

// ---------------------------------------------------------------------------
// TagGroupEdit
// ---------------------------------------------------------------------------

/// Tags to add to and remove from one group. A tag is never in both sets;
/// the most recent operation on a tag wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroupEdit {
    pub group: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub add: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub remove: BTreeSet<String>,
}

impl TagGroupEdit {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            add: BTreeSet::new(),
            remove: BTreeSet::new(),
        }
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        self.remove.remove(&tag);
        self.add.insert(tag);
    }

    pub fn remove_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        self.add.remove(&tag);
        self.remove.insert(tag);
    }

    /// Fold a later edit of the same group into this one.
    pub fn merge(&mut self, later: &TagGroupEdit) {
        for tag in &later.add {
            self.add_tag(tag.clone());
        }
        for tag in &later.remove {
            self.remove_tag(tag.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Merge edits per group, keeping groups in first-seen order and dropping
/// groups that end up empty.
pub fn collapse(edits: impl IntoIterator<Item = TagGroupEdit>) -> Vec<TagGroupEdit> {
    let mut merged: Vec<TagGroupEdit> = Vec::new();
    for edit in edits {
        match merged.iter_mut().find(|m| m.group == edit.group) {
            Some(existing) => existing.merge(&edit),
            None => merged.push(edit),
        }
    }
    merged.retain(|e| !e.is_empty());
    merged
}

// ---------------------------------------------------------------------------
// TagGroupsEditor
// ---------------------------------------------------------------------------

/// Builder returned by [`NamedUser::edit_tag_groups`]. Nothing is queued
/// until [`apply`](Self::apply).
#[must_use = "tag edits are discarded unless applied"]
pub struct TagGroupsEditor<'a> {
    named_user: &'a NamedUser,
    edits: Vec<TagGroupEdit>,
}

impl<'a> TagGroupsEditor<'a> {
    pub(crate) fn new(named_user: &'a NamedUser) -> Self {
        Self {
            named_user,
            edits: Vec::new(),
        }
    }

    pub fn add_tag(self, group: &str, tag: &str) -> Self {
        self.add_tags(group, [tag])
    }

    pub fn add_tags<'t>(mut self, group: &str, tags: impl IntoIterator<Item = &'t str>) -> Self {
        if let Some(edit) = self.edit_for(group) {
            for tag in clean_tags(tags) {
                edit.add_tag(tag);
            }
        }
        self
    }

    pub fn remove_tag(self, group: &str, tag: &str) -> Self {
        self.remove_tags(group, [tag])
    }

    pub fn remove_tags<'t>(
        mut self,
        group: &str,
        tags: impl IntoIterator<Item = &'t str>,
    ) -> Self {
        if let Some(edit) = self.edit_for(group) {
            for tag in clean_tags(tags) {
                edit.remove_tag(tag);
            }
        }
        self
    }

    /// Queue the edits against the current change token and schedule the
    /// upload.
    pub fn apply(self) -> Result<()> {
        let edits = collapse(self.edits);
        if edits.is_empty() {
            return Ok(());
        }
        self.named_user.queue_tag_edits(edits)
    }

    fn edit_for(&mut self, group: &str) -> Option<&mut TagGroupEdit> {
        let group = group.trim();
        if group.is_empty() {
            warn!("tag group name must not be empty, ignoring edit");
            return None;
        }
        if let Some(pos) = self.edits.iter().position(|e| e.group == group) {
            return self.edits.get_mut(pos);
        }
        self.edits.push(TagGroupEdit::new(group));
        self.edits.last_mut()
    }
}

fn clean_tags<'t>(tags: impl IntoIterator<Item = &'t str>) -> Vec<String> {
    tags.into_iter()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// TagEditQueue
// ---------------------------------------------------------------------------

/// One committed batch of edits and the token it was committed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTagEdit {
    pub id: String,
    pub change_token: Option<ChangeToken>,
    pub edits: Vec<TagGroupEdit>,
    pub queued_at: DateTime<Utc>,
}

/// Persisted queue of committed tag edits, shared by the named user and its
/// job handler.
#[derive(Clone)]
pub struct TagEditQueue {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl TagEditQueue {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn push(&self, change_token: Option<ChangeToken>, edits: Vec<TagGroupEdit>) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        entries.push(QueuedTagEdit {
            id: Uuid::new_v4().to_string(),
            change_token,
            edits,
            queued_at: Utc::now(),
        });
        self.write(&entries)
    }

    pub fn entries(&self) -> Result<Vec<QueuedTagEdit>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read()
    }

    /// Drop every entry captured under a token other than `current` and
    /// return the survivors along with the number discarded.
    pub fn discard_stale(
        &self,
        current: Option<&ChangeToken>,
    ) -> Result<(Vec<QueuedTagEdit>, usize)> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = self.read()?;
        let before = entries.len();
        let kept: Vec<QueuedTagEdit> = entries
            .into_iter()
            .filter(|e| e.change_token.as_ref() == current)
            .collect();
        let discarded = before - kept.len();
        if discarded > 0 {
            self.write(&kept)?;
        }
        Ok((kept, discarded))
    }

    /// Remove the entries with the given ids; entries queued since are kept.
    pub fn remove(&self, ids: &[String]) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        entries.retain(|e| !ids.contains(&e.id));
        self.write(&entries)
    }

    /// Drop everything. Returns the number of entries removed.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let count = self.read()?.len();
        self.store.remove(QUEUED_TAG_EDITS_KEY)?;
        Ok(count)
    }

    fn read(&self) -> Result<Vec<QueuedTagEdit>> {
        match self.store.get(QUEUED_TAG_EDITS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(&self, entries: &[QueuedTagEdit]) -> Result<()> {
        if entries.is_empty() {
            return self.store.remove(QUEUED_TAG_EDITS_KEY);
        }
        let raw = serde_json::to_string(entries)?;
        self.store.put(QUEUED_TAG_EDITS_KEY, &raw)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
