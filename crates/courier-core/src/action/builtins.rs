//! Actions every registry ships with.
//!
//! | name                | alias | effect                          |
//! |---------------------|-------|---------------------------------|
//! | `add_tags_action`   | `^+t` | add device or named-user tags    |
//! | `remove_tags_action`| `^-t` | remove device or named-user tags |
//!
//! A string or an array of strings edits the device tags. An object maps
//! tag groups to tags and edits the named user's tag groups.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::{Action, ActionRegistry};
use super::{ActionArguments, ActionResult};
use crate::channel::Channel;
use crate::error::Result;
use crate::named_user::NamedUser;

pub const ADD_TAGS_ACTION: &str = "add_tags_action";
pub const ADD_TAGS_ALIAS: &str = "^+t";
pub const REMOVE_TAGS_ACTION: &str = "remove_tags_action";
pub const REMOVE_TAGS_ALIAS: &str = "^-t";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagOp {
    Add,
    Remove,
}

pub struct TagsAction {
    op: TagOp,
    channel: Channel,
    named_user: NamedUser,
}

impl TagsAction {
    pub fn add(channel: Channel, named_user: NamedUser) -> Self {
        Self {
            op: TagOp::Add,
            channel,
            named_user,
        }
    }

    pub fn remove(channel: Channel, named_user: NamedUser) -> Self {
        Self {
            op: TagOp::Remove,
            channel,
            named_user,
        }
    }
}

impl Action for TagsAction {
    fn accepts(&self, args: &ActionArguments) -> bool {
        match args.value() {
            Value::String(_) => true,
            Value::Array(items) => items.iter().all(Value::is_string),
            Value::Object(groups) => groups.values().all(|tags| string_list(tags).is_some()),
            _ => false,
        }
    }

    fn perform(&self, args: ActionArguments) -> BoxFuture<'static, ActionResult> {
        let op = self.op;
        let channel = self.channel.clone();
        let named_user = self.named_user.clone();
        async move {
            let applied = tokio::task::spawn_blocking(move || {
                apply_tags(op, &channel, &named_user, args.value())
            })
            .await;
            match applied {
                Ok(Ok(())) => ActionResult::empty(),
                Ok(Err(e)) => {
                    warn!(error = %e, "tag action failed");
                    ActionResult::error(e.to_string())
                }
                Err(e) => {
                    warn!(error = %e, "tag action task failed");
                    ActionResult::error(format!("tag action task failed: {e}"))
                }
            }
        }
        .boxed()
    }
}

fn apply_tags(op: TagOp, channel: &Channel, named_user: &NamedUser, value: &Value) -> Result<()> {
    if let Value::Object(groups) = value {
        let mut editor = named_user.edit_tag_groups();
        for (group, tags) in groups {
            let tags = string_list(tags).unwrap_or_default();
            editor = match op {
                TagOp::Add => editor.add_tags(group, tags),
                TagOp::Remove => editor.remove_tags(group, tags),
            };
        }
        return editor.apply();
    }

    let tags = string_list(value).unwrap_or_default();
    let updated = match op {
        TagOp::Add => channel.add_tags(tags)?,
        TagOp::Remove => channel.remove_tags(tags)?,
    };
    debug!(tags = updated.len(), "device tags edited");
    Ok(())
}

/// A single string or an array of strings.
fn string_list(value: &Value) -> Option<Vec<&str>> {
    match value {
        Value::String(s) => Some(vec![s.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

impl ActionRegistry {
    /// A registry holding the tag actions under their names and aliases.
    pub fn with_builtins(channel: Channel, named_user: NamedUser) -> Self {
        let mut registry = Self::new();
        registry.register(
            &[ADD_TAGS_ACTION, ADD_TAGS_ALIAS],
            Arc::new(TagsAction::add(channel.clone(), named_user.clone())),
        );
        registry.register(
            &[REMOVE_TAGS_ACTION, REMOVE_TAGS_ALIAS],
            Arc::new(TagsAction::remove(channel, named_user)),
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionStatus, Situation};
    use crate::job::{JobDispatcher, JobWorker, RetryPolicy};
    use crate::store::{MemoryStore, ThreadTrackingStore};
    use serde_json::json;

    fn setup() -> (Channel, NamedUser, JobWorker) {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, worker) = JobDispatcher::new(RetryPolicy::default());
        (
            Channel::new(store.clone()),
            NamedUser::new(store, dispatcher),
            worker,
        )
    }

    fn args(value: Value) -> ActionArguments {
        ActionArguments::new(value, Situation::PushReceived)
    }

    #[test]
    fn registry_exposes_names_and_aliases() {
        let (channel, user, _worker) = setup();
        let registry = ActionRegistry::with_builtins(channel, user);
        assert_eq!(
            registry.names(),
            ["^+t", "^-t", "add_tags_action", "remove_tags_action"]
        );
    }

    #[test]
    fn accepts_only_tag_shaped_values() {
        let (channel, user, _worker) = setup();
        let action = TagsAction::add(channel, user);
        assert!(action.accepts(&args(json!("vip"))));
        assert!(action.accepts(&args(json!(["a", "b"]))));
        assert!(action.accepts(&args(json!({ "loyalty": ["gold"], "region": "eu" }))));
        assert!(!action.accepts(&args(json!(42))));
        assert!(!action.accepts(&args(json!(["a", 1]))));
        assert!(!action.accepts(&args(json!({ "loyalty": { "nested": true } }))));
        assert!(!action.accepts(&args(Value::Null)));
    }

    #[tokio::test]
    async fn device_tags_are_added_and_removed() {
        let (channel, user, _worker) = setup();
        let add = TagsAction::add(channel.clone(), user.clone());
        let remove = TagsAction::remove(channel.clone(), user);

        let result = add.perform(args(json!(["vip", "beta"]))).await;
        assert_eq!(result.status(), ActionStatus::Completed);
        remove.perform(args(json!("beta"))).await;

        assert_eq!(channel.tags().unwrap().into_iter().collect::<Vec<_>>(), ["vip"]);
    }

    #[tokio::test]
    async fn object_values_edit_named_user_tag_groups() {
        let (channel, user, mut worker) = setup();
        user.set_id(Some("alice")).unwrap();
        while worker.try_next().is_some() {}

        let add = TagsAction::add(channel.clone(), user.clone());
        add.perform(args(json!({ "loyalty": ["gold"], "region": "eu" })))
            .await;

        assert!(channel.tags().unwrap().is_empty());
        let entries = user.tag_queue().entries().unwrap();
        assert_eq!(entries.len(), 1);
        let groups: Vec<&str> = entries[0].edits.iter().map(|e| e.group.as_str()).collect();
        assert_eq!(groups, ["loyalty", "region"]);
        assert_eq!(
            worker.try_next().map(|job| job.action().to_string()).as_deref(),
            Some("apply_tag_group_changes")
        );
    }

    #[tokio::test]
    async fn tag_edits_touch_the_store_off_the_runtime_thread() {
        let store = Arc::new(ThreadTrackingStore::default());
        let (dispatcher, _worker) = JobDispatcher::new(RetryPolicy::default());
        let channel = Channel::new(store.clone());
        let user = NamedUser::new(store.clone(), dispatcher);
        let add = TagsAction::add(channel.clone(), user);

        let result = add.perform(args(json!(["vip"]))).await;
        assert_eq!(result.status(), ActionStatus::Completed);
        assert!(store.accesses() > 0);
        assert!(!store.touched_on(std::thread::current().id()));
        assert_eq!(channel.tags().unwrap().len(), 1);
    }
}
