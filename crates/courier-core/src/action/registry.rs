use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::{ActionArguments, ActionResult};

/// A runnable action.
///
/// `perform` returns a `'static` future so the runner can drive it on its own
/// task; implementations clone whatever shared state they need into it.
pub trait Action: Send + Sync {
    /// Whether the action is willing to run with these arguments. Declined
    /// arguments resolve as `Rejected` without calling `perform`.
    fn accepts(&self, _args: &ActionArguments) -> bool {
        true
    }

    fn perform(&self, args: ActionArguments) -> BoxFuture<'static, ActionResult>;
}

/// Name → action lookup. Several names may point at the same action.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    entries: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `action` under every name in `names`, replacing any previous
    /// entry with the same name.
    pub fn register(&mut self, names: &[&str], action: Arc<dyn Action>) {
        for name in names {
            self.entries.insert((*name).to_string(), Arc::clone(&action));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
