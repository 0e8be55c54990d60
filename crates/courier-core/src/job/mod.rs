//! Deduplicating background job queue.
//!
//! Components hand [`JobDescriptor`]s to a [`JobDispatcher`]; a single
//! [`JobWorker`] drains them in order and routes each one to the
//! [`JobHandler`] registered for its component. While a descriptor is queued
//! and not yet started, further descriptors with the same [`JobKey`] are
//! dropped.

pub mod dispatcher;
pub mod retry;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use dispatcher::{JobDispatcher, JobWorker};
pub use retry::RetryPolicy;

/// Deduplication identity of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub component: String,
    pub action: String,
}

/// A unit of deferred work for one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    component: String,
    action: String,
    #[serde(default)]
    extras: Map<String, Value>,
    /// Attempts already made; 0 for a freshly dispatched job.
    #[serde(default)]
    attempt: u32,
}

impl JobDescriptor {
    pub fn new(component: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
            extras: Map::new(),
            attempt: 0,
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    pub fn key(&self) -> JobKey {
        JobKey {
            component: self.component.clone(),
            action: self.action.clone(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub(crate) fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Retry,
    Failure,
}

/// Performs the jobs dispatched for one component.
pub trait JobHandler: Send + Sync {
    fn perform<'a>(&'a self, job: &'a JobDescriptor) -> BoxFuture<'a, JobOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_extras_and_attempt() {
        let a = JobDescriptor::new("named_user", "update_named_user").with_extra("x", json!(1));
        let b = JobDescriptor::new("named_user", "update_named_user").next_attempt();
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);
    }

    #[test]
    fn key_distinguishes_component_and_action() {
        let a = JobDescriptor::new("named_user", "update_named_user");
        let b = JobDescriptor::new("named_user", "apply_tag_group_changes");
        let c = JobDescriptor::new("channel", "update_named_user");
        assert_ne!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
