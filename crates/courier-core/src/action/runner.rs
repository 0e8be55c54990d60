use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{ActionArguments, ActionRegistry, ActionResult};

type Callback = Box<dyn FnOnce(ActionResult) + Send>;

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Single-resolution completion for one action run.
///
/// `finish` consumes the handle, so a result can be delivered at most once.
/// A handle dropped without `finish` resolves itself with an `Error` result,
/// so the receiving side always hears back exactly once.
pub struct Completion {
    callback: Option<Callback>,
}

impl Completion {
    pub fn new(callback: impl FnOnce(ActionResult) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// A completion whose result arrives on the returned receiver.
    pub fn channel() -> (Self, oneshot::Receiver<ActionResult>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    pub fn finish(mut self, result: ActionResult) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            warn!("action completion dropped without a result");
            callback(ActionResult::error("action finished without reporting a result"));
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRunner
// ---------------------------------------------------------------------------

/// Runs a single named action. Must not block the caller; the result is
/// delivered through `completion`, exactly once.
pub trait ActionRunner: Send + Sync {
    fn run(&self, name: &str, args: ActionArguments, completion: Completion);
}

/// Default runner: resolves names against an [`ActionRegistry`] and drives
/// each action on its own tokio task.
#[derive(Clone)]
pub struct RegistryRunner {
    registry: Arc<ActionRegistry>,
}

impl RegistryRunner {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }
}

impl ActionRunner for RegistryRunner {
    fn run(&self, name: &str, args: ActionArguments, completion: Completion) {
        let Some(action) = self.registry.get(name) else {
            debug!(action = %name, "no action registered, rejecting");
            completion.finish(ActionResult::rejected());
            return;
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| action.accepts(&args))) {
            Ok(true) => {}
            Ok(false) => {
                debug!(action = %name, situation = %args.situation(), "action declined arguments");
                completion.finish(ActionResult::rejected());
                return;
            }
            Err(_) => {
                warn!(action = %name, "action panicked while checking arguments");
                completion.finish(ActionResult::error("action panicked"));
                return;
            }
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(action = %name, "no async runtime available to run action");
            completion.finish(ActionResult::error("no async runtime available"));
            return;
        };

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| action.perform(args))) {
            Ok(future) => future,
            Err(_) => {
                warn!(action = %name, "action panicked before starting");
                completion.finish(ActionResult::error("action panicked"));
                return;
            }
        };

        let name = name.to_string();
        handle.spawn(async move {
            // Run on a nested task so a panic surfaces as a JoinError.
            let result = match tokio::spawn(future).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(action = %name, error = %e, "action task failed");
                    ActionResult::error(format!("action task failed: {e}"))
                }
            };
            debug!(action = %name, status = ?result.status(), "action finished");
            completion.finish(result);
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
