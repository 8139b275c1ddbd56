//! Structured task group for independent reconciliation stages.

use super::CancellationToken;
use crate::errors::{DeployError, ErrorInfo};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

type Joined<T> = (usize, String, Result<T, DeployError>);

/// A group of independent tasks joined as one stage.
///
/// Every task shares a token derived from the parent token. The first failure
/// cancels the others as soon as it is observed, and [`TaskGroup::wait`] only
/// returns after every task has been joined, so callers never persist state
/// from a half-finished stage.
pub struct TaskGroup<T> {
    cancel_token: Arc<CancellationToken>,
    tasks: Mutex<JoinSet<Joined<T>>>,
    spawned: AtomicUsize,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Creates a new task group whose token follows `parent`.
    #[must_use]
    pub fn new(parent: &Arc<CancellationToken>) -> Self {
        Self {
            cancel_token: CancellationToken::child_of(parent),
            tasks: Mutex::new(JoinSet::new()),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Returns the group's cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Spawns a task in the group.
    pub fn spawn<F, Fut>(&self, name: &str, task: F)
    where
        F: FnOnce(Arc<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DeployError>> + Send + 'static,
    {
        let token = self.cancel_token.clone();
        let name = name.to_string();
        let index = self.spawned.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().spawn(async move {
            let outcome = match AssertUnwindSafe(task(token)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => Err(aborted(&name, "panicked")),
            };
            (index, name, outcome)
        });
    }

    /// Waits for every task and returns their results in spawn order.
    ///
    /// Tasks are joined in completion order; the first failure cancels the
    /// group token immediately. A cancellation error caused by a sibling's
    /// failure never masks the failure itself.
    pub async fn wait(&self) -> Result<Vec<T>, DeployError> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut results: Vec<(usize, T)> = Vec::with_capacity(tasks.len());
        let mut first_error: Option<DeployError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (name, outcome) = match joined {
                Ok((index, _, Ok(value))) => {
                    results.push((index, value));
                    continue;
                }
                Ok((_, name, Err(error))) => (name, error),
                Err(join_error) => {
                    ("<unknown>".to_string(), aborted("<unknown>", &join_error.to_string()))
                }
            };

            debug!(task = %name, error = %outcome, "Task in group failed");
            self.cancel_token.cancel(format!("task '{name}' failed: {outcome}"));
            let replace = match &first_error {
                None => true,
                Some(DeployError::Cancelled(_)) => !matches!(outcome, DeployError::Cancelled(_)),
                Some(_) => false,
            };
            if replace {
                first_error = Some(outcome);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => {
                results.sort_by_key(|(index, _)| *index);
                Ok(results.into_iter().map(|(_, value)| value).collect())
            }
        }
    }

    /// Returns the number of tasks not yet joined.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

fn aborted(name: &str, why: &str) -> DeployError {
    DeployError::terminal(
        format!("Task '{name}' aborted: {why}"),
        ErrorInfo::new("TASK-ABORTED", "A reconciliation task panicked or was aborted")
            .with_context_entry("task", name.to_string()),
    )
}

impl<T: 'static> std::fmt::Debug for TaskGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("task_count", &self.tasks.lock().len())
            .field("cancelled", &self.cancel_token.is_cancelled())
            .finish()
    }
}
