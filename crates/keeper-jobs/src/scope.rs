use std::sync::Arc;

use async_trait::async_trait;
use keeper_scheduler::{RunOutcome, ScheduledJob};
use keeper_store::{JobStore, StoreContext};
use tracing::{debug, error};

/// A task that needs a store scope for the length of one run.
#[async_trait]
pub trait ScopedTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, store: &JobStore) -> RunOutcome;
}

#[async_trait]
impl<T: ScopedTask + ?Sized> ScopedTask for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn run(&self, store: &JobStore) -> RunOutcome {
        (**self).run(store).await
    }
}

/// Runs a [`ScopedTask`] inside a fresh store scope.
///
/// The scope is acquired before the task starts and dropped when it ends,
/// on success, failure or unwind alike.
pub struct Scoped<T> {
    ctx: StoreContext,
    task: T,
}

impl<T: ScopedTask> Scoped<T> {
    pub fn new(ctx: StoreContext, task: T) -> Self {
        Self { ctx, task }
    }

    pub fn task(&self) -> &T {
        &self.task
    }
}

#[async_trait]
impl<T: ScopedTask> ScheduledJob for Scoped<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn run(&self) -> RunOutcome {
        let store = match self.ctx.scope() {
            Ok(store) => store,
            Err(e) => {
                error!(task = %self.task.name(), "cannot open store scope: {e}");
                return RunOutcome::Failed(format!("store scope: {e}"));
            }
        };
        let outcome = self.task.run(&store).await;
        drop(store);
        debug!(task = %self.task.name(), "store scope released");
        outcome
    }
}
