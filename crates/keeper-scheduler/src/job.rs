use async_trait::async_trait;

use crate::types::RunOutcome;

/// Work the engine launches each time an entry fires.
///
/// Implementations report failure through [`RunOutcome::Failed`]; a panic is
/// caught by the engine and recorded the same way.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> RunOutcome;
}
