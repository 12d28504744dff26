use std::sync::Arc;

use super::error::TallyResult;
use super::messages::{Keyed, WorkResult};

/// Runs a single unit of work, independently of any other unit.
///
/// Implement [`WorkExecutor`]; the local variant exists for executors that
/// never leave the current thread.
#[trait_variant::make(WorkExecutor: Send)]
pub trait LocalWorkExecutor {
    type Request: Keyed + Send + Sync + 'static;

    async fn execute(&mut self, request: &Self::Request) -> TallyResult<WorkResult>;
}

/// Builds a fresh executor. Called once when a worker is spawned and again on
/// every restart, so no state survives a failure.
pub type ExecutorFactory<E> = Arc<dyn Fn() -> E + Send + Sync>;
