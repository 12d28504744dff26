use std::sync::Arc;

use tokio::time::Instant;

use crate::workers::error::TallyResult;
use crate::workers::executor::WorkExecutor;
use crate::workers::messages::WorkResult;
use crate::workers::sink::{Sink, Vote};

/// Writes one vote per request. The result value is the number of records written.
pub struct SinkWriter {
    sink: Arc<dyn Sink>,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        SinkWriter { sink }
    }
}

impl WorkExecutor for SinkWriter {
    type Request = Vote;

    async fn execute(&mut self, vote: &Vote) -> TallyResult<WorkResult> {
        let started = Instant::now();
        self.sink.insert(&[vote.to_record()])?;
        Ok(WorkResult::genuine(vote.howler.clone(), 1, started.elapsed()))
    }
}
