use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use rand::Rng;
use tokio::time::Instant;

use crate::config::LookupConfig;
use crate::workers::error::{TallyResult, WorkError};
use crate::workers::executor::WorkExecutor;
use crate::workers::messages::{WorkDescriptor, WorkResult};

use super::delay::DelayGenerator;

/// Vote counts per howler. Unknown howlers count `missing_value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteTable {
    votes: HashMap<String, i64>,
    missing_value: i64,
}

impl VoteTable {
    pub fn new(votes: HashMap<String, i64>, missing_value: i64) -> Self {
        VoteTable {
            votes,
            missing_value,
        }
    }

    /// The two howlers everybody knows about.
    pub fn sample() -> Self {
        let votes = [("Mikey", 52), ("nom nom", 105)]
            .into_iter()
            .map(|(howler, count)| (howler.to_string(), count))
            .collect();
        VoteTable::new(votes, 0)
    }

    pub fn from_config(config: &LookupConfig) -> Self {
        VoteTable::new(config.votes.clone(), config.missing_value)
    }

    pub fn vote_for(&self, howler: &str) -> i64 {
        self.votes
            .get(howler)
            .copied()
            .unwrap_or(self.missing_value)
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

/// Looks a howler up in the vote table as if the table were remote: every
/// call waits for a simulated network delay and may fail with a transient
/// fault, independently of earlier calls.
pub struct VoteLookup {
    table: Arc<VoteTable>,
    delays: Arc<dyn DelayGenerator>,
    failure_rate: f64,
}

impl VoteLookup {
    pub fn new(table: Arc<VoteTable>, delays: Arc<dyn DelayGenerator>, failure_rate: f64) -> Self {
        VoteLookup {
            table,
            delays,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    fn faulted(&self) -> bool {
        self.failure_rate > 0.0 && rand::thread_rng().gen_bool(self.failure_rate)
    }
}

impl WorkExecutor for VoteLookup {
    type Request = WorkDescriptor;

    async fn execute(&mut self, request: &WorkDescriptor) -> TallyResult<WorkResult> {
        let started = Instant::now();
        let delay = self.delays.next_delay(&request.key);
        tokio::time::sleep(delay).await;

        if self.faulted() {
            return Err(WorkError::Transient {
                reason: format!("lookup of '{}' hit a simulated I/O fault", request.key),
            });
        }
        let value = self.table.vote_for(&request.key);
        debug!(key = request.key.as_str(), value = value; "Lookup finished after {:?}", delay);
        Ok(WorkResult::genuine(request.key.clone(), value, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::community::delay::{FixedDelay, MockDelayGenerator};
    use std::time::Duration;

    #[test]
    fn test_vote_with_default() {
        let table = VoteTable::sample();
        assert_eq!(table.vote_for("Mikey"), 52);
        assert_eq!(table.vote_for("nom nom"), 105);
        assert_eq!(table.vote_for("Panda"), 0);
    }

    #[test]
    fn test_table_from_config() {
        let mut config = LookupConfig::default();
        config.missing_value = -1;
        config.votes.insert("Panda".to_string(), 3);
        let table = VoteTable::from_config(&config);
        assert_eq!(table.vote_for("Panda"), 3);
        assert_eq!(table.vote_for("Mr X"), -1);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_waits_for_the_simulated_delay() {
        let mut delays = MockDelayGenerator::new();
        delays
            .expect_next_delay()
            .withf(|key: &str| key == "Mikey")
            .times(1)
            .returning(|_| Duration::from_millis(300));
        let mut lookup = VoteLookup::new(Arc::new(VoteTable::sample()), Arc::new(delays), 0.0);

        let result = lookup.execute(&WorkDescriptor::new("Mikey")).await.unwrap();
        assert_eq!(result.value, 52);
        assert!(!result.is_default);
        assert!(result.elapsed >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_faulty_lookup_is_transient() {
        let mut lookup = VoteLookup::new(
            Arc::new(VoteTable::sample()),
            Arc::new(FixedDelay(Duration::ZERO)),
            1.0,
        );
        let result = lookup.execute(&WorkDescriptor::new("Mikey")).await;
        assert!(matches!(result, Err(WorkError::Transient { .. })));
    }
}
