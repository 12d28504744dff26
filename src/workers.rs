pub mod batch;
pub mod collector;
pub mod community;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod messages;
pub mod recorder;
pub mod response_handler;
pub mod sink;
pub mod worker;

pub mod api {
    use std::sync::Arc;

    use log::info;

    use crate::config::TallyConfig;

    use super::community::delay::DelayGenerator;
    use super::community::lookup::{VoteLookup, VoteTable};
    use super::coordinator::Coordinator;
    use super::error::TallyResult;
    use super::messages::{BatchResults, WorkDescriptor};
    use super::recorder::VoteRecorder;
    use super::sink::{Sink, UnreliableSink};

    /// Coordinator for vote lookups against `table`, with delays drawn from `delays`.
    pub fn start_vote_coordinator(
        config: &TallyConfig,
        table: VoteTable,
        delays: Arc<dyn DelayGenerator>,
    ) -> Coordinator<VoteLookup> {
        let table = Arc::new(table);
        let failure_rate = config.lookup.failure_rate;
        info!(howlers = table.len() as u64; "Starting vote coordinator");
        Coordinator::from_config(
            move || VoteLookup::new(Arc::clone(&table), Arc::clone(&delays), failure_rate),
            config,
        )
    }

    /// Bounded batch using the configured deadline and default value.
    pub async fn run_batch(
        coordinator: &mut Coordinator<VoteLookup>,
        config: &TallyConfig,
        howlers: &[&str],
    ) -> TallyResult<BatchResults> {
        coordinator
            .run_batch(
                howlers.iter().map(|howler| WorkDescriptor::from(*howler)),
                config.batch.deadline(),
                config.batch.default_value,
            )
            .await
    }

    pub async fn run_batch_unbounded(
        coordinator: &mut Coordinator<VoteLookup>,
        config: &TallyConfig,
        howlers: &[&str],
    ) -> TallyResult<BatchResults> {
        coordinator
            .run_batch_unbounded(
                howlers.iter().map(|howler| WorkDescriptor::from(*howler)),
                config.batch.default_value,
            )
            .await
    }

    pub fn start_vote_recorder(
        config: &TallyConfig,
        sink: Arc<dyn Sink>,
    ) -> TallyResult<VoteRecorder> {
        VoteRecorder::from_config(sink, config)
    }

    /// The lousy vote database used by the demo.
    pub fn lousy_sink(config: &TallyConfig) -> Arc<UnreliableSink> {
        Arc::new(UnreliableSink::new(
            "http://votedb/lousy",
            config.recorder.sink_failure_rate,
        ))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::workers::community::delay::FixedDelay;
        use crate::workers::sink::Vote;
        use std::time::Duration;

        #[tokio::test(start_paused = true)]
        async fn test_api_batch_uses_configured_default() {
            let mut config = TallyConfig::default();
            config.batch.deadline_ms = 100;
            let mut coordinator = start_vote_coordinator(
                &config,
                VoteTable::sample(),
                Arc::new(FixedDelay(Duration::from_millis(300))),
            );

            let results = run_batch(&mut coordinator, &config, &["Mikey", "Panda"])
                .await
                .unwrap();
            assert_eq!(results.len(), 2);
            assert!(results.values().all(|result| result.is_default));
            assert!(results.values().all(|result| result.value == config.batch.default_value));
        }

        #[tokio::test(start_paused = true)]
        async fn test_api_unbounded_batch_is_genuine() {
            let config = TallyConfig::default();
            let mut coordinator = start_vote_coordinator(
                &config,
                VoteTable::sample(),
                Arc::new(FixedDelay(Duration::from_millis(300))),
            );

            let results = run_batch_unbounded(&mut coordinator, &config, &["Mikey", "nom nom"])
                .await
                .unwrap();
            assert_eq!(results[&WorkDescriptor::new("Mikey")].value, 52);
            assert_eq!(results[&WorkDescriptor::new("nom nom")].value, 105);
        }

        #[tokio::test]
        async fn test_api_recorder_writes_to_sink() {
            let mut config = TallyConfig::default();
            config.recorder.sink_failure_rate = 0.0;
            let sink = lousy_sink(&config);
            let recorder = start_vote_recorder(&config, sink.clone()).unwrap();

            recorder
                .record_with_receipt(Vote::new(1, 1, "Panda"))
                .await
                .unwrap();
            assert_eq!(sink.records().len(), 1);
            assert_eq!(sink.url(), "http://votedb/lousy");
        }
    }
}
