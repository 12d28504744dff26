use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::{TallyConfig, DEFAULT_WORKER_BUFFER_SIZE};
use crate::supervision::{default_classifier, Classifier, RestartBudget};

use super::batch::BatchSession;
use super::collector::{collect_all, collect_with_deadline};
use super::error::{TallyResult, WorkError};
use super::executor::{ExecutorFactory, WorkExecutor};
use super::messages::{BatchResults, Message, WorkDescriptor, WorkerReport};
use super::response_handler::{BoxedResponseHandler, ResponseHandler};
use super::worker::{SupervisedWorker, WorkerRef};

/// Fans a batch of descriptors out to one supervised worker each and fans
/// the results back in.
///
/// The coordinator is the parent of every worker it spawns: it holds their
/// handles for the duration of the batch call and releases them when the
/// call returns. Failures stay with the descriptor that caused them; the only
/// error a batch call can return is a failure to start at all.
pub struct Coordinator<E: WorkExecutor> {
    factory: ExecutorFactory<E>,
    classifier: Classifier,
    budget: RestartBudget,
    buffer_size: usize,
    next_worker_id: u32,
}

impl<E> Coordinator<E>
where
    E: WorkExecutor<Request = WorkDescriptor> + 'static,
{
    pub fn new<F>(factory: F, budget: RestartBudget) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        Coordinator {
            factory: Arc::new(factory),
            classifier: default_classifier,
            budget,
            buffer_size: DEFAULT_WORKER_BUFFER_SIZE,
            next_worker_id: 0,
        }
    }

    pub fn from_config<F>(factory: F, config: &TallyConfig) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        Coordinator::new(factory, config.supervision.budget())
            .with_buffer_size(config.batch.worker_buffer_size)
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Run every descriptor and return within `deadline`, substituting
    /// `default_value` for anything that did not make it.
    pub async fn run_batch<I>(
        &mut self,
        descriptors: I,
        deadline: Duration,
        default_value: i64,
    ) -> TallyResult<BatchResults>
    where
        I: IntoIterator<Item = WorkDescriptor>,
    {
        let (session, workers) = self.dispatch(descriptors).await?;
        let results = collect_with_deadline(&session, deadline, default_value).await;
        self.release(workers);
        Ok(results)
    }

    /// Run every descriptor and wait for all of them. Descriptors whose
    /// worker gave up still get `default_value`.
    pub async fn run_batch_unbounded<I>(
        &mut self,
        descriptors: I,
        default_value: i64,
    ) -> TallyResult<BatchResults>
    where
        I: IntoIterator<Item = WorkDescriptor>,
    {
        let (session, workers) = self.dispatch(descriptors).await?;
        let results = collect_all(&session, default_value).await;
        self.release(workers);
        Ok(results)
    }

    async fn dispatch<I>(
        &mut self,
        descriptors: I,
    ) -> TallyResult<(Arc<BatchSession>, Vec<WorkerRef<WorkDescriptor>>)>
    where
        I: IntoIterator<Item = WorkDescriptor>,
    {
        tokio::runtime::Handle::try_current().map_err(|err| WorkError::StartupFailed {
            reason: format!("coordinator needs a tokio runtime: {}", err),
        })?;

        let descriptors = distinct(descriptors);
        let session = Arc::new(BatchSession::new(descriptors.clone()));
        info!(descriptors = descriptors.len() as u64; "Dispatching batch");

        let mut workers = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let worker = self.spawn_worker();
            let responder: BoxedResponseHandler<WorkerReport> = Arc::new(SlotFiller {
                session: Arc::clone(&session),
                key: descriptor.key.clone(),
            });
            let key = descriptor.key.clone();
            if let Err(err) = worker.send(Message::work(descriptor, Some(responder))).await {
                error!(worker = worker.id(), key = key.as_str(); "Failed to dispatch: {}", err);
                session.abandon(&key);
            }
            workers.push(worker);
        }
        Ok((session, workers))
    }

    fn spawn_worker(&mut self) -> WorkerRef<WorkDescriptor> {
        let id = self.next_worker_id;
        self.next_worker_id = self.next_worker_id.wrapping_add(1);
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let worker = SupervisedWorker::new(
            id,
            Arc::clone(&self.factory),
            self.classifier,
            self.budget,
            receiver,
        );
        WorkerRef::spawn(worker, sender)
    }

    /// Dropping the handles closes every mailbox. Workers still executing
    /// finish on their own and their results are discarded.
    fn release(&self, workers: Vec<WorkerRef<WorkDescriptor>>) {
        let lingering = workers.iter().filter(|worker| !worker.is_closed()).count();
        debug!(workers = workers.len() as u64, lingering = lingering as u64; "Releasing batch workers");
        drop(workers);
    }
}

/// Drop repeated descriptors, keeping the first occurrence.
fn distinct<I>(descriptors: I) -> Vec<WorkDescriptor>
where
    I: IntoIterator<Item = WorkDescriptor>,
{
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|descriptor| {
            let fresh = seen.insert(descriptor.key.clone());
            if !fresh {
                warn!(key = descriptor.key.as_str(); "Duplicate descriptor dropped from batch");
            }
            fresh
        })
        .collect()
}

/// The coordinator's end of a worker's reports for one slot.
#[derive(Debug)]
struct SlotFiller {
    session: Arc<BatchSession>,
    key: String,
}

#[async_trait]
impl ResponseHandler<WorkerReport> for SlotFiller {
    async fn handle(&self, report: WorkerReport) {
        match report {
            WorkerReport::Completed { worker_id, result } => {
                if !self.session.fill(result) {
                    debug!(worker = worker_id, key = self.key.as_str(); "Late result ignored");
                }
            }
            WorkerReport::Stopped { worker_id, key, reason } => {
                warn!(worker = worker_id, key = key.as_str(); "Worker stopped, slot left to the fallback: {}", reason);
                self.session.abandon(&key);
            }
            WorkerReport::Escalated { worker_id, key, reason } => {
                // escalation only ever costs the one descriptor
                error!(worker = worker_id, key = key.as_str(); "Escalated failure treated as stop: {}", reason);
                self.session.abandon(&key);
            }
        }
    }

    fn is_abandoned(&self) -> bool {
        self.session.is_filled(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::community::delay::MockDelayGenerator;
    use crate::workers::community::lookup::{VoteLookup, VoteTable};
    use crate::workers::messages::WorkResult;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    const HOWLERS: [&str; 4] = ["Mikey", "nom nom", "Panda", "Mr X"];

    fn howlers() -> Vec<WorkDescriptor> {
        HOWLERS.iter().map(|howler| WorkDescriptor::from(*howler)).collect()
    }

    fn lookup_coordinator(delays: HashMap<&'static str, u64>) -> Coordinator<VoteLookup> {
        let mut generator = MockDelayGenerator::new();
        generator
            .expect_next_delay()
            .returning(move |key| Duration::from_millis(delays.get(key).copied().unwrap_or(0)));
        let generator: Arc<MockDelayGenerator> = Arc::new(generator);
        let table = Arc::new(VoteTable::sample());
        Coordinator::new(
            move || VoteLookup::new(Arc::clone(&table), generator.clone(), 0.0),
            RestartBudget::default(),
        )
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        /// succeed with `value` after `delay`
        Answer { value: i64, delay: u64 },
        /// fail with a transient error after `delay`, forever
        AlwaysFail { delay: u64 },
        /// fail transiently `times` times, then answer
        FailThenAnswer { times: u32, value: i64 },
        Unexpected,
    }

    /// Per-key scripted executor. Call counts survive restarts.
    struct Scripted {
        script: Arc<HashMap<String, Behaviour>>,
        calls: Arc<HashMap<String, AtomicU32>>,
    }

    impl WorkExecutor for Scripted {
        type Request = WorkDescriptor;

        async fn execute(&mut self, request: &WorkDescriptor) -> TallyResult<WorkResult> {
            let call = self
                .calls
                .get(&request.key)
                .map(|calls| calls.fetch_add(1, Ordering::SeqCst))
                .unwrap_or(0);
            let transient = || WorkError::Transient {
                reason: "simulated io fault".to_string(),
            };
            match self.script.get(&request.key).copied() {
                Some(Behaviour::Answer { value, delay }) => {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(WorkResult::genuine(request.key.clone(), value, Duration::from_millis(delay)))
                }
                Some(Behaviour::AlwaysFail { delay }) => {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Err(transient())
                }
                Some(Behaviour::FailThenAnswer { times, value }) if call >= times => {
                    Ok(WorkResult::genuine(request.key.clone(), value, Duration::ZERO))
                }
                Some(Behaviour::FailThenAnswer { .. }) => Err(transient()),
                Some(Behaviour::Unexpected) => Err(WorkError::Unexpected {
                    reason: "scripted".to_string(),
                }),
                None => Err(WorkError::Rejected {
                    reason: "not scripted".to_string(),
                }),
            }
        }
    }

    fn scripted(
        script: &[(&str, Behaviour)],
        budget: RestartBudget,
    ) -> (Coordinator<Scripted>, Arc<HashMap<String, AtomicU32>>) {
        let calls: Arc<HashMap<String, AtomicU32>> = Arc::new(
            script
                .iter()
                .map(|(key, _)| (key.to_string(), AtomicU32::new(0)))
                .collect(),
        );
        let script: Arc<HashMap<String, Behaviour>> = Arc::new(
            script
                .iter()
                .map(|(key, behaviour)| (key.to_string(), *behaviour))
                .collect(),
        );
        let shared_calls = Arc::clone(&calls);
        let coordinator = Coordinator::new(
            move || Scripted {
                script: Arc::clone(&script),
                calls: Arc::clone(&shared_calls),
            },
            budget,
        );
        (coordinator, calls)
    }

    fn result<'a>(results: &'a BatchResults, key: &str) -> &'a WorkResult {
        &results[&WorkDescriptor::new(key)]
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_batch_within_deadline() {
        let delays = HashMap::from([("Mikey", 100), ("nom nom", 200), ("Panda", 300), ("Mr X", 400)]);
        let mut coordinator = lookup_coordinator(delays);

        let results = coordinator
            .run_batch(howlers(), Duration::from_millis(500), 42)
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(result(&results, "Mikey").value, 52);
        assert_eq!(result(&results, "nom nom").value, 105);
        assert_eq!(result(&results, "Panda").value, 0);
        assert_eq!(result(&results, "Mr X").value, 0);
        assert!(results.values().all(|result| !result.is_default));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_batch_with_stragglers() {
        let delays = HashMap::from([("Mikey", 100), ("nom nom", 900), ("Panda", 100), ("Mr X", 700)]);
        let mut coordinator = lookup_coordinator(delays);
        let deadline = Duration::from_millis(500);

        let started = Instant::now();
        let results = coordinator.run_batch(howlers(), deadline, 42).await.unwrap();
        let waited = started.elapsed();

        assert!(waited >= deadline && waited < deadline + Duration::from_millis(5));
        assert_eq!(results.len(), 4);
        assert_eq!(result(&results, "Mikey").value, 52);
        assert!(!result(&results, "Mikey").is_default);
        assert_eq!(result(&results, "Panda").value, 0);
        assert!(!result(&results, "Panda").is_default);
        for straggler in ["nom nom", "Mr X"] {
            let straggler = result(&results, straggler);
            assert!(straggler.is_default);
            assert_eq!(straggler.value, 42);
            assert_eq!(straggler.elapsed, deadline);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_batch_waits_for_everyone() {
        let delays = HashMap::from([("Mikey", 100), ("nom nom", 900)]);
        let mut coordinator = lookup_coordinator(delays);

        let started = Instant::now();
        let results = coordinator
            .run_batch_unbounded(vec!["Mikey".into(), "nom nom".into()], 42)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(900));
        assert_eq!(result(&results, "nom nom").value, 105);
        assert!(results.values().all(|result| !result.is_default));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_budget_exhaustion_defaults_the_slot() {
        let budget = RestartBudget::new(3, Duration::from_secs(1));
        let (mut coordinator, calls) = scripted(
            &[
                ("Panda", Behaviour::AlwaysFail { delay: 0 }),
                ("Mikey", Behaviour::Answer { value: 52, delay: 100 }),
            ],
            budget,
        );
        let deadline = Duration::from_millis(500);

        let started = Instant::now();
        let results = coordinator
            .run_batch(vec!["Panda".into(), "Mikey".into()], deadline, 42)
            .await
            .unwrap();

        assert!(started.elapsed() <= deadline);
        assert_eq!(calls["Panda"].load(Ordering::SeqCst), 4);
        let panda = result(&results, "Panda");
        assert!(panda.is_default);
        assert_eq!(panda.value, 42);
        assert!(!result(&results, "Mikey").is_default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_within_budget_yields_genuine_result() {
        let (mut coordinator, calls) = scripted(
            &[("Mikey", Behaviour::FailThenAnswer { times: 2, value: 52 })],
            RestartBudget::new(3, Duration::from_secs(1)),
        );

        let results = coordinator
            .run_batch(vec!["Mikey".into()], Duration::from_millis(500), 42)
            .await
            .unwrap();

        let mikey = result(&results, "Mikey");
        assert!(!mikey.is_default);
        assert_eq!(mikey.value, 52);
        assert_eq!(calls["Mikey"].load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarting_sibling_does_not_delay_others() {
        let (mut coordinator, _calls) = scripted(
            &[
                ("Panda", Behaviour::AlwaysFail { delay: 50 }),
                ("Mikey", Behaviour::Answer { value: 52, delay: 100 }),
            ],
            RestartBudget::new(1_000, Duration::from_secs(10)),
        );

        let results = coordinator
            .run_batch(vec!["Panda".into(), "Mikey".into()], Duration::from_millis(500), 42)
            .await
            .unwrap();

        assert_eq!(result(&results, "Mikey").value, 52);
        assert!(!result(&results, "Mikey").is_default);
        assert!(result(&results, "Panda").is_default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_only_costs_its_descriptor() {
        let (mut coordinator, _calls) = scripted(
            &[
                ("Mr X", Behaviour::Unexpected),
                ("nom nom", Behaviour::Answer { value: 105, delay: 10 }),
            ],
            RestartBudget::default(),
        );

        let results = coordinator
            .run_batch_unbounded(vec!["Mr X".into(), "nom nom".into()], 42)
            .await
            .unwrap();

        assert!(result(&results, "Mr X").is_default);
        assert_eq!(result(&results, "nom nom").value, 105);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_collapse_to_one_result() {
        let (mut coordinator, calls) = scripted(
            &[("Mikey", Behaviour::Answer { value: 52, delay: 10 })],
            RestartBudget::default(),
        );

        let results = coordinator
            .run_batch(
                vec!["Mikey".into(), "Mikey".into(), "Mikey".into()],
                Duration::from_millis(500),
                42,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(calls["Mikey"].load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_maximal_deadline_still_returns_a_mapping() {
        let (mut coordinator, _calls) = scripted(
            &[
                ("Mikey", Behaviour::Answer { value: 52, delay: 100 }),
                ("Mr X", Behaviour::Unexpected),
            ],
            RestartBudget::default(),
        );

        let results = coordinator
            .run_batch(vec!["Mikey".into(), "Mr X".into()], Duration::MAX, 42)
            .await
            .unwrap();

        assert_eq!(result(&results, "Mikey").value, 52);
        assert!(result(&results, "Mr X").is_default);
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty_mapping() {
        let (mut coordinator, _calls) = scripted(&[], RestartBudget::default());
        let results = coordinator
            .run_batch(Vec::new(), Duration::from_millis(500), 42)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
