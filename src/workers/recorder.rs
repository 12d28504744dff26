use std::sync::{Arc, Weak};

use log::{info, warn};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::TallyConfig;
use crate::supervision::{sink_classifier, RestartBudget};

use super::community::sink_writer::SinkWriter;
use super::error::{TallyResult, WorkError};
use super::executor::ExecutorFactory;
use super::messages::{Message, WorkerReport};
use super::response_handler::from_oneshot;
use super::sink::{Sink, Vote};
use super::worker::{Handoff, SupervisedWorker, WorkerRef};

type VoteMessage = Message<Vote, WorkerReport>;

/// A small pool of supervised writers in front of a sink.
///
/// Votes are routed round-robin. A writer that ran out of restarts is
/// replaced by a fresh one, either as soon as its receipt says so or the
/// next time a vote is routed to its closed mailbox. Votes that were queued
/// behind the failing one are handed back and routed again.
pub struct VoteRecorder {
    pool: Arc<Mutex<WriterPool>>,
    writers: usize,
}

struct WriterPool {
    factory: ExecutorFactory<SinkWriter>,
    budget: RestartBudget,
    buffer_size: usize,
    handoff: Handoff<Vote>,
    writers: Vec<WorkerRef<Vote>>,
    next_writer: usize,
    next_worker_id: u32,
}

impl VoteRecorder {
    pub fn start(
        sink: Arc<dyn Sink>,
        writers: usize,
        budget: RestartBudget,
        buffer_size: usize,
    ) -> TallyResult<Self> {
        tokio::runtime::Handle::try_current().map_err(|err| WorkError::StartupFailed {
            reason: format!("recorder needs a tokio runtime: {}", err),
        })?;
        if writers == 0 {
            return Err(WorkError::StartupFailed {
                reason: "recorder needs at least one writer".to_string(),
            });
        }

        let (handoff, returned) = mpsc::unbounded_channel();
        let factory: ExecutorFactory<SinkWriter> =
            Arc::new(move || SinkWriter::new(Arc::clone(&sink)));
        let mut pool = WriterPool {
            factory,
            budget,
            buffer_size: buffer_size.max(1),
            handoff,
            writers: Vec::with_capacity(writers),
            next_writer: 0,
            next_worker_id: 0,
        };
        for _ in 0..writers {
            let writer = pool.spawn_writer();
            pool.writers.push(writer);
        }
        let pool = Arc::new(Mutex::new(pool));
        tokio::spawn(reroute(Arc::downgrade(&pool), returned));
        info!(writers = writers as u64; "Vote recorder started");
        Ok(VoteRecorder { pool, writers })
    }

    pub fn from_config(sink: Arc<dyn Sink>, config: &TallyConfig) -> TallyResult<Self> {
        VoteRecorder::start(
            sink,
            config.recorder.writers,
            config.supervision.budget(),
            config.batch.worker_buffer_size,
        )
    }

    pub fn writers(&self) -> usize {
        self.writers
    }

    /// Queue a vote without waiting for the write.
    pub async fn record(&self, vote: Vote) -> TallyResult<()> {
        self.pool
            .lock()
            .await
            .route(Message::work(vote, None))
            .await
            .map(|_| ())
    }

    /// Queue a vote and wait for the writer's report on it.
    pub async fn record_with_receipt(&self, vote: Vote) -> TallyResult<WorkerReport> {
        let (tx, rx) = oneshot::channel();
        let (slot, writer_id) = self
            .pool
            .lock()
            .await
            .route(Message::work(vote, Some(from_oneshot(tx))))
            .await?;
        let report = rx.await.map_err(|err| WorkError::ChannelError {
            reason: format!("writer dropped the vote without a report: {}", err),
        })?;
        if !matches!(report, WorkerReport::Completed { .. }) {
            // the writer is on its way out; don't route anything else to it
            self.pool.lock().await.replace_if_current(slot, writer_id);
        }
        Ok(report)
    }

    /// Ask every writer to stop once its queued votes are written.
    pub async fn shutdown(self) {
        let pool = self.pool.lock().await;
        for writer in &pool.writers {
            if writer.stop().await.is_err() {
                info!(worker = writer.id(); "Writer already gone at shutdown");
            }
        }
        info!("Vote recorder shut down");
    }
}

impl WriterPool {
    /// Send to the next writer in turn, replacing closed writers on the way.
    /// Returns the slot and id of the writer that took the message.
    async fn route(&mut self, mut message: VoteMessage) -> TallyResult<(usize, u32)> {
        for _ in 0..=self.writers.len() {
            let slot = self.next_writer % self.writers.len();
            self.next_writer = self.next_writer.wrapping_add(1);

            if self.writers[slot].is_closed() {
                self.replace_writer(slot);
            }
            match self.writers[slot].deliver(message).await {
                Ok(()) => return Ok((slot, self.writers[slot].id())),
                Err(returned) => message = returned,
            }
        }
        Err(WorkError::ChannelError {
            reason: "no writer accepted the vote".to_string(),
        })
    }

    fn replace_if_current(&mut self, slot: usize, writer_id: u32) {
        if self.writers[slot].id() == writer_id {
            self.replace_writer(slot);
        }
    }

    fn replace_writer(&mut self, slot: usize) {
        warn!(worker = self.writers[slot].id(); "Replacing writer that stopped");
        self.writers[slot] = self.spawn_writer();
    }

    fn spawn_writer(&mut self) -> WorkerRef<Vote> {
        let id = self.next_worker_id;
        self.next_worker_id = self.next_worker_id.wrapping_add(1);
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let worker = SupervisedWorker::new(
            id,
            Arc::clone(&self.factory),
            sink_classifier,
            self.budget,
            receiver,
        )
        .with_handoff(self.handoff.clone());
        WorkerRef::spawn(worker, sender)
    }
}

/// Route votes handed back by stopped writers until every writer is gone.
async fn reroute(
    pool: Weak<Mutex<WriterPool>>,
    mut returned: mpsc::UnboundedReceiver<VoteMessage>,
) {
    while let Some(message) = returned.recv().await {
        let howler = message
            .payload
            .as_ref()
            .map(|vote| vote.howler.clone())
            .unwrap_or_default();
        let Some(live) = pool.upgrade() else {
            warn!(key = howler.as_str(); "Recorder is gone, dropping handed-back vote");
            continue;
        };
        let routed = live.lock().await.route(message).await;
        if let Err(err) = routed {
            warn!(key = howler.as_str(); "Could not re-route vote: {}", err);
        }
    }
}
