use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::supervision::{
    Classifier, Directive, RestartBudget, SupervisionState, WorkerEvent, WorkerState,
};

use super::error::{TallyResult, WorkError};
use super::executor::{ExecutorFactory, WorkExecutor};
use super::messages::{Keyed, Message, WorkerReport};
use super::response_handler::BoxedResponseHandler;

type Mailbox<R> = mpsc::Receiver<Message<R, WorkerReport>>;

/// Where a worker returns the requests still queued in its mailbox when it stops.
pub type Handoff<R> = mpsc::UnboundedSender<Message<R, WorkerReport>>;

/// A worker that wraps one executor and restarts it according to its
/// classifier and restart budget.
///
/// The worker handles one request at a time. Once a request is done it goes
/// back to idle and waits for the next message; it stops when asked to, when
/// its mailbox closes, or when a failure is classified as Stop or Escalate.
/// Requests still queued when it stops go to its handoff if it has one;
/// otherwise their responders get a `Stopped` report.
pub struct SupervisedWorker<E: WorkExecutor> {
    id: u32,
    factory: ExecutorFactory<E>,
    executor: E,
    classifier: Classifier,
    budget: RestartBudget,
    supervision: SupervisionState,
    state: WorkerState,
    receiver: Mailbox<E::Request>,
    handoff: Option<Handoff<E::Request>>,
}

impl<E: WorkExecutor + 'static> SupervisedWorker<E> {
    pub fn new(
        id: u32,
        factory: ExecutorFactory<E>,
        classifier: Classifier,
        budget: RestartBudget,
        receiver: Mailbox<E::Request>,
    ) -> Self {
        let executor = factory();
        SupervisedWorker {
            id,
            factory,
            executor,
            classifier,
            budget,
            supervision: SupervisionState::new(),
            state: WorkerState::Idle,
            receiver,
            handoff: None,
        }
    }

    pub fn with_handoff(mut self, handoff: Handoff<E::Request>) -> Self {
        self.handoff = Some(handoff);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn restarts(&self) -> u32 {
        self.supervision.attempts()
    }

    pub async fn run(&mut self) {
        while let Some(message) = self.receiver.recv().await {
            if message.stop {
                info!(worker = self.id; "Worker received stop message");
                self.transition(WorkerEvent::Terminated);
                break;
            }
            if let Some(request) = message.payload {
                let report = self.handle(request, message.responder.as_ref()).await;
                if let Some(responder) = message.responder {
                    responder.handle(report).await;
                }
            }
            if self.state == WorkerState::Stopped {
                break;
            }
        }
        self.transition(WorkerEvent::Terminated);
        self.drain().await;
        debug!(worker = self.id; "Worker terminated");
    }

    /// Close the mailbox and dispose of everything still queued in it.
    async fn drain(&mut self) {
        self.receiver.close();
        // after close, recv yields what is buffered or in flight, then None
        while let Some(message) = self.receiver.recv().await {
            let key = match message.payload.as_ref() {
                Some(request) => request.key().to_string(),
                None => continue,
            };
            let message = match &self.handoff {
                Some(handoff) => match handoff.send(message) {
                    Ok(()) => {
                        debug!(worker = self.id, key = key.as_str(); "Queued request handed back");
                        continue;
                    }
                    Err(returned) => returned.0,
                },
                None => message,
            };
            warn!(worker = self.id, key = key.as_str(); "Worker stopped before handling queued request");
            if let Some(responder) = message.responder {
                let reason = WorkError::ChannelError {
                    reason: format!("worker {} stopped before handling the request", self.id),
                };
                responder
                    .handle(WorkerReport::Stopped {
                        worker_id: self.id,
                        key,
                        reason,
                    })
                    .await;
            }
        }
    }

    async fn handle(
        &mut self,
        request: E::Request,
        responder: Option<&BoxedResponseHandler<WorkerReport>>,
    ) -> WorkerReport {
        loop {
            self.transition(WorkerEvent::Dispatched);
            let error = match self.executor.execute(&request).await {
                Ok(result) => {
                    self.transition(WorkerEvent::Succeeded);
                    return WorkerReport::Completed {
                        worker_id: self.id,
                        result,
                    };
                }
                Err(error) => error,
            };

            let (directive, reason) = self.classify(error);
            self.transition(WorkerEvent::Failed(directive));
            match directive {
                Directive::Restart if responder.is_some_and(|r| r.is_abandoned()) => {
                    info!(worker = self.id, key = request.key(); "Nobody is waiting for the result, not restarting");
                    self.transition(WorkerEvent::Terminated);
                    return WorkerReport::Stopped {
                        worker_id: self.id,
                        key: request.key().to_string(),
                        reason,
                    };
                }
                Directive::Restart => self.restart(&reason),
                Directive::Stop => {
                    warn!(worker = self.id, key = request.key(); "Worker stopped: {}", reason);
                    return WorkerReport::Stopped {
                        worker_id: self.id,
                        key: request.key().to_string(),
                        reason,
                    };
                }
                Directive::Escalate => {
                    warn!(worker = self.id, key = request.key(); "Worker escalated: {}", reason);
                    return WorkerReport::Escalated {
                        worker_id: self.id,
                        key: request.key().to_string(),
                        reason,
                    };
                }
            }
        }
    }

    /// A restart that does not fit in the budget turns into a stop.
    fn classify(&mut self, error: WorkError) -> (Directive, WorkError) {
        match (self.classifier)(&error) {
            Directive::Restart => match self.supervision.record_restart(&self.budget, Instant::now()) {
                Ok(_) => (Directive::Restart, error),
                Err(exceeded) => (Directive::Stop, exceeded),
            },
            directive => (directive, error),
        }
    }

    fn restart(&mut self, reason: &WorkError) {
        info!(worker = self.id, attempt = self.supervision.attempts(); "Worker is restarting after: {}", reason);
        self.executor = (self.factory)();
    }

    fn transition(&mut self, event: WorkerEvent) {
        let next = self.state.next(event);
        if next != self.state {
            debug!(worker = self.id; "{:?} -> {:?}", self.state, next);
        }
        self.state = next;
    }
}

/// Handle to a spawned worker. Dropping every handle closes the mailbox; the
/// worker finishes whatever it is doing and then exits.
#[derive(Debug)]
pub struct WorkerRef<R> {
    id: u32,
    sender: mpsc::Sender<Message<R, WorkerReport>>,
}

impl<R: Send + 'static> WorkerRef<R> {
    /// Spawn `worker` on the current runtime.
    pub fn spawn<E>(mut worker: SupervisedWorker<E>, sender: mpsc::Sender<Message<R, WorkerReport>>) -> Self
    where
        E: WorkExecutor<Request = R> + 'static,
    {
        let id = worker.id();
        info!(worker = id; "Spawning supervised worker");
        tokio::spawn(async move {
            worker.run().await;
        });
        WorkerRef { id, sender }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn send(&self, message: Message<R, WorkerReport>) -> TallyResult<()> {
        self.sender
            .send(message)
            .await
            .map_err(|err| WorkError::ChannelError {
                reason: format!("worker {} mailbox closed: {}", self.id, err),
            })
    }

    /// Like [`WorkerRef::send`], but gives the message back if the mailbox is closed.
    pub async fn deliver(
        &self,
        message: Message<R, WorkerReport>,
    ) -> Result<(), Message<R, WorkerReport>> {
        self.sender.send(message).await.map_err(|returned| returned.0)
    }

    pub async fn stop(&self) -> TallyResult<()> {
        self.send(Message::stop()).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
