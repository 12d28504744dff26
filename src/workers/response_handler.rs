use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// Trait for handling reports coming back from workers.
/// Workers only ever see this trait, never the session or channel behind it.
#[async_trait]
pub trait ResponseHandler<Response: Send + Debug>: Send + Sync + Debug {
    /// Called when a response is received from a worker.
    async fn handle(&self, response: Response);

    /// Whether the answer is still wanted. A worker asks this before
    /// restarting, and gives up when nobody is waiting any more.
    fn is_abandoned(&self) -> bool {
        false
    }
}

/// A boxed response handler - allows storing different handler types together.
pub type BoxedResponseHandler<Response> = Arc<dyn ResponseHandler<Response>>;

/// Wrap a oneshot sender into a boxed response handler.
pub fn from_oneshot<Response: Send + Debug + 'static>(
    tx: tokio::sync::oneshot::Sender<Response>,
) -> BoxedResponseHandler<Response> {
    Arc::new(OneshotResponseHandler(tokio::sync::Mutex::new(Some(tx))))
}

#[derive(Debug)]
struct OneshotResponseHandler<Response: Send + Debug>(
    tokio::sync::Mutex<Option<tokio::sync::oneshot::Sender<Response>>>,
);

#[async_trait]
impl<Response: Send + Debug + 'static> ResponseHandler<Response>
    for OneshotResponseHandler<Response>
{
    async fn handle(&self, response: Response) {
        let mut guard = self.0.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(response);
        }
    }

    fn is_abandoned(&self) -> bool {
        // A busy lock means a response is being delivered right now.
        match self.0.try_lock() {
            Ok(guard) => guard.as_ref().map_or(true, |tx| tx.is_closed()),
            Err(_) => false,
        }
    }
}
