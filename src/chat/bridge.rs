//! Blocking-call bridge: runs synchronous chat-model calls off the async runtime.
//!
//! Every call:
//! 1. Waits for a worker permit (suspends, never blocks, when all are taken)
//! 2. Runs the model on tokio's blocking pool via `spawn_blocking`
//! 3. Hands the outcome back as a single value or an ordered event channel
//!
//! The semaphore keeps in-flight calls at or below the size of the blocking
//! pool, so a saturated pool queues requests here instead of inside tokio.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task;
use tracing::{debug, info, warn};

use crate::chat::error::ChatError;
use crate::chat::model::{ChatModel, Fragments};
use crate::chat::request::GenerationRequest;
use crate::config::WorkerConfig;

/// A streamed generation event.
#[derive(Debug)]
pub enum GenerationEvent {
    /// The next fragment of generated text.
    Fragment(String),
    /// Generation is complete.
    Done { fragments: usize },
    /// Generation failed after it had started.
    Error(ChatError),
}

/// Dispatches model calls onto the bounded worker pool.
#[derive(Clone)]
pub struct BlockingBridge {
    model: Arc<dyn ChatModel>,
    permits: Arc<Semaphore>,
    channel_capacity: usize,
}

impl BlockingBridge {
    pub fn new(model: Arc<dyn ChatModel>, config: &WorkerConfig) -> Self {
        Self {
            model,
            permits: Arc::new(Semaphore::new(config.max_blocking_threads.max(1))),
            channel_capacity: config.channel_capacity.max(1),
        }
    }

    pub fn model(&self) -> &dyn ChatModel {
        self.model.as_ref()
    }

    /// Number of calls that could start right now without waiting.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop handing out permits. Calls waiting for one fail with [`ChatError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, ChatError> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChatError::PoolClosed)
    }

    /// Run a generation to completion on the worker pool.
    ///
    /// Resolves exactly once, with the text or with the model's error.
    pub async fn call(&self, request: GenerationRequest) -> Result<String, ChatError> {
        let permit = self.acquire().await?;
        let model = Arc::clone(&self.model);

        info!(
            request_id = request.request_id,
            prompt_chars = request.prompt.chars().count(),
            "Starting blocking call"
        );

        let result = task::spawn_blocking(move || {
            let _permit = permit;
            let _span =
                tracing::info_span!("chat_call", request_id = %request.request_id).entered();
            model.call(&request)
        })
        .await
        .map_err(|e| ChatError::Worker(e.to_string()))?;

        match &result {
            Ok(text) => debug!(chars = text.chars().count(), "Blocking call complete"),
            Err(e) => warn!("Blocking call failed: {e}"),
        }
        result
    }

    /// Start a streamed generation on the worker pool.
    ///
    /// Returns once the upstream stream is open; failures to open it are
    /// returned here. The receiver then yields fragments in generation order
    /// followed by exactly one `Done` or `Error`. Dropping the receiver stops
    /// the worker at its next send; the upstream call itself is not aborted.
    pub async fn stream(
        &self,
        request: GenerationRequest,
    ) -> Result<mpsc::Receiver<GenerationEvent>, ChatError> {
        let permit = self.acquire().await?;
        let model = Arc::clone(&self.model);
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let (opened_tx, opened_rx) = oneshot::channel();

        info!(
            request_id = request.request_id,
            prompt_chars = request.prompt.chars().count(),
            "Starting streamed call"
        );

        task::spawn_blocking(move || {
            let _permit = permit;
            let _span =
                tracing::info_span!("chat_stream", request_id = %request.request_id).entered();

            let fragments = match model.stream(&request) {
                Ok(fragments) => {
                    let _ = opened_tx.send(Ok(()));
                    fragments
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };

            // A panicking iterator must still end the channel with an `Error`.
            match panic::catch_unwind(AssertUnwindSafe(|| forward(fragments, &tx))) {
                Ok(Some(sent)) => {
                    let _ = tx.blocking_send(GenerationEvent::Done { fragments: sent });
                    info!(fragments = sent, "Streamed call complete");
                }
                Ok(None) => {}
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("Stream worker panicked: {message}");
                    let _ = tx.blocking_send(GenerationEvent::Error(ChatError::Worker(format!(
                        "worker panicked while streaming: {message}"
                    ))));
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| ChatError::Worker("worker exited before opening the stream".into()))??;

        Ok(rx)
    }
}

/// Push fragments into the channel until the source ends.
///
/// Returns the fragment count when the source is exhausted, or `None` when it
/// failed (the error has been sent) or the receiver went away.
fn forward(fragments: Fragments, tx: &mpsc::Sender<GenerationEvent>) -> Option<usize> {
    let mut sent = 0;
    for item in fragments {
        let event = match item {
            Ok(text) => GenerationEvent::Fragment(text),
            Err(e) => {
                warn!("Stream failed after {sent} fragments: {e}");
                let _ = tx.blocking_send(GenerationEvent::Error(e));
                return None;
            }
        };

        if tx.blocking_send(event).is_err() {
            // Receiver dropped, stop pulling fragments.
            debug!(sent, "Client went away, abandoning stream");
            return None;
        }
        sent += 1;
    }
    Some(sent)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Echoes the prompt and counts how many calls overlap.
    struct EchoModel {
        active: AtomicUsize,
        peak: Mutex<usize>,
    }

    impl EchoModel {
        fn new() -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: Mutex::new(0),
            }
        }
    }

    impl ChatModel for EchoModel {
        fn default_model(&self) -> &str {
            "echo"
        }

        fn call(&self, request: &GenerationRequest) -> Result<String, ChatError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut peak = self.peak.lock().unwrap();
                *peak = (*peak).max(now);
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(request.prompt.clone())
        }

        fn stream(&self, request: &GenerationRequest) -> Result<Fragments, ChatError> {
            let words: Vec<Result<String, ChatError>> = request
                .prompt
                .split(' ')
                .map(|w| Ok(format!("{w} ")))
                .collect();
            Ok(Box::new(words.into_iter()))
        }
    }

    fn bridge(model: Arc<dyn ChatModel>, workers: usize) -> BlockingBridge {
        BlockingBridge::new(
            model,
            &WorkerConfig {
                max_blocking_threads: workers,
                channel_capacity: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_call_returns_model_output() {
        let bridge = bridge(Arc::new(EchoModel::new()), 4);
        let text = bridge.call(GenerationRequest::new("ping")).await.unwrap();
        assert_eq!(text, "ping");
        assert_eq!(bridge.available_workers(), 4);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_permits() {
        let model = Arc::new(EchoModel::new());
        let bridge = bridge(model.clone(), 2);

        let calls = (0..6).map(|i| {
            let bridge = bridge.clone();
            async move { bridge.call(GenerationRequest::new(format!("req {i}"))).await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(*model.peak.lock().unwrap() <= 2);
    }

    #[tokio::test]
    async fn test_stream_preserves_order() {
        let bridge = bridge(Arc::new(EchoModel::new()), 1);
        let mut rx = bridge
            .stream(GenerationRequest::new("one two three four five"))
            .await
            .unwrap();

        let mut text = String::new();
        let mut done = None;
        while let Some(event) = rx.recv().await {
            match event {
                GenerationEvent::Fragment(f) => text.push_str(&f),
                GenerationEvent::Done { fragments } => done = Some(fragments),
                GenerationEvent::Error(e) => panic!("Unexpected error: {e}"),
            }
        }

        assert_eq!(text, "one two three four five ");
        assert_eq!(done, Some(5));
    }

    /// Streams one fragment, then its iterator panics.
    struct PanickingModel;

    impl ChatModel for PanickingModel {
        fn default_model(&self) -> &str {
            "panicking"
        }

        fn call(&self, _request: &GenerationRequest) -> Result<String, ChatError> {
            Ok(String::new())
        }

        fn stream(&self, _request: &GenerationRequest) -> Result<Fragments, ChatError> {
            let tail = std::iter::from_fn(|| -> Option<Result<String, ChatError>> {
                panic!("decoder blew up")
            });
            Ok(Box::new(std::iter::once(Ok("partial".to_string())).chain(tail)))
        }
    }

    /// Never runs out of fragments; counts how many were pulled.
    struct EndlessModel {
        pulled: Arc<AtomicUsize>,
    }

    impl ChatModel for EndlessModel {
        fn default_model(&self) -> &str {
            "endless"
        }

        fn call(&self, _request: &GenerationRequest) -> Result<String, ChatError> {
            Ok(String::new())
        }

        fn stream(&self, _request: &GenerationRequest) -> Result<Fragments, ChatError> {
            let pulled = Arc::clone(&self.pulled);
            Ok(Box::new(std::iter::from_fn(move || {
                std::thread::sleep(std::time::Duration::from_millis(5));
                let n = pulled.fetch_add(1, Ordering::SeqCst);
                Some(Ok(format!("tok{n} ")))
            })))
        }
    }

    #[tokio::test]
    async fn test_stream_panic_ends_with_error() {
        let bridge = bridge(Arc::new(PanickingModel), 1);
        let mut rx = bridge
            .stream(GenerationRequest::new("anything"))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], GenerationEvent::Fragment(f) if f == "partial"));
        assert!(
            matches!(&events[1], GenerationEvent::Error(ChatError::Worker(m)) if m.contains("decoder blew up"))
        );
        assert_eq!(bridge.available_workers(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_stops_worker() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let bridge = bridge(
            Arc::new(EndlessModel {
                pulled: Arc::clone(&pulled),
            }),
            1,
        );

        let mut rx = bridge.stream(GenerationRequest::new("go")).await.unwrap();
        assert!(matches!(rx.recv().await, Some(GenerationEvent::Fragment(_))));
        drop(rx);

        // The worker notices at its next send and hands its permit back.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while bridge.available_workers() < 1 {
            assert!(tokio::time::Instant::now() < deadline, "worker never stopped");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        // One received, up to the channel capacity buffered, one failed send.
        let stopped_at = pulled.load(Ordering::SeqCst);
        assert!(stopped_at <= 4, "pulled {stopped_at} fragments");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(pulled.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_calls() {
        let bridge = bridge(Arc::new(EchoModel::new()), 1);
        bridge.close();
        let err = bridge.call(GenerationRequest::new("late")).await.unwrap_err();
        assert!(matches!(err, ChatError::PoolClosed));
    }
}
