use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, Semaphore};
use tracing::{instrument, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};

/// Dispatches one message's payload. Implemented by whatever drives the
/// agent runner — the queue itself has no idea what a "chat" or "agent" is.
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, payload: T) -> std::result::Result<(), String>;
}

struct Entry<T> {
    id: String,
    payload: T,
    attempt: u32,
}

struct State<T> {
    /// Per-chat FIFO of not-yet-dispatched messages.
    queues: HashMap<String, VecDeque<Entry<T>>>,
    /// Chat ids with at least one queued message and no in-flight dispatch,
    /// in the order they became ready — this is the "first-queued entry of
    /// each chat" global fairness rule (§4.5).
    ready: VecDeque<String>,
    ready_set: HashSet<String>,
    /// Chats with a dispatch currently running.
    in_flight: HashSet<String>,
    total_len: usize,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            ready: VecDeque::new(),
            ready_set: HashSet::new(),
            in_flight: HashSet::new(),
            total_len: 0,
        }
    }

    fn mark_ready(&mut self, chat_id: &str) {
        if self.in_flight.contains(chat_id) {
            return;
        }
        if self.ready_set.insert(chat_id.to_string()) {
            self.ready.push_back(chat_id.to_string());
        }
    }
}

/// Per-chat FIFO message queue with at-most-one-in-flight-per-chat and a
/// global concurrency cap (§4.5).
pub struct MessageQueue<T: Send + 'static> {
    config: QueueConfig,
    state: Mutex<State<T>>,
    notify: Notify,
    permits: Semaphore,
}

impl<T: Send + Clone + 'static> MessageQueue<T> {
    pub fn new(config: QueueConfig) -> Arc<Self> {
        let max_concurrent = config.max_concurrent;
        Arc::new(Self {
            config,
            state: Mutex::new(State::new()),
            notify: Notify::new(),
            permits: Semaphore::new(max_concurrent),
        })
    }

    /// Enqueues `payload` for `chat_id`. Fails fast once the global queue
    /// size reaches `max_queue_size`.
    #[instrument(skip(self, payload), fields(chat_id = %chat_id))]
    pub async fn enqueue(&self, chat_id: &str, id: &str, payload: T) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.total_len >= self.config.max_queue_size {
            return Err(QueueError::Full {
                size: state.total_len,
                max: self.config.max_queue_size,
            });
        }
        state
            .queues
            .entry(chat_id.to_string())
            .or_default()
            .push_back(Entry {
                id: id.to_string(),
                payload,
                attempt: 0,
            });
        state.total_len += 1;
        state.mark_ready(chat_id);
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    /// Runs the dispatch loop until the returned handle is dropped or the
    /// process shuts down. Spawns one Tokio task per in-flight dispatch,
    /// bounded by `max_concurrent` via the internal semaphore.
    pub async fn run(self: Arc<Self>, handler: Arc<dyn MessageHandler<T>>) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                loop {
                    if let Some(chat_id) = state.ready.pop_front() {
                        state.ready_set.remove(&chat_id);
                        let Some(queue) = state.queues.get_mut(&chat_id) else { continue };
                        let Some(entry) = queue.pop_front() else { continue };
                        state.total_len -= 1;
                        state.in_flight.insert(chat_id.clone());
                        break Some((chat_id, entry));
                    } else {
                        break None;
                    }
                }
            };

            let Some((chat_id, entry)) = next else {
                self.notify.notified().await;
                continue;
            };

            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let this = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                this.dispatch_one(chat_id, entry, handler).await;
            });
        }
    }

    #[instrument(skip(self, entry, handler), fields(chat_id = %chat_id, attempt = entry.attempt))]
    async fn dispatch_one(
        &self,
        chat_id: String,
        mut entry: Entry<T>,
        handler: Arc<dyn MessageHandler<T>>,
    ) {
        let timeout = std::time::Duration::from_millis(self.config.processing_timeout_ms);
        let result = tokio::time::timeout(timeout, handler.handle(entry.payload.clone())).await;

        let outcome = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!("dispatch timed out after {}ms", self.config.processing_timeout_ms)),
        };

        let mut state = self.state.lock().await;
        state.in_flight.remove(&chat_id);

        if let Err(reason) = outcome {
            entry.attempt += 1;
            if entry.attempt <= self.config.max_retries {
                warn!(chat_id = %chat_id, id = %entry.id, attempt = entry.attempt, error = %reason, "dispatch failed, retrying");
                state
                    .queues
                    .entry(chat_id.clone())
                    .or_default()
                    .push_front(entry);
                state.total_len += 1;
            } else {
                warn!(chat_id = %chat_id, id = %entry.id, retries = self.config.max_retries, error = %reason, "dispatch retries exhausted, dropping message");
            }
        }

        if state
            .queues
            .get(&chat_id)
            .map(|q| !q.is_empty())
            .unwrap_or(false)
        {
            state.mark_ready(&chat_id);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Total number of messages currently queued (not counting in-flight ones).
    pub async fn len(&self) -> usize {
        self.state.lock().await.total_len
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl MessageHandler<String> for CountingHandler {
        async fn handle(&self, _payload: String) -> std::result::Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err("simulated failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn enqueue_fails_fast_past_max_queue_size() {
        let queue = MessageQueue::<String>::new(QueueConfig {
            max_queue_size: 2,
            max_concurrent: 1,
            processing_timeout_ms: 1_000,
            max_retries: 0,
        });
        queue.enqueue("c1", "m1", "a".to_string()).await.unwrap();
        queue.enqueue("c1", "m2", "b".to_string()).await.unwrap();
        let err = queue.enqueue("c1", "m3", "c".to_string()).await.unwrap_err();
        assert!(matches!(err, QueueError::Full { .. }));
    }

    #[tokio::test]
    async fn processes_messages_across_chats_concurrently() {
        let queue = MessageQueue::<String>::new(QueueConfig::default());
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_first_n: 0,
        });

        for i in 0..5 {
            queue
                .clone()
                .enqueue(&format!("c{i}"), &format!("m{i}"), "hi".to_string())
                .await
                .unwrap();
        }

        let runner = tokio::spawn(queue.clone().run(handler.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        runner.abort();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn retries_failed_dispatch_up_to_max_retries() {
        let queue = MessageQueue::<String>::new(QueueConfig {
            max_queue_size: 10,
            max_concurrent: 1,
            processing_timeout_ms: 1_000,
            max_retries: 2,
        });
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail_first_n: 2,
        });

        queue.enqueue("c1", "m1", "x".to_string()).await.unwrap();
        let runner = tokio::spawn(queue.clone().run(handler.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        runner.abort();

        // first attempt + 2 retries = 3 total calls, last one succeeds
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty().await);
    }
}
