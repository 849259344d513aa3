//! Speech output control
//!
//! At most one speak task exists at a time. Starting a new one cancels the
//! previous task and waits for it to end before the new one begins, so
//! playback never overlaps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::voice::SpeechSink;

/// Reported by a speak task when it ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechCompletion {
    /// Task that ended
    pub task_id: u64,
    /// Whether it was cut short
    pub cancelled: bool,
    /// Synthesis or playback failure, if any
    pub error: Option<String>,
}

type CompletionHook = Arc<dyn Fn(SpeechCompletion) + Send + Sync>;

#[derive(Debug)]
struct TaskState {
    id: u64,
    cancel: CancellationToken,
    done: Mutex<bool>,
    finished: Condvar,
}

/// Handle to a running (or finished) speak task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    inner: Arc<TaskState>,
}

impl TaskHandle {
    fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(TaskState {
                id,
                cancel: CancellationToken::new(),
                done: Mutex::new(false),
                finished: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether the task is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        !*lock(&self.inner.done)
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Request cancellation without waiting
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// Block until the task ends
    pub fn join(&self) {
        let done = lock(&self.inner.done);
        drop(
            self.inner
                .finished
                .wait_while(done, |done| !*done)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    /// Block until the task ends or `timeout` elapses; true if it ended
    #[must_use]
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let done = lock(&self.inner.done);
        let (done, _) = self
            .inner
            .finished
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *done
    }

    fn mark_done(&self) {
        *lock(&self.inner.done) = true;
        self.inner.finished.notify_all();
    }
}

/// Owns the single speak task
pub struct SpeechOutputController {
    sink: Arc<dyn SpeechSink>,
    current: Mutex<Option<TaskHandle>>,
    next_id: AtomicU64,
    on_complete: Option<CompletionHook>,
}

impl SpeechOutputController {
    #[must_use]
    pub fn new(sink: Arc<dyn SpeechSink>) -> Self {
        Self {
            sink,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            on_complete: None,
        }
    }

    /// Call `hook` from the speak thread whenever a task ends
    #[must_use]
    pub fn on_complete(mut self, hook: impl Fn(SpeechCompletion) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Start speaking `text`
    ///
    /// Any current task is cancelled and joined first.
    pub fn speak(&self, text: &str) -> TaskHandle {
        let mut current = lock(&self.current);
        if let Some(previous) = current.take() {
            previous.cancel();
            let started = Instant::now();
            previous.join();
            tracing::debug!(task = previous.id(), waited = ?started.elapsed(), "previous speech stopped");
        }

        let handle = TaskHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let task = handle.clone();
        let sink = Arc::clone(&self.sink);
        let hook = self.on_complete.clone();
        let text = text.to_string();

        tracing::debug!(task = handle.id(), chars = text.len(), "speaking");

        let spawned = std::thread::Builder::new()
            .name("aerion-speak".to_string())
            .spawn(move || {
                let result = sink.speak(&text, &task.inner.cancel);
                let completion = SpeechCompletion {
                    task_id: task.id(),
                    cancelled: task.is_cancelled(),
                    error: result.err().map(|e| e.to_string()),
                };
                if let Some(error) = &completion.error {
                    tracing::warn!(task = task.id(), error, "speech failed");
                }
                task.mark_done();
                if let Some(hook) = hook {
                    hook(completion);
                }
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn speak thread");
            handle.mark_done();
            if let Some(hook) = &self.on_complete {
                hook(SpeechCompletion {
                    task_id: handle.id(),
                    cancelled: false,
                    error: Some(e.to_string()),
                });
            }
        }

        *current = Some(handle.clone());
        handle
    }

    /// Cancel the current task, if any, without waiting
    ///
    /// Safe to call repeatedly.
    pub fn cancel_current(&self) {
        if let Some(task) = lock(&self.current).as_ref() {
            if task.is_active() && !task.is_cancelled() {
                tracing::debug!(task = task.id(), "cancelling speech");
            }
            task.cancel();
        }
    }

    /// Whether a task is still playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        lock(&self.current).as_ref().is_some_and(TaskHandle::is_active)
    }

    /// Number of live tasks (0 or 1)
    #[must_use]
    pub fn active_count(&self) -> usize {
        usize::from(self.is_speaking())
    }

    /// Handle to the most recent task
    #[must_use]
    pub fn current(&self) -> Option<TaskHandle> {
        lock(&self.current).clone()
    }

    /// Cancel and wait for the current task
    pub fn shutdown(&self) {
        let current = lock(&self.current).take();
        if let Some(task) = current {
            task.cancel();
            task.join();
        }
    }
}

impl Drop for SpeechOutputController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
