//! Scheduler (Actor Loop)
//!
//! A single-consumer task queue. Every actor, the discovery service and the
//! node itself own one. Tasks are zero-argument closures executed strictly in
//! submission order by exactly one worker, never concurrently with each
//! other, which is what makes actor state safe to touch without locks.
//!
//! The worker is a Tokio task draining an unbounded channel. A panicking task
//! is logged and counted; the loop carries on with the next one. Stopping sets
//! a flag that the worker checks before each task, so the task in flight
//! completes and everything queued behind it is dropped.
//!
//! # Round-trips
//!
//! - [`Scheduler::submit`]: fire and forget
//! - [`Scheduler::call`]: await the result from async code
//! - [`Scheduler::submit_and_await`]: block a foreign thread until the task
//!   ran; refused with [`SchedulerError::Reentrant`] from the target's own
//!   loop, where it could never complete

use crate::error::SchedulerError;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Loop whose task is executing on this thread, if any
    static CURRENT_LOOP: Cell<Option<u64>> = const { Cell::new(None) };
}

struct LoopGuard {
    previous: Option<u64>,
}

impl LoopGuard {
    fn enter(id: u64) -> Self {
        let previous = CURRENT_LOOP.with(|c| c.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|c| c.set(self.previous));
    }
}

/// Task counters
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub tasks_submitted: AtomicU64,
    pub tasks_run: AtomicU64,
    pub tasks_failed: AtomicU64,
}

/// Point-in-time copy of [`SchedulerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub tasks_submitted: u64,
    pub tasks_run: u64,
    pub tasks_failed: u64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_run: self.tasks_run.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    id: u64,
    name: String,
    stopped: AtomicBool,
    metrics: SchedulerMetrics,
}

/// Handle to a single-consumer loop; cheap to clone
#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Task>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Scheduler {
    /// Start a loop on the current Tokio runtime
    pub fn new(name: impl Into<String>) -> Result<Self, SchedulerError> {
        let name = name.into();
        match Handle::try_current() {
            Ok(handle) => Ok(Self::with_handle(name, &handle)),
            Err(_) => Err(SchedulerError::NoRuntime { name }),
        }
    }

    /// Start a loop on an explicit runtime
    pub fn with_handle(name: impl Into<String>, handle: &Handle) -> Self {
        let shared = Arc::new(Shared {
            id: NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            stopped: AtomicBool::new(false),
            metrics: SchedulerMetrics::default(),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        handle.spawn(run_loop(Arc::clone(&shared), rx));
        debug!(scheduler = %shared.name, "Scheduler started");
        Self { tx, shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Whether the calling thread is currently running a task of this loop
    pub fn is_current(&self) -> bool {
        CURRENT_LOOP.with(|c| c.get()) == Some(self.shared.id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.metrics.snapshot()
    }

    /// Enqueue a task; never blocks
    pub fn submit<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_stopped() {
            return Err(self.stopped());
        }
        self.tx.send(Box::new(task)).map_err(|_| self.stopped())?;
        self.shared.metrics.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Run `task` on the loop and await its result
    pub async fn call<F, R>(&self, task: F) -> Result<R, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let rx = self.submit_with_reply(task)?;
        self.settle(rx.await)
    }

    /// Run `task` on the loop, blocking the calling thread until it finished
    ///
    /// Intended for threads outside the runtime. A panic inside the task is
    /// reported as [`SchedulerError::TaskPanicked`].
    pub fn submit_and_await<F, R>(&self, task: F) -> Result<R, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Err(SchedulerError::Reentrant {
                name: self.shared.name.clone(),
            });
        }
        let rx = self.submit_with_reply(task)?;
        self.settle(futures::executor::block_on(rx))
    }

    /// Stop accepting tasks; the task in flight completes
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wake the worker so it observes the flag even when idle.
        let _ = self.tx.send(Box::new(|| {}));
        debug!(scheduler = %self.shared.name, "Scheduler stopping");
    }

    fn submit_with_reply<F, R>(
        &self,
        task: F,
    ) -> Result<oneshot::Receiver<std::thread::Result<R>>, SchedulerError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(move || {
            let outcome = catch_unwind(AssertUnwindSafe(task));
            let _ = reply_tx.send(outcome);
        })?;
        Ok(reply_rx)
    }

    fn settle<R>(
        &self,
        received: Result<std::thread::Result<R>, oneshot::error::RecvError>,
    ) -> Result<R, SchedulerError> {
        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => {
                self.shared.metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
                Err(SchedulerError::TaskPanicked {
                    name: self.shared.name.clone(),
                    message: panic_message(panic.as_ref()),
                })
            }
            Err(_) => Err(SchedulerError::Dropped {
                name: self.shared.name.clone(),
            }),
        }
    }

    fn stopped(&self) -> SchedulerError {
        SchedulerError::Stopped {
            name: self.shared.name.clone(),
        }
    }
}

async fn run_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = rx.recv().await {
        if shared.stopped.load(Ordering::Acquire) {
            break;
        }

        let _guard = LoopGuard::enter(shared.id);
        match catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                shared.metrics.tasks_run.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                shared.metrics.tasks_run.fetch_add(1, Ordering::Relaxed);
                shared.metrics.tasks_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    scheduler = %shared.name,
                    panic = %panic_message(panic.as_ref()),
                    "Task panicked; loop continues"
                );
            }
        }
        trace!(scheduler = %shared.name, "Task completed");
    }

    rx.close();
    debug!(
        scheduler = %shared.name,
        dropped = rx.len(),
        "Scheduler loop exited"
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
