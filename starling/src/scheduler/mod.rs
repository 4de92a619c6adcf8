//! # Task Scheduler Module
//!
//! Admission control for the work a node executes locally.
//!
//! ## Key Concepts
//! - Concurrency cap: at most `concurrency_limit` units run at the same time
//! - Fixed-window rate cap: at most `tasks_per_interval` units are *initiated*
//!   within each window of length `interval`. Windows are successive and
//!   non-overlapping; this is not a sliding window or a token bucket.
//! - FIFO admission: work that cannot start immediately waits in a
//!   [`QueueStrategy`] and is admitted in arrival order. Completion order is
//!   not guaranteed.
//!
//! ## Design
//! Each scheduler is a single owner task that processes a command channel
//! (schedule, complete, listen, stats, shutdown). The admission counters are
//! only ever touched by that task. A ticker with period `min(interval, 1s)`
//! exists only while work is running or queued; it re-evaluates admission when
//! a new window opens without any completion to trigger it.
//!
//! ## Failure Semantics
//! Errors and panics raised by a unit are captured into its [`TaskOutcome`] and
//! surfaced only through completion listeners. Nothing is retried here.

pub mod queue;
pub mod task;

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use starling_api::errors::TaskError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::{ConfigError, SchedulerConfig};
use crate::log_scheduler;

pub use queue::{FifoQueue, QueueStrategy};
pub use task::{DeferredTask, TaskId, TaskOutcome};

/// Upper bound of the admission ticker period.
const MAX_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Callback invoked once per finished unit.
pub type CompletionListener<T> = Box<dyn Fn(&TaskOutcome<T>) + Send + Sync>;

/// Point-in-time view of the admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub running_tasks: usize,
    pub tasks_initiated_in_window: usize,
    pub queued_tasks: usize,
}

enum Command<T> {
    Schedule(DeferredTask<T>),
    Listen(CompletionListener<T>),
    Stats(oneshot::Sender<SchedulerStats>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Gauges {
    running: AtomicUsize,
    queued: AtomicUsize,
}

/// Handle to a windowed, concurrency-bounded scheduler.
///
/// Cloning the handle is cheap; all clones feed the same owner task. The owner
/// task stops when every handle is dropped or [`shutdown`](Self::shutdown) is
/// called. Queued units are then completed with [`TaskError::SchedulerStopped`].
pub struct TaskScheduler<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    next_id: Arc<AtomicU64>,
    gauges: Arc<Gauges>,
    config: SchedulerConfig,
}

impl<T> Clone for TaskScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            next_id: self.next_id.clone(),
            gauges: self.gauges.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("running", &self.gauges.running.load(Ordering::Relaxed))
            .field("queued", &self.gauges.queued.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T: Send + 'static> TaskScheduler<T> {
    /// Creates a scheduler with a FIFO queue.
    ///
    /// Must be called from within a Tokio runtime: the owner task is spawned here.
    pub fn new(config: SchedulerConfig) -> Result<Self, ConfigError> {
        Self::with_queue(config, Box::new(FifoQueue::new()))
    }

    /// Creates a scheduler that orders waiting work with a custom strategy.
    pub fn with_queue(
        config: SchedulerConfig,
        queue: Box<dyn QueueStrategy<DeferredTask<T>>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let gauges = Arc::new(Gauges::default());

        let actor = SchedulerActor {
            config: config.clone(),
            queue,
            running_tasks: 0,
            tasks_initiated_in_window: 0,
            window_start: Instant::now(),
            listeners: Vec::new(),
            completions: completions_tx,
            gauges: gauges.clone(),
        };
        tokio::spawn(actor.run(commands_rx, completions_rx));

        Ok(Self {
            commands: commands_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            gauges,
            config,
        })
    }

    /// Schedules `execute(input)`.
    ///
    /// The unit starts immediately if both caps allow it, otherwise it is queued.
    /// Returns the id that its [`TaskOutcome`] will carry.
    pub fn schedule_task<I, F, Fut, E>(&self, execute: F, input: I) -> Result<TaskId, TaskError>
    where
        I: Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = DeferredTask::new(id, execute, input);
        self.commands
            .send(Command::Schedule(task))
            .map_err(|_| TaskError::SchedulerStopped)?;
        Ok(id)
    }

    /// Registers a listener called with the outcome of every unit that finishes
    /// after the registration is processed.
    pub fn on_task_complete<L>(&self, listener: L) -> Result<(), TaskError>
    where
        L: Fn(&TaskOutcome<T>) + Send + Sync + 'static,
    {
        self.commands
            .send(Command::Listen(Box::new(listener)))
            .map_err(|_| TaskError::SchedulerStopped)
    }

    /// Exact snapshot of the admission counters, taken by the owner task.
    pub async fn stats(&self) -> Result<SchedulerStats, TaskError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .map_err(|_| TaskError::SchedulerStopped)?;
        rx.await.map_err(|_| TaskError::SchedulerStopped)
    }

    /// Units waiting for admission, as last published by the owner task.
    pub fn queue_len(&self) -> usize {
        self.gauges.queued.load(Ordering::Relaxed)
    }

    /// Units currently executing, as last published by the owner task.
    pub fn running_tasks(&self) -> usize {
        self.gauges.running.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Stops the owner task. Running units finish on their own; their outcomes
    /// are discarded.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct SchedulerActor<T> {
    config: SchedulerConfig,
    queue: Box<dyn QueueStrategy<DeferredTask<T>>>,
    running_tasks: usize,
    tasks_initiated_in_window: usize,
    window_start: Instant,
    listeners: Vec<CompletionListener<T>>,
    completions: mpsc::UnboundedSender<TaskOutcome<T>>,
    gauges: Arc<Gauges>,
}

impl<T: Send + 'static> SchedulerActor<T> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command<T>>,
        mut completions: mpsc::UnboundedReceiver<TaskOutcome<T>>,
    ) {
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;
                Some(outcome) = completions.recv() => self.on_complete(outcome),
                command = commands.recv() => match command {
                    Some(Command::Schedule(task)) => self.admit_or_enqueue(task),
                    Some(Command::Listen(listener)) => self.listeners.push(listener),
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = next_tick(&mut ticker) => {
                    log_scheduler!("task_scheduler", "tick", queued = self.queue.len());
                    self.drain_queue();
                }
            }

            // The ticker only runs while there is work, so an idle scheduler never wakes up.
            if self.is_busy() {
                if ticker.is_none() {
                    ticker = Some(self.new_ticker());
                }
            } else {
                ticker = None;
            }
            self.publish_gauges();
        }

        self.stop_queued();
    }

    fn admit_or_enqueue(&mut self, task: DeferredTask<T>) {
        self.refresh_window();
        if self.queue.is_empty() && self.has_capacity() {
            self.start(task);
        } else {
            log_scheduler!("task_scheduler", "task_queued", task_id = task.id(), queued = self.queue.len() + 1);
            self.queue.enqueue(task);
            // Waiting work keeps its FIFO position even if a new window already opened.
            self.drain_queue();
        }
    }

    fn refresh_window(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.config.interval {
            self.window_start = now;
            self.tasks_initiated_in_window = 0;
        }
    }

    fn has_capacity(&self) -> bool {
        self.tasks_initiated_in_window < self.config.tasks_per_interval
            && self.running_tasks < self.config.concurrency_limit
    }

    fn drain_queue(&mut self) {
        self.refresh_window();
        while self.has_capacity() {
            match self.queue.dequeue() {
                Some(task) => self.start(task),
                None => break,
            }
        }
    }

    fn start(&mut self, task: DeferredTask<T>) {
        self.running_tasks += 1;
        self.tasks_initiated_in_window += 1;

        let task_id = task.id();
        log_scheduler!(
            "task_scheduler",
            "task_started",
            task_id = task_id,
            running = self.running_tasks,
            initiated_in_window = self.tasks_initiated_in_window
        );

        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = task.execute().await;
            let _ = completions.send(TaskOutcome { task_id, result });
        });
    }

    fn on_complete(&mut self, outcome: TaskOutcome<T>) {
        self.running_tasks = self.running_tasks.saturating_sub(1);
        self.drain_queue();

        if let Err(err) = &outcome.result {
            tracing::debug!(task_id = outcome.task_id, error = %err, "Task failed");
        }
        self.notify(&outcome);
    }

    fn notify(&self, outcome: &TaskOutcome<T>) {
        for listener in &self.listeners {
            // A faulty listener must not take the admission loop down with it.
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(outcome))).is_err() {
                tracing::error!(task_id = outcome.task_id, "Task completion listener panicked");
            }
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            running_tasks: self.running_tasks,
            tasks_initiated_in_window: self.tasks_initiated_in_window,
            queued_tasks: self.queue.len(),
        }
    }

    fn is_busy(&self) -> bool {
        self.running_tasks > 0 || !self.queue.is_empty()
    }

    fn new_ticker(&self) -> Interval {
        let period = self.config.interval.min(MAX_TICK_PERIOD);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn publish_gauges(&self) {
        self.gauges.running.store(self.running_tasks, Ordering::Relaxed);
        self.gauges.queued.store(self.queue.len(), Ordering::Relaxed);
    }

    fn stop_queued(&mut self) {
        log_scheduler!("task_scheduler", "shutdown", queued = self.queue.len(), running = self.running_tasks);
        while let Some(task) = self.queue.dequeue() {
            self.notify(&TaskOutcome {
                task_id: task.id(),
                result: Err(TaskError::SchedulerStopped),
            });
        }
        self.gauges.queued.store(0, Ordering::Relaxed);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
