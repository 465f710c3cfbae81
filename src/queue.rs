//! Task queue: derivation tasks, batches and ordered chains.
//!
//! A [`Chain`] is a list of [`Batch`]es. Tasks inside a batch have no
//! ordering among themselves and may run in parallel; a batch only starts
//! after the previous one completed without a failure. A cancelled batch stops
//! the chain before it runs, and nothing after it is dispatched.
//!
//! | Queue | Behaviour |
//! |---|---|
//! | [`SyncQueue`] | Runs a chain to completion on dispatch, batches on a rayon pool |
//! | [`DeferredQueue`] | Stores chains until a worker drains them with [`DeferredQueue::run_next`] |
//!
//! Retries are not attempted here: a failed task is reported in the
//! [`ChainOutcome`] and logged.

use crate::imaging::OperationError;
use crate::records::{RecordError, RecordId};
use crate::storage::StorageError;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Failure of a single queued task.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("context '{0}' is not registered")]
    UnknownContext(String),
    #[error("breakpoint '{breakpoint}' is not part of context '{context}'")]
    UnknownBreakpoint { context: String, breakpoint: String },
    #[error("conversion '{0}' is not registered")]
    UnknownConversion(String),
    #[error("no output format for extension '{0}'")]
    UnsupportedFormat(String),
}

/// One unit of derivation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Crop, fit and apply effects for one breakpoint of a derived image.
    CropBreakpoint { image: RecordId, breakpoint: String },
    /// Derive the width series from a breakpoint crop.
    ResponsiveWidths { image: RecordId, breakpoint: String },
    /// Generate a named conversion of a source image.
    Conversion { source: RecordId, name: String },
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::CropBreakpoint { image, breakpoint } => {
                write!(f, "crop image {image} at {breakpoint}")
            }
            Task::ResponsiveWidths { image, breakpoint } => {
                write!(f, "width series for image {image} at {breakpoint}")
            }
            Task::Conversion { source, name } => write!(f, "conversion '{name}' of source {source}"),
        }
    }
}

/// Where a chain should run. Only carried and logged in-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub connection: String,
    pub queue: String,
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            connection: "sync".to_string(),
            queue: "default".to_string(),
        }
    }
}

/// Cancels a batch that has not started yet.
#[derive(Debug, Clone, Default)]
pub struct BatchHandle(Arc<AtomicBool>);

impl BatchHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tasks awaited together.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub tasks: Vec<Task>,
    handle: BatchHandle,
}

impl Batch {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            handle: BatchHandle::default(),
        }
    }

    pub fn handle(&self) -> BatchHandle {
        self.handle.clone()
    }
}

/// Batches run strictly one after another.
#[derive(Debug, Clone)]
pub struct Chain {
    pub id: Uuid,
    pub stages: Vec<Batch>,
    pub routing: Routing,
}

impl Chain {
    pub fn new(stages: Vec<Batch>, routing: Routing) -> Self {
        Self {
            id: Uuid::new_v4(),
            stages,
            routing,
        }
    }

    /// A chain holding a single one-task batch.
    pub fn single(task: Task, routing: Routing) -> Self {
        Self::new(vec![Batch::new(vec![task])], routing)
    }

    pub fn task_count(&self) -> usize {
        self.stages.iter().map(|b| b.tasks.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: Task,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    Completed,
    /// Stage `stage` had failing tasks; later stages did not run.
    Failed {
        stage: usize,
        failures: Vec<TaskFailure>,
    },
    /// Stage `stage` was cancelled before it ran.
    Cancelled { stage: usize },
    /// Stored for later execution.
    Pending,
}

impl ChainOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed)
    }
}

/// Executes tasks. Implemented by the derivation worker.
pub trait TaskRunner: Send + Sync {
    fn run(&self, task: &Task) -> Result<(), TaskError>;
}

/// Accepts chains for execution.
pub trait TaskQueue: Send + Sync {
    fn dispatch(&self, chain: Chain) -> ChainOutcome;

    fn enqueue(&self, task: Task, routing: Routing) -> ChainOutcome {
        self.dispatch(Chain::single(task, routing))
    }
}

/// Run every stage of `chain` in order on `pool`.
pub fn run_chain(pool: &rayon::ThreadPool, runner: &dyn TaskRunner, chain: &Chain) -> ChainOutcome {
    for (stage, batch) in chain.stages.iter().enumerate() {
        if batch.handle.is_cancelled() {
            tracing::warn!(chain = %chain.id, stage, "batch cancelled, chain stopped");
            return ChainOutcome::Cancelled { stage };
        }

        let failures: Vec<TaskFailure> = pool.install(|| {
            batch
                .tasks
                .par_iter()
                .filter_map(|task| {
                    tracing::debug!(chain = %chain.id, %task, "task started");
                    runner.run(task).err().map(|e| {
                        tracing::error!(chain = %chain.id, %task, error = %e, "task failed");
                        TaskFailure {
                            task: task.clone(),
                            message: e.to_string(),
                        }
                    })
                })
                .collect()
        });

        if !failures.is_empty() {
            return ChainOutcome::Failed { stage, failures };
        }
    }
    ChainOutcome::Completed
}

fn build_pool(threads: usize) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("derive-{i}"))
        .build()
}

/// Runs chains in-process at dispatch time.
pub struct SyncQueue {
    runner: Arc<dyn TaskRunner>,
    pool: rayon::ThreadPool,
}

impl SyncQueue {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        threads: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self {
            runner,
            pool: build_pool(threads)?,
        })
    }
}

impl TaskQueue for SyncQueue {
    fn dispatch(&self, chain: Chain) -> ChainOutcome {
        tracing::debug!(
            chain = %chain.id,
            connection = %chain.routing.connection,
            queue = %chain.routing.queue,
            tasks = chain.task_count(),
            "running chain"
        );
        run_chain(&self.pool, self.runner.as_ref(), &chain)
    }
}

/// Holds chains until drained.
pub struct DeferredQueue {
    runner: Arc<dyn TaskRunner>,
    pool: rayon::ThreadPool,
    pending: Mutex<VecDeque<Chain>>,
}

impl DeferredQueue {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        threads: usize,
    ) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self {
            runner,
            pool: build_pool(threads)?,
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel stage `stage` of a pending chain. Returns false when the chain
    /// or stage is unknown.
    pub fn cancel(&self, chain: Uuid, stage: usize) -> bool {
        self.lock()
            .iter()
            .find(|c| c.id == chain)
            .and_then(|c| c.stages.get(stage))
            .map(|batch| batch.handle.cancel())
            .is_some()
    }

    /// Run the oldest pending chain.
    pub fn run_next(&self) -> Option<(Chain, ChainOutcome)> {
        let chain = self.lock().pop_front()?;
        let outcome = run_chain(&self.pool, self.runner.as_ref(), &chain);
        Some((chain, outcome))
    }

    /// Drain every pending chain in dispatch order.
    pub fn run_all(&self) -> Vec<(Chain, ChainOutcome)> {
        std::iter::from_fn(|| self.run_next()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Chain>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskQueue for DeferredQueue {
    fn dispatch(&self, chain: Chain) -> ChainOutcome {
        tracing::debug!(
            chain = %chain.id,
            connection = %chain.routing.connection,
            queue = %chain.routing.queue,
            "chain deferred"
        );
        self.lock().push_back(chain);
        ChainOutcome::Pending
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Records every task it runs and fails the ones it is told to.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub ran: Mutex<Vec<Task>>,
        fail: Vec<Task>,
    }

    impl RecordingRunner {
        pub fn failing(fail: Vec<Task>) -> Self {
            Self {
                ran: Mutex::new(Vec::new()),
                fail,
            }
        }

        pub fn ran(&self) -> Vec<Task> {
            self.ran.lock().unwrap().clone()
        }
    }

    impl TaskRunner for RecordingRunner {
        fn run(&self, task: &Task) -> Result<(), TaskError> {
            self.ran.lock().unwrap().push(task.clone());
            if self.fail.contains(task) {
                return Err(TaskError::UnknownContext("boom".into()));
            }
            Ok(())
        }
    }

    fn crop(bp: &str) -> Task {
        Task::CropBreakpoint {
            image: 1,
            breakpoint: bp.into(),
        }
    }

    fn widths(bp: &str) -> Task {
        Task::ResponsiveWidths {
            image: 1,
            breakpoint: bp.into(),
        }
    }

    fn two_stage_chain() -> Chain {
        Chain::new(
            vec![
                Batch::new(vec![crop("sm"), crop("md")]),
                Batch::new(vec![widths("sm"), widths("md")]),
            ],
            Routing::default(),
        )
    }

    #[test]
    fn sync_queue_runs_stages_in_order() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = SyncQueue::new(runner.clone(), 2).unwrap();

        assert_eq!(queue.dispatch(two_stage_chain()), ChainOutcome::Completed);

        let ran = runner.ran();
        assert_eq!(ran.len(), 4);
        // every crop precedes every width series
        let last_crop = ran.iter().rposition(|t| matches!(t, Task::CropBreakpoint { .. }));
        let first_widths = ran.iter().position(|t| matches!(t, Task::ResponsiveWidths { .. }));
        assert!(last_crop < first_widths);
    }

    #[test]
    fn failure_in_first_stage_stops_chain() {
        let runner = Arc::new(RecordingRunner::failing(vec![crop("md")]));
        let queue = SyncQueue::new(runner.clone(), 2).unwrap();

        let outcome = queue.dispatch(two_stage_chain());
        match outcome {
            ChainOutcome::Failed { stage, failures } => {
                assert_eq!(stage, 0);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].task, crop("md"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // the rest of the first batch still ran, nothing from the second
        assert_eq!(runner.ran().len(), 2);
    }

    #[test]
    fn cancelled_stage_does_not_run() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = SyncQueue::new(runner.clone(), 1).unwrap();
        let chain = two_stage_chain();
        chain.stages[1].handle().cancel();

        assert_eq!(queue.dispatch(chain), ChainOutcome::Cancelled { stage: 1 });
        assert!(runner
            .ran()
            .iter()
            .all(|t| matches!(t, Task::CropBreakpoint { .. })));
    }

    #[test]
    fn deferred_queue_holds_until_drained() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = DeferredQueue::new(runner.clone(), 1).unwrap();

        assert_eq!(queue.dispatch(two_stage_chain()), ChainOutcome::Pending);
        assert_eq!(queue.enqueue(crop("lg"), Routing::default()), ChainOutcome::Pending);
        assert_eq!(queue.len(), 2);
        assert!(runner.ran().is_empty());

        let results = queue.run_all();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, o)| o.is_completed()));
        assert_eq!(runner.ran().len(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn deferred_cancel_by_chain_id() {
        let runner = Arc::new(RecordingRunner::default());
        let queue = DeferredQueue::new(runner.clone(), 1).unwrap();
        let chain = two_stage_chain();
        let id = chain.id;
        queue.dispatch(chain);

        assert!(queue.cancel(id, 0));
        assert!(!queue.cancel(id, 5));
        assert!(!queue.cancel(Uuid::new_v4(), 0));

        let (_, outcome) = queue.run_next().unwrap();
        assert_eq!(outcome, ChainOutcome::Cancelled { stage: 0 });
        assert!(runner.ran().is_empty());
    }

    #[test]
    fn task_display_names_target() {
        assert_eq!(crop("sm").to_string(), "crop image 1 at sm");
        let conversion = Task::Conversion {
            source: 3,
            name: "thumb".into(),
        };
        assert_eq!(conversion.to_string(), "conversion 'thumb' of source 3");
    }
}
