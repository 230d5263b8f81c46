//! The in-process scheduler back end.
//!
//! `TaskScheduler` wires the stage registry, the dependency-gating queue, the
//! worker pool, the slot store and the token pool into one `Scheduler`
//! implementation. It is the single-node sibling of a cluster deployment: the
//! same contract would be served remotely by a transport-backed scheduler,
//! which is out of scope here.

use super::queue::{QueuedTask, TaskQueue};
use super::registry::StageRegistry;
use super::types::{DataRef, NodeId, StageId, StageKind, TaskDescriptor, TaskId};
use super::workers::WorkerPool;
use super::{Scheduler, StageFn};
use crate::config::Configuration;
use crate::error::EngineError;
use crate::store::memory::DataStore;
use crate::store::tokens::TokenPool;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

pub struct TaskScheduler {
    node: NodeId,
    store: DataStore,
    tokens: TokenPool,
    registry: StageRegistry<TaskScheduler>,
    queue: TaskQueue,
    next_task: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Builds the back end and starts its worker pool.
    pub fn new(config: &Configuration) -> Arc<Self> {
        let node = NodeId(0);
        let scheduler = Arc::new(Self {
            node,
            store: DataStore::new(node),
            tokens: TokenPool::new(config.tokens),
            registry: StageRegistry::new(),
            queue: TaskQueue::new(node, config.ordering),
            next_task: AtomicU64::new(0),
            workers: Mutex::new(Vec::new()),
        });

        let handles = WorkerPool::start(&scheduler, config.workers);
        *scheduler
            .workers
            .lock()
            .expect("worker handle lock poisoned") = handles;
        scheduler
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn registry(&self) -> &StageRegistry<TaskScheduler> {
        &self.registry
    }

    pub(crate) fn tokens(&self) -> &TokenPool {
        &self.tokens
    }

    /// Unreserved tokens right now. Balanced runs end where they started.
    pub fn available_tokens(&self) -> usize {
        self.tokens.available()
    }

    /// Live slots in the data store. Balanced runs drain back to zero.
    pub fn live_slots(&self) -> usize {
        self.store.live_slots()
    }
}

impl Scheduler for TaskScheduler {
    fn register_sequential_stage(&self, func: StageFn<Self>, is_source: bool) -> StageId {
        self.registry
            .register(func, StageKind::Sequential, is_source)
    }

    fn register_parallel_stage(&self, func: StageFn<Self>, is_source: bool) -> StageId {
        self.registry.register(func, StageKind::Parallel, is_source)
    }

    fn submit_task(&self, task: TaskDescriptor, self_submit: bool) {
        let (kind, is_source) = match self.registry.get(task.stage_id) {
            Some(entry) => (entry.kind, entry.is_source),
            // Let the worker surface the missing registration as the run's
            // error instead of dropping the task silently.
            None => (StageKind::Parallel, false),
        };
        self.queue.submit(
            QueuedTask {
                task,
                kind,
                is_source,
            },
            self_submit,
        );
    }

    fn run(&self) -> Result<TaskDescriptor, EngineError> {
        let seed_stage = StageId(0);
        let seedable = self
            .registry
            .get(seed_stage)
            .is_some_and(|entry| entry.is_source);
        if !seedable {
            self.registry.clear();
            return Err(EngineError::MissingSource);
        }

        tracing::info!(
            "running graph with {} registered stages",
            self.registry.stage_count()
        );
        let seed = TaskDescriptor::new(
            seed_stage,
            self.next_task_id(),
            0,
            vec![self.node],
            false,
            Vec::new(),
        );
        self.submit_task(seed, true);

        let outcome = self.queue.wait_run_complete();
        self.queue.reset_run();
        self.registry.clear();
        match &outcome {
            Ok(task) => tracing::info!("run finished at task {}", task.task_id.0),
            Err(error) => tracing::warn!("run failed: {}", error),
        }
        outcome
    }

    fn put<T: Send + Sync + 'static>(&self, value: T) -> DataRef {
        self.store.put(value)
    }

    fn put_at<T: Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
        value: T,
    ) -> Result<(), EngineError> {
        self.store.put_at(data_ref, value)
    }

    fn get<T: Clone + Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
    ) -> Result<T, EngineError> {
        self.store.get(data_ref)
    }

    fn get_release<T: Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
    ) -> Result<T, EngineError> {
        self.store.take(data_ref)
    }

    fn get_release_all<T: Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
    ) -> Result<T, EngineError> {
        // By the time a caller collects a terminal value, the ending stage
        // has already handed every chain token back; only the slot remains.
        self.store.take(data_ref)
    }

    fn finish_task(&self, task: &TaskDescriptor, release_tokens: usize) {
        tracing::trace!(
            "task {} finished its chain, releasing {} tokens",
            task.task_id.0,
            release_tokens
        );
        self.tokens.release(release_tokens);
    }

    fn allocate_tokens(&self, count: usize) -> bool {
        self.tokens.try_allocate(count)
    }

    fn token_capacity(&self) -> usize {
        self.tokens.capacity()
    }

    fn next_task_id(&self) -> TaskId {
        TaskId(self.next_task.fetch_add(1, Ordering::SeqCst))
    }

    fn local_node(&self) -> NodeId {
        self.node
    }

    fn shutdown(&self) {
        self.queue.shutdown();
        let handles = std::mem::take(
            &mut *self.workers.lock().expect("worker handle lock poisoned"),
        );
        for handle in handles {
            let _ = handle.join();
        }
    }
}
