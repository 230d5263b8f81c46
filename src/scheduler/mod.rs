//! Task scheduling engine.
//!
//! The engine core never talks to workers directly: it registers stage
//! functions and submits task descriptors through the [`Scheduler`] contract,
//! and the back end decides where and when each task runs.
//!
//! ## Architecture Overview
//! The in-process back end follows a **pull-based** model:
//! 1. **Registration**: pattern translators register one stage function per
//!    chain element; stage ids are handed out in registration order.
//! 2. **Submission**: stage functions construct successor descriptors and
//!    submit them while they run, growing the graph dynamically.
//! 3. **Gating**: a task becomes runnable when its dependencies are completed,
//!    its stage admits another invocation, and (for source stages) the token
//!    pool grants an admission credit.
//! 4. **Execution**: worker threads claim runnable tasks and invoke the
//!    registered stage function; completion unblocks dependents.
//!
//! ## Submodules
//! - **`types`**: identifiers, data references and task descriptors.
//! - **`registry`**: maps stage ids to executable stage functions.
//! - **`queue`**: pending-task state, dependency gating, claims and drain
//!   detection.
//! - **`workers`**: the worker thread pool.
//! - **`service`**: [`service::TaskScheduler`], the back end wiring it all
//!   together.

pub mod queue;
pub mod registry;
pub mod service;
pub mod types;
pub mod workers;


use crate::error::EngineError;
use self::types::{DataRef, NodeId, StageId, TaskDescriptor, TaskId};
use std::sync::Arc;

/// A registered stage function.
///
/// Stage functions receive the scheduler they were registered with instead of
/// capturing it, so a back end can hand out plain references without creating
/// reference cycles. The descriptor is mutable: some stages rewrite their own
/// data locations before re-submitting.
pub type StageFn<S> =
    Arc<dyn Fn(&S, &mut TaskDescriptor) -> Result<(), EngineError> + Send + Sync>;

/// The contract between the pattern translators and a scheduler back end.
///
/// Implementations own the worker pool, the data store and the token pool.
/// Registered stage functions must not outlive the `run` call that drives
/// them; `run` clears the registration state once the graph drains.
pub trait Scheduler: Sized + Send + Sync + 'static {
    /// Registers a stage that sees one task at a time on a node.
    fn register_sequential_stage(&self, func: StageFn<Self>, is_source: bool) -> StageId;

    /// Registers a stage that may be invoked concurrently.
    fn register_parallel_stage(&self, func: StageFn<Self>, is_source: bool) -> StageId;

    /// Enqueues a task. `self_submit` marks continuations the submitting
    /// stage wants picked up promptly on the local node.
    fn submit_task(&self, task: TaskDescriptor, self_submit: bool);

    /// Seeds stage 0, drives the graph until it drains and returns the
    /// descriptor of the task whose completion drained it.
    fn run(&self) -> Result<TaskDescriptor, EngineError>;

    /// Stores a value in a fresh slot.
    fn put<T: Send + Sync + 'static>(&self, value: T) -> DataRef;

    /// Overwrites the value behind an existing reference.
    fn put_at<T: Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
        value: T,
    ) -> Result<(), EngineError>;

    /// Copies a value out without releasing its slot.
    fn get<T: Clone + Send + Sync + 'static>(&self, data_ref: &DataRef)
    -> Result<T, EngineError>;

    /// Takes a value out and frees its slot.
    fn get_release<T: Send + Sync + 'static>(&self, data_ref: &DataRef)
    -> Result<T, EngineError>;

    /// Takes the terminal value of a chain, freeing its slot along with any
    /// tokens the chain still holds.
    fn get_release_all<T: Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
    ) -> Result<T, EngineError>;

    /// Marks the end of an item chain or branch, returning `release_tokens`
    /// admission credits to the pool.
    fn finish_task(&self, task: &TaskDescriptor, release_tokens: usize);

    /// Reserves `count` tokens atomically; `false` means the caller should
    /// fall back to its sequential path.
    fn allocate_tokens(&self, count: usize) -> bool;

    /// Configured token pool capacity.
    fn token_capacity(&self) -> usize;

    /// Issues a fresh task id.
    fn next_task_id(&self) -> TaskId;

    /// Identifier of the local node.
    fn local_node(&self) -> NodeId;

    /// Stops the worker pool. Idempotent.
    fn shutdown(&self);
}
