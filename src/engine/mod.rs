//! Execution policy facade.
//!
//! [`TaskEngine`] is the object user code talks to: it owns the shared
//! scheduler handle, the configuration and the advisory ordering flag, and
//! translates declared compositions into task graphs.
//!
//! ## Submodules
//! - **`pipeline`**: translation of generator-plus-chain compositions.
//! - **`divide`**: the divide-and-conquer orchestration stages.
//! - **`sequential`**: the sequential policy used as reference semantics and
//!   as the token-exhaustion fallback.

pub mod divide;
pub mod pipeline;
pub mod sequential;

#[cfg(test)]
mod tests;

use self::pipeline::GeneratorFn;
use crate::config::Configuration;
use crate::error::EngineError;
use crate::patterns::{Payload, Stage};
use crate::scheduler::Scheduler;
use crate::scheduler::service::TaskScheduler;
use std::sync::{Arc, Mutex};

/// Task-based parallel execution policy.
///
/// Not copyable: the engine owns its scheduler handle and shuts the worker
/// pool down on drop. Stage functions registered for a composition never
/// outlive the `run` that drives them.
pub struct TaskEngine<S: Scheduler = TaskScheduler> {
    scheduler: Arc<S>,
    config: Configuration,
    ordering: bool,
    run_guard: Mutex<()>,
}

impl TaskEngine<TaskScheduler> {
    /// Builds an engine with the in-process scheduler back end.
    pub fn new(config: Configuration) -> Self {
        let scheduler = TaskScheduler::new(&config);
        Self::with_scheduler(scheduler, config)
    }
}

impl<S: Scheduler> TaskEngine<S> {
    /// Builds an engine around an existing scheduler back end.
    pub fn with_scheduler(scheduler: Arc<S>, config: Configuration) -> Self {
        let ordering = config.ordering;
        Self {
            scheduler,
            config,
            ordering,
            run_guard: Mutex::new(()),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<S> {
        &self.scheduler
    }

    /// Enable ordered execution. Advisory: order is carried as metadata and
    /// back ends may use it to prefer older items.
    pub fn enable_ordering(&mut self) {
        self.ordering = true;
    }

    /// Disable ordered execution.
    pub fn disable_ordering(&mut self) {
        self.ordering = false;
    }

    /// Whether ordered execution is requested.
    pub fn is_ordered(&self) -> bool {
        self.ordering
    }

    /// Evaluates a pipeline: the generator feeds the chain until it returns
    /// `None` and every emitted item has been consumed or dropped.
    ///
    /// Returns a translation error before anything runs if the chain shape is
    /// not supported.
    pub fn pipeline<G, T>(
        &self,
        mut generator: G,
        stages: impl IntoIterator<Item = Stage>,
    ) -> Result<(), EngineError>
    where
        G: FnMut() -> Option<T> + Send + 'static,
        T: Send + Sync + 'static,
    {
        let _guard = self.run_guard.lock().expect("engine run lock poisoned");
        let erased: GeneratorFn =
            Box::new(move || generator().map(|value| Box::new(value) as Payload));
        pipeline::translate(&self.scheduler, erased, stages.into_iter().collect())?;
        self.scheduler.run().map(|_| ())
    }

    /// Evaluates a divide-and-conquer problem and returns the combined
    /// result. Subtrees that cannot reserve tokens are evaluated with the
    /// sequential policy, so the result is the same at any pool size as long
    /// as `combine` is associative.
    pub fn divide_conquer<I, R, D, P, V, C>(
        &self,
        input: I,
        divide_op: D,
        predicate_op: P,
        solve_op: V,
        combine_op: C,
    ) -> Result<R, EngineError>
    where
        I: Clone + Send + Sync + 'static,
        R: Clone + Default + Send + Sync + 'static,
        D: Fn(&I) -> Vec<I> + Send + Sync + 'static,
        P: Fn(&I) -> bool + Send + Sync + 'static,
        V: Fn(&I) -> R + Send + Sync + 'static,
        C: Fn(R, R) -> R + Send + Sync + 'static,
    {
        let _guard = self.run_guard.lock().expect("engine run lock poisoned");
        divide::execute(
            &self.scheduler,
            input,
            divide_op,
            predicate_op,
            solve_op,
            combine_op,
        )
    }
}

impl<S: Scheduler> Drop for TaskEngine<S> {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
