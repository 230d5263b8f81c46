//! Worker pool.
//!
//! Spawns the threads that drive the graph. Each worker loops over
//! claim -> execute -> complete until the scheduler shuts down. Stage
//! functions are ordinary blocking closures, so workers are OS threads rather
//! than async tasks.

use super::service::TaskScheduler;
use crate::error::EngineError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct WorkerPool;

impl WorkerPool {
    /// Spawns `count` workers bound to the scheduler and returns their join
    /// handles.
    pub fn start(scheduler: &Arc<TaskScheduler>, count: usize) -> Vec<JoinHandle<()>> {
        tracing::info!("starting {} task workers", count);
        (0..count)
            .map(|worker_id| {
                let scheduler = Arc::clone(scheduler);
                std::thread::Builder::new()
                    .name(format!("taskweave-worker-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, scheduler))
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }
}

/// The main loop for a single worker thread.
///
/// 1. Claims a runnable task from the queue.
/// 2. Looks up and invokes the registered stage function.
/// 3. Reports completion, which unblocks dependents and may end the run.
fn worker_loop(worker_id: usize, scheduler: Arc<TaskScheduler>) {
    tracing::debug!("worker {} started", worker_id);

    while let Some(claimed) = scheduler.queue().claim(scheduler.tokens()) {
        let mut task = claimed.task;
        let task_id = task.task_id;
        tracing::trace!(
            "worker {} executing task {} (stage {})",
            worker_id,
            task_id.0,
            task.stage_id.0
        );

        let result = match scheduler.registry().get(task.stage_id) {
            Some(entry) => {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    (entry.func)(scheduler.as_ref(), &mut task)
                }));
                match outcome {
                    Ok(result) => result,
                    Err(panic) => Err(EngineError::StageFailure(panic_message(panic))),
                }
            }
            None => Err(EngineError::StageFailure(format!(
                "stage {} is not registered",
                task.stage_id.0
            ))),
        };

        if let Err(error) = &result {
            tracing::warn!("worker {} saw task {} fail: {}", worker_id, task_id.0, error);
        }
        scheduler.queue().complete(task, claimed.kind, result);
    }

    tracing::debug!("worker {} stopped", worker_id);
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "stage panicked".to_string()
    }
}
