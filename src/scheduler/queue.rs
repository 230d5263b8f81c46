//! Pending-task state and dependency gating.
//!
//! The queue is the single place where runnability is decided. A task may be
//! claimed when:
//! 1. every task in its `before_dep` set has completed,
//! 2. every submitted task naming it in `after_dep` has completed,
//! 3. its stage is parallel, or sequential with no invocation in flight,
//! 4. its locality constraint admits the local node, and
//! 5. for source stages, the token pool grants an admission credit.
//!
//! Rule 2 is what makes dynamically grown graphs converge: a merger submitted
//! with `after_dep = {end}` holds the ending task back until the whole
//! subtree underneath it has finished.

use super::types::{NodeId, StageId, StageKind, TaskDescriptor, TaskId};
use crate::error::EngineError;
use crate::store::tokens::TokenPool;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A submitted task enriched with the scheduling class of its stage.
pub struct QueuedTask {
    pub task: TaskDescriptor,
    pub kind: StageKind,
    pub is_source: bool,
}

struct QueueInner {
    pending: VecDeque<QueuedTask>,
    /// Task id -> blockers that have not completed yet.
    gates: HashMap<TaskId, HashSet<TaskId>>,
    /// Blocker id -> tasks gated on it.
    unblocks: HashMap<TaskId, Vec<TaskId>>,
    completed: HashSet<TaskId>,
    running: usize,
    sequential_running: HashSet<StageId>,
    aborting: bool,
    error: Option<EngineError>,
    drained: bool,
    terminal: Option<TaskDescriptor>,
    shutdown: bool,
}

impl QueueInner {
    fn gate(&mut self, blocked: TaskId, blocker: TaskId) {
        if self.completed.contains(&blocker) {
            return;
        }
        self.gates.entry(blocked).or_default().insert(blocker);
        self.unblocks.entry(blocker).or_default().push(blocked);
    }

    fn is_unblocked(&self, task_id: TaskId) -> bool {
        self.gates.get(&task_id).is_none_or(|set| set.is_empty())
    }
}

pub struct TaskQueue {
    local_node: NodeId,
    ordering: bool,
    inner: Mutex<QueueInner>,
    work_ready: Condvar,
    run_done: Condvar,
}

impl TaskQueue {
    pub fn new(local_node: NodeId, ordering: bool) -> Self {
        Self {
            local_node,
            ordering,
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                gates: HashMap::new(),
                unblocks: HashMap::new(),
                completed: HashSet::new(),
                running: 0,
                sequential_running: HashSet::new(),
                aborting: false,
                error: None,
                drained: false,
                terminal: None,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            run_done: Condvar::new(),
        }
    }

    /// Enqueues a task and records its dependency edges. Continuations
    /// submitted with `self_submit` go to the front of the queue.
    pub fn submit(&self, queued: QueuedTask, self_submit: bool) {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        if inner.aborting || inner.shutdown {
            tracing::debug!(
                "dropping task {} submitted while aborting",
                queued.task.task_id.0
            );
            return;
        }

        let task_id = queued.task.task_id;
        let before: Vec<TaskId> = queued.task.before_dep.iter().copied().collect();
        for blocker in before {
            inner.gate(task_id, blocker);
        }
        let after: Vec<TaskId> = queued.task.after_dep.iter().copied().collect();
        for blocked in after {
            inner.gate(blocked, task_id);
        }

        tracing::trace!(
            "queued task {} for stage {} (order {})",
            task_id.0,
            queued.task.stage_id.0,
            queued.task.order
        );
        if self_submit {
            inner.pending.push_front(queued);
        } else {
            inner.pending.push_back(queued);
        }
        drop(inner);
        self.work_ready.notify_all();
    }

    /// Blocks until a runnable task can be claimed or the queue shuts down.
    /// Returns `None` only on shutdown.
    pub fn claim(&self, tokens: &TokenPool) -> Option<QueuedTask> {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        loop {
            if inner.shutdown {
                return None;
            }

            if let Some(index) = self.pick_runnable(&inner, tokens) {
                let Some(queued) = inner.pending.remove(index) else {
                    continue;
                };
                inner.running += 1;
                if queued.kind == StageKind::Sequential {
                    inner.sequential_running.insert(queued.task.stage_id);
                }
                tracing::trace!(
                    "claimed task {} (stage {})",
                    queued.task.task_id.0,
                    queued.task.stage_id.0
                );
                return Some(queued);
            }

            // Token releases do not go through the queue, so idle waits are
            // bounded and admission is re-checked on each pass.
            let (guard, _) = self
                .work_ready
                .wait_timeout(inner, Duration::from_millis(1))
                .expect("task queue lock poisoned");
            inner = guard;
        }
    }

    /// Picks the index of a claimable pending task and takes its admission
    /// credit. With ordering enabled the claimable task with the lowest
    /// stream order wins; otherwise the first one found does.
    fn pick_runnable(&self, inner: &QueueInner, tokens: &TokenPool) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (index, queued) in inner.pending.iter().enumerate() {
            if !inner.is_unblocked(queued.task.task_id) {
                continue;
            }
            if queued.kind == StageKind::Sequential
                && inner.sequential_running.contains(&queued.task.stage_id)
            {
                continue;
            }
            if queued.task.hard && !queued.task.locality.contains(&self.local_node) {
                tracing::warn!(
                    "task {} is pinned to {:?} and cannot run here",
                    queued.task.task_id.0,
                    queued.task.locality
                );
                continue;
            }
            if queued.is_source && tokens.capacity() > 0 && tokens.available() == 0 {
                continue;
            }

            if !self.ordering {
                best = Some((index, queued.task.order));
                break;
            }
            if best.is_none_or(|(_, order)| queued.task.order < order) {
                best = Some((index, queued.task.order));
            }
        }

        let (index, _) = best?;
        let chosen = inner.pending.get(index)?;
        if chosen.is_source && tokens.capacity() > 0 && !tokens.try_allocate(1) {
            // Another worker took the last token between the scan and here.
            return None;
        }
        Some(index)
    }

    /// Records a task's completion, releases everything gated on it, and
    /// detects the end of the run.
    pub fn complete(
        &self,
        task: TaskDescriptor,
        kind: StageKind,
        result: Result<(), EngineError>,
    ) {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        inner.running -= 1;
        if kind == StageKind::Sequential {
            inner.sequential_running.remove(&task.stage_id);
        }

        let task_id = task.task_id;
        inner.completed.insert(task_id);
        if let Some(blocked) = inner.unblocks.remove(&task_id) {
            for waiting in blocked {
                if let Some(set) = inner.gates.get_mut(&waiting) {
                    set.remove(&task_id);
                }
            }
        }

        if let Err(error) = result {
            tracing::error!("task {} failed: {}", task_id.0, error);
            if inner.error.is_none() {
                inner.error = Some(error);
            }
            inner.aborting = true;
            inner.pending.clear();
        }

        if inner.pending.is_empty() && inner.running == 0 {
            tracing::debug!("graph drained at task {}", task_id.0);
            inner.drained = true;
            inner.terminal = Some(task);
            self.run_done.notify_all();
        }
        drop(inner);
        self.work_ready.notify_all();
    }

    /// Blocks until the current run drains and returns its terminal
    /// descriptor or first error.
    pub fn wait_run_complete(&self) -> Result<TaskDescriptor, EngineError> {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        while !inner.drained {
            inner = self
                .run_done
                .wait(inner)
                .expect("task queue lock poisoned");
        }
        match inner.error.take() {
            Some(error) => Err(error),
            None => inner.terminal.take().ok_or(EngineError::Aborted),
        }
    }

    /// Clears per-run state so the next composition starts clean.
    pub fn reset_run(&self) {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        inner.pending.clear();
        inner.gates.clear();
        inner.unblocks.clear();
        inner.completed.clear();
        inner.sequential_running.clear();
        inner.aborting = false;
        inner.error = None;
        inner.drained = false;
        inner.terminal = None;
    }

    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("task queue lock poisoned");
        inner.shutdown = true;
        drop(inner);
        self.work_ready.notify_all();
        self.run_done.notify_all();
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .expect("task queue lock poisoned")
            .pending
            .len()
    }
}
