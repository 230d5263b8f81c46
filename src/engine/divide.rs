//! Divide-and-conquer orchestration.
//!
//! The task graph is grown at runtime: a divide task that fans out creates
//! its own merger and child tasks while it executes. Problems travel as
//! `(problem, result)` records; a task's record slot doubles as the place its
//! result is written back to, so a merger finds every partial result through
//! the data locations recorded on its descriptor.
//!
//! Fan-out is budgeted by the token pool. A divide task that cannot reserve
//! one token per subproblem evaluates its whole subtree with the sequential
//! policy on the spot instead of waiting for budget.

use super::sequential::SequentialExecution;
use crate::error::EngineError;
use crate::scheduler::types::{StageId, TaskDescriptor};
use crate::scheduler::{Scheduler, StageFn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Stage ids of the four registered divide-and-conquer stages. Filled once
/// after registration; the stage closures read it at execution time.
struct DcStages {
    divide: StageId,
    merge: StageId,
    end: StageId,
}

/// Runs a full divide-and-conquer evaluation on the scheduler and returns
/// the combined result.
pub(crate) fn execute<S, I, R, D, P, V, C>(
    scheduler: &Arc<S>,
    input: I,
    divide: D,
    predicate: P,
    solve: V,
    combine: C,
) -> Result<R, EngineError>
where
    S: Scheduler,
    I: Clone + Send + Sync + 'static,
    R: Clone + Default + Send + Sync + 'static,
    D: Fn(&I) -> Vec<I> + Send + Sync + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
    V: Fn(&I) -> R + Send + Sync + 'static,
    C: Fn(R, R) -> R + Send + Sync + 'static,
{
    let divide = Arc::new(divide);
    let predicate = Arc::new(predicate);
    let solve = Arc::new(solve);
    let combine = Arc::new(combine);
    let stages: Arc<OnceLock<DcStages>> = Arc::new(OnceLock::new());
    // Tokens the seed consumed; the ending task hands them back.
    let seed_tokens = Arc::new(AtomicUsize::new(0));

    let merge_fn = merge_stage::<S, I, R, _>(combine.clone());
    let divide_fn = divide_stage::<S, I, R, _, _, _, _>(
        stages.clone(),
        divide.clone(),
        predicate.clone(),
        solve.clone(),
        combine.clone(),
    );
    let init_fn = init_stage::<S, I, R>(stages.clone(), seed_tokens.clone(), divide_fn.clone(), input);
    let end_fn = end_stage::<S>(seed_tokens);

    scheduler.register_parallel_stage(init_fn, true);
    let divide_id = scheduler.register_parallel_stage(divide_fn, false);
    let merge_id = scheduler.register_parallel_stage(merge_fn, false);
    let end_id = scheduler.register_sequential_stage(end_fn, false);
    let _ = stages.set(DcStages {
        divide: divide_id,
        merge: merge_id,
        end: end_id,
    });

    let terminal = scheduler.run()?;
    let result_ref = *terminal.input().ok_or(EngineError::Aborted)?;
    let record: (I, R) = scheduler.get_release_all(&result_ref)?;
    Ok(record.1)
}

/// Seeding stage: stores the root record, wires up the ending task and runs
/// the first divide step inline on its own descriptor.
fn init_stage<S, I, R>(
    stages: Arc<OnceLock<DcStages>>,
    seed_tokens: Arc<AtomicUsize>,
    divide_fn: StageFn<S>,
    input: I,
) -> StageFn<S>
where
    S: Scheduler,
    I: Clone + Send + Sync + 'static,
    R: Clone + Default + Send + Sync + 'static,
{
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let table = stage_table(&stages)?;

        // The seed's admission credit plus, budget permitting, one token for
        // the root record slot.
        let mut consumed = if sched.token_capacity() > 0 { 1 } else { 0 };
        if sched.allocate_tokens(1) {
            consumed += 1;
        } else {
            tracing::debug!("root record stored without a token, pool exhausted");
        }
        seed_tokens.store(consumed, Ordering::SeqCst);

        let root_ref = sched.put((input.clone(), R::default()));
        task.data_location = vec![root_ref];
        task.locality = vec![sched.local_node()];
        task.hard = false;

        let end_id = sched.next_task_id();
        let end_task = TaskDescriptor::new(
            table.end,
            end_id,
            task.order,
            vec![sched.local_node()],
            false,
            vec![root_ref],
        )
        .with_before_dep([task.task_id]);
        task.after_dep = BTreeSet::from([end_id]);
        sched.submit_task(end_task, true);
        tracing::debug!("seeded divide-and-conquer, ending task {}", end_id.0);

        divide_fn(sched, task)
    })
}

/// The recursive step: solve base cases in place, otherwise fan out into
/// child divide tasks plus a merger, or fall back to the sequential policy
/// when the token pool cannot cover the fan-out.
fn divide_stage<S, I, R, D, P, V, C>(
    stages: Arc<OnceLock<DcStages>>,
    divide: Arc<D>,
    predicate: Arc<P>,
    solve: Arc<V>,
    combine: Arc<C>,
) -> StageFn<S>
where
    S: Scheduler,
    I: Clone + Send + Sync + 'static,
    R: Clone + Default + Send + Sync + 'static,
    D: Fn(&I) -> Vec<I> + Send + Sync + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
    V: Fn(&I) -> R + Send + Sync + 'static,
    C: Fn(R, R) -> R + Send + Sync + 'static,
{
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let table = stage_table(&stages)?;
        let record_ref = *task.input().ok_or_else(|| EngineError::StageFailure(
            "divide task without a problem record".into(),
        ))?;
        let mut record: (I, R) = sched.get(&record_ref)?;

        if predicate(&record.0) {
            record.1 = solve(&record.0);
            sched.put_at(&record_ref, record)?;
            sched.finish_task(task, 0);
            return Ok(());
        }

        let subproblems = divide(&record.0);
        if subproblems.len() < 2 {
            return Err(EngineError::MalformedDivide(subproblems.len()));
        }

        if !sched.allocate_tokens(subproblems.len()) {
            tracing::debug!(
                "task {} out of tokens for {} subproblems, solving sequentially",
                task.task_id.0,
                subproblems.len()
            );
            let sequential = SequentialExecution;
            record.1 = sequential.divide_conquer(
                record.0.clone(),
                divide.as_ref(),
                predicate.as_ref(),
                solve.as_ref(),
                combine.as_ref(),
            )?;
            sched.put_at(&record_ref, record)?;
            sched.finish_task(task, 0);
            return Ok(());
        }

        let merger_id = sched.next_task_id();
        let mut merger = TaskDescriptor::new(
            table.merge,
            merger_id,
            task.order,
            task.locality.clone(),
            task.hard,
            task.data_location.clone(),
        );
        merger.after_dep = task.after_dep.clone();

        for subproblem in subproblems {
            let child_ref = sched.put((subproblem, R::default()));
            let child = TaskDescriptor::new(
                table.divide,
                sched.next_task_id(),
                task.order,
                vec![sched.local_node()],
                false,
                vec![child_ref],
            )
            .with_after_dep([merger_id]);
            merger.before_dep.insert(child.task_id);
            merger.data_location.push(child_ref);
            sched.submit_task(child, false);
        }
        tracing::debug!(
            "task {} fanned out into {} children under merger {}",
            task.task_id.0,
            merger.before_dep.len(),
            merger_id.0
        );
        sched.submit_task(merger, false);
        sched.finish_task(task, 0);
        Ok(())
    })
}

/// Merger: fold the children's partial results into the parent record and
/// hand the children's tokens back.
fn merge_stage<S, I, R, C>(combine: Arc<C>) -> StageFn<S>
where
    S: Scheduler,
    I: Clone + Send + Sync + 'static,
    R: Clone + Default + Send + Sync + 'static,
    C: Fn(R, R) -> R + Send + Sync + 'static,
{
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let locations = task.data_location.clone();
        let parent_ref = *locations.first().ok_or_else(|| EngineError::StageFailure(
            "merge task without a parent record".into(),
        ))?;
        let mut record: (I, R) = sched.get(&parent_ref)?;
        for child_ref in &locations[1..] {
            let partial: (I, R) = sched.get_release(child_ref)?;
            record.1 = combine(record.1, partial.1);
        }
        sched.put_at(&parent_ref, record)?;
        sched.finish_task(task, locations.len() - 1);
        Ok(())
    })
}

/// Ending stage: returns the tokens the seed consumed. The result record
/// itself stays live for the caller to collect.
fn end_stage<S: Scheduler>(seed_tokens: Arc<AtomicUsize>) -> StageFn<S> {
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        sched.finish_task(task, seed_tokens.load(Ordering::SeqCst));
        Ok(())
    })
}

fn stage_table(stages: &OnceLock<DcStages>) -> Result<&DcStages, EngineError> {
    stages.get().ok_or_else(|| {
        EngineError::StageFailure("divide-and-conquer stage table was not initialized".into())
    })
}
