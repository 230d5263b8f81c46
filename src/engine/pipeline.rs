//! Pipeline translation.
//!
//! Turns a generator plus a chain of pattern values into registered stage
//! functions and lets the scheduler drive them. Stage ids are assigned in
//! chain order, so every stage reaches its successor as `stage_id.next()`.
//!
//! Items travel as `(value, order)` envelopes. The order is stamped by the
//! generator, carried through every stage unchanged (reducers renumber with
//! their own counter) and never used by the engine to reorder output.

use crate::error::EngineError;
use crate::patterns::{Payload, PredicateFn, Stage, StageSpec, TransformFn};
use crate::scheduler::types::TaskDescriptor;
use crate::scheduler::{Scheduler, StageFn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// One item of a stream: the payload plus its stream position.
pub(crate) struct StreamItem {
    pub value: Payload,
    pub order: u64,
}

/// Erased generator callable.
pub(crate) type GeneratorFn = Box<dyn FnMut() -> Option<Payload> + Send>;

/// Validates and registers a full chain. Nothing is registered until the
/// whole chain has been classified, so a rejected composition leaves the
/// scheduler untouched.
pub(crate) fn translate<S: Scheduler>(
    scheduler: &Arc<S>,
    generator: GeneratorFn,
    stages: Vec<Stage>,
) -> Result<(), EngineError> {
    let chain = flatten(stages.into_iter().map(|stage| stage.0).collect());
    validate(&chain)?;

    register_generator(scheduler, generator);
    let last = chain.len() - 1;
    for (position, spec) in chain.into_iter().enumerate() {
        register_stage(scheduler, spec, position == last);
    }
    Ok(())
}

/// Splices nested pipelines into the surrounding chain by concatenation.
fn flatten(specs: Vec<StageSpec>) -> Vec<StageSpec> {
    let mut chain = Vec::with_capacity(specs.len());
    for spec in specs {
        match spec {
            StageSpec::Pipeline(inner) => chain.extend(flatten(inner)),
            other => chain.push(other),
        }
    }
    chain
}

fn validate(chain: &[StageSpec]) -> Result<(), EngineError> {
    let Some(terminal) = chain.last() else {
        return Err(EngineError::UnsupportedPattern(
            "a pipeline needs at least a consumer stage",
        ));
    };
    if !matches!(terminal, StageSpec::Transform(_) | StageSpec::Farm(_)) {
        return Err(EngineError::UnsupportedPattern(
            "a pipeline must end in a plain or farmed consumer",
        ));
    }
    for spec in chain {
        if let StageSpec::Iterate { body, .. } = spec {
            match body.as_ref() {
                StageSpec::Transform(_) => {}
                StageSpec::Pipeline(_) => {
                    return Err(EngineError::UnsupportedPattern(
                        "iteration over a nested pipeline",
                    ));
                }
                _ => {
                    return Err(EngineError::UnsupportedPattern(
                        "iteration body must be a plain transformer",
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Generator stage. Sequential and admission-controlled: every invocation
/// either emits one item and re-submits itself with the next order, or ends
/// the stream.
fn register_generator<S: Scheduler>(scheduler: &Arc<S>, generator: GeneratorFn) {
    let generator = Mutex::new(generator);
    let order = AtomicU64::new(0);

    let func: StageFn<S> = Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let produced = (*generator.lock().expect("generator lock poisoned"))();
        match produced {
            Some(value) => {
                let item_order = order.fetch_add(1, Ordering::SeqCst);
                let item_ref = sched.put(StreamItem {
                    value,
                    order: item_order,
                });
                tracing::trace!("generator emitted item {}", item_order);
                let successor = TaskDescriptor::new(
                    task.stage_id.next(),
                    sched.next_task_id(),
                    item_order,
                    vec![sched.local_node()],
                    false,
                    vec![item_ref],
                );
                sched.submit_task(successor, false);

                let continuation = TaskDescriptor::new(
                    task.stage_id,
                    sched.next_task_id(),
                    item_order + 1,
                    vec![sched.local_node()],
                    false,
                    Vec::new(),
                );
                sched.submit_task(continuation, true);
            }
            None => {
                tracing::debug!("generator exhausted");
                sched.finish_task(task, 1);
            }
        }
        Ok(())
    });
    scheduler.register_sequential_stage(func, true);
}

fn register_stage<S: Scheduler>(scheduler: &Arc<S>, spec: StageSpec, terminal: bool) {
    match spec {
        StageSpec::Transform(op) => {
            let func = if terminal {
                consumer_stage(op)
            } else {
                transform_stage(op)
            };
            scheduler.register_sequential_stage(func, false);
        }
        StageSpec::Farm(op) => {
            let func = if terminal {
                consumer_stage(op)
            } else {
                transform_stage(op)
            };
            scheduler.register_parallel_stage(func, false);
        }
        StageSpec::Filter(predicate) => {
            scheduler.register_sequential_stage(filter_stage(predicate), false);
        }
        StageSpec::Reduce(handle) => {
            scheduler.register_sequential_stage(reduce_stage(handle), false);
        }
        StageSpec::Iterate { body, predicate } => {
            let StageSpec::Transform(op) = *body else {
                // validate() has already rejected every other body shape.
                unreachable!("iteration body was validated as a transformer");
            };
            scheduler.register_sequential_stage(iterate_stage(op, predicate), false);
        }
        StageSpec::Pipeline(_) => {
            unreachable!("nested pipelines are spliced before registration");
        }
    }
}

/// Mid-chain callable: consume the input item, transform it, pass the result
/// on under the same order.
fn transform_stage<S: Scheduler>(op: TransformFn) -> StageFn<S> {
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let input_ref = *task.input().ok_or_else(|| EngineError::StageFailure(
            "transform task without input".into(),
        ))?;
        let item: StreamItem = sched.get_release(&input_ref)?;
        let value = op(item.value)?;
        let out_ref = sched.put(StreamItem {
            value,
            order: item.order,
        });
        let successor = TaskDescriptor::new(
            task.stage_id.next(),
            sched.next_task_id(),
            item.order,
            vec![sched.local_node()],
            false,
            vec![out_ref],
        );
        sched.submit_task(successor, false);
        Ok(())
    })
}

/// Terminal callable: consume the item, invoke the callable for its side
/// effects and end the chain.
fn consumer_stage<S: Scheduler>(op: TransformFn) -> StageFn<S> {
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let input_ref = *task.input().ok_or_else(|| EngineError::StageFailure(
            "consumer task without input".into(),
        ))?;
        let item: StreamItem = sched.get_release(&input_ref)?;
        op(item.value)?;
        sched.finish_task(task, 1);
        Ok(())
    })
}

/// Filter: forward passing items unchanged, end the chain of dropped ones.
fn filter_stage<S: Scheduler>(predicate: PredicateFn) -> StageFn<S> {
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let input_ref = *task.input().ok_or_else(|| EngineError::StageFailure(
            "filter task without input".into(),
        ))?;
        let item: StreamItem = sched.get_release(&input_ref)?;
        if predicate(&item.value)? {
            let order = item.order;
            let out_ref = sched.put(item);
            let successor = TaskDescriptor::new(
                task.stage_id.next(),
                sched.next_task_id(),
                order,
                vec![sched.local_node()],
                false,
                vec![out_ref],
            );
            sched.submit_task(successor, false);
        } else {
            tracing::trace!("filter dropped item {}", item.order);
            sched.finish_task(task, 1);
        }
        Ok(())
    })
}

/// Reducer: absorb items into the window; emit a folded value with a local
/// order whenever the window fills.
fn reduce_stage<S: Scheduler>(handle: Arc<crate::patterns::reduce::ReduceHandle>) -> StageFn<S> {
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let input_ref = *task.input().ok_or_else(|| EngineError::StageFailure(
            "reduce task without input".into(),
        ))?;
        let item: StreamItem = sched.get_release(&input_ref)?;
        handle.add_item(item.value)?;
        if handle.reduction_needed() {
            let value = handle.reduce_window()?;
            let order = handle.next_order();
            let out_ref = sched.put(StreamItem { value, order });
            let successor = TaskDescriptor::new(
                task.stage_id.next(),
                sched.next_task_id(),
                order,
                vec![sched.local_node()],
                false,
                vec![out_ref],
            );
            sched.submit_task(successor, false);
        } else {
            sched.finish_task(task, 1);
        }
        Ok(())
    })
}

/// Iteration: apply the transformer, then either loop as a fresh task on the
/// same stage or emit downstream. The produced value is re-stored either way.
fn iterate_stage<S: Scheduler>(op: TransformFn, predicate: PredicateFn) -> StageFn<S> {
    Arc::new(move |sched: &S, task: &mut TaskDescriptor| {
        let input_ref = *task.input().ok_or_else(|| EngineError::StageFailure(
            "iteration task without input".into(),
        ))?;
        let item: StreamItem = sched.get_release(&input_ref)?;
        let value = op(item.value)?;
        let keep_iterating = predicate(&value)?;
        let out_ref = sched.put(StreamItem {
            value,
            order: item.order,
        });
        let target_stage = if keep_iterating {
            task.stage_id
        } else {
            task.stage_id.next()
        };
        let successor = TaskDescriptor::new(
            target_stage,
            sched.next_task_id(),
            item.order,
            vec![sched.local_node()],
            false,
            vec![out_ref],
        );
        sched.submit_task(successor, false);
        Ok(())
    })
}
