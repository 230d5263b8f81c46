//! Pattern values.
//!
//! A composition is declared as a chain of [`Stage`] values built with the
//! constructors in this module. Each constructor erases the user callable
//! behind a uniform payload type so one translator can walk a heterogeneous
//! chain; the typed signatures live here and nowhere else.
//!
//! Classification is structural: the translator looks at the variant tag of
//! each chain element and applies exactly one rule per kind. Unsupported
//! shapes (an iteration wrapping a nested pipeline) are rejected before
//! anything is registered with the scheduler.

pub mod reduce;


use self::reduce::ReduceHandle;
use crate::error::EngineError;
use std::any::Any;
use std::sync::Arc;

/// Type-erased value traveling between stages.
pub(crate) type Payload = Box<dyn Any + Send + Sync>;

/// Erased transformer: consumes a payload, produces the next one.
pub(crate) type TransformFn =
    Arc<dyn Fn(Payload) -> Result<Payload, EngineError> + Send + Sync>;

/// Erased predicate over a payload.
pub(crate) type PredicateFn =
    Arc<dyn Fn(&Payload) -> Result<bool, EngineError> + Send + Sync>;

pub(crate) fn downcast<T: Send + Sync + 'static>(payload: Payload) -> Result<T, EngineError> {
    match payload.downcast::<T>() {
        Ok(boxed) => Ok(*boxed),
        Err(_) => Err(EngineError::PayloadType {
            expected: std::any::type_name::<T>(),
        }),
    }
}

/// One element of a pattern chain.
pub struct Stage(pub(crate) StageSpec);

pub(crate) enum StageSpec {
    /// Plain callable, sequential unless farmed.
    Transform(TransformFn),
    /// Parallel replication of a plain callable.
    Farm(TransformFn),
    /// Drops items failing the predicate.
    Filter(PredicateFn),
    /// Windowed sequential aggregation.
    Reduce(Arc<ReduceHandle>),
    /// Re-applies a transformer until the predicate stops holding.
    Iterate {
        body: Box<StageSpec>,
        predicate: PredicateFn,
    },
    /// Nested chain, spliced into its parent during translation.
    Pipeline(Vec<StageSpec>),
}

impl StageSpec {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            StageSpec::Transform(_) => "transform",
            StageSpec::Farm(_) => "farm",
            StageSpec::Filter(_) => "filter",
            StageSpec::Reduce(_) => "reduce",
            StageSpec::Iterate { .. } => "iteration",
            StageSpec::Pipeline(_) => "pipeline",
        }
    }
}

impl Stage {
    /// Kind of this stage, for diagnostics.
    pub fn describe(&self) -> &'static str {
        self.0.describe()
    }
}

fn erase_transform<I, O, F>(op: F) -> TransformFn
where
    F: Fn(I) -> O + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    Arc::new(move |payload| {
        let input = downcast::<I>(payload)?;
        Ok(Box::new(op(input)) as Payload)
    })
}

fn erase_predicate<I, P>(predicate: P) -> PredicateFn
where
    P: Fn(&I) -> bool + Send + Sync + 'static,
    I: Send + Sync + 'static,
{
    Arc::new(move |payload| {
        let value = payload
            .downcast_ref::<I>()
            .ok_or(EngineError::PayloadType {
                expected: std::any::type_name::<I>(),
            })?;
        Ok(predicate(value))
    })
}

/// A plain callable stage. The last stage of a chain acts as the consumer:
/// its return value is dropped.
pub fn stage<I, O, F>(op: F) -> Stage
where
    F: Fn(I) -> O + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    Stage(StageSpec::Transform(erase_transform(op)))
}

/// A farmed callable: the same transformer applied to many items
/// concurrently, with per-item order carried through as metadata.
pub fn farm<I, O, F>(op: F) -> Stage
where
    F: Fn(I) -> O + Send + Sync + 'static,
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    Stage(StageSpec::Farm(erase_transform(op)))
}

/// Keeps items satisfying the predicate and drops the rest.
pub fn filter<I, P>(predicate: P) -> Stage
where
    P: Fn(&I) -> bool + Send + Sync + 'static,
    I: Send + Sync + 'static,
{
    Stage(StageSpec::Filter(erase_predicate(predicate)))
}

/// Windowed reduction. Items accumulate into a window of `window_size`;
/// a full window is folded from `identity` with `combiner` and then slides
/// forward by `offset` items. Emissions are renumbered with a counter local
/// to the reducer.
pub fn reduce<I, C>(window_size: usize, offset: usize, identity: I, combiner: C) -> Stage
where
    I: Clone + Send + Sync + 'static,
    C: Fn(I, I) -> I + Send + Sync + 'static,
{
    Stage(StageSpec::Reduce(Arc::new(ReduceHandle::new(
        window_size,
        offset,
        identity,
        combiner,
    ))))
}

/// Applies `op` repeatedly while `predicate` holds on the produced value.
/// The first value failing the predicate flows downstream. Each repetition is
/// a fresh task, so other work interleaves with the loop.
pub fn iterate<I, F, P>(op: F, predicate: P) -> Stage
where
    F: Fn(I) -> I + Send + Sync + 'static,
    P: Fn(&I) -> bool + Send + Sync + 'static,
    I: Send + Sync + 'static,
{
    Stage(StageSpec::Iterate {
        body: Box::new(StageSpec::Transform(erase_transform(op))),
        predicate: erase_predicate(predicate),
    })
}

/// Iteration over an arbitrary stage value. Only plain transformer bodies
/// translate; anything else is rejected when the chain is built.
pub fn iterate_over<I, P>(body: Stage, predicate: P) -> Stage
where
    P: Fn(&I) -> bool + Send + Sync + 'static,
    I: Send + Sync + 'static,
{
    Stage(StageSpec::Iterate {
        body: Box::new(body.0),
        predicate: erase_predicate(predicate),
    })
}

/// A nested pipeline. Its stages are spliced into the surrounding chain by
/// concatenation before classification.
pub fn pipeline(stages: impl IntoIterator<Item = Stage>) -> Stage {
    Stage(StageSpec::Pipeline(
        stages.into_iter().map(|stage| stage.0).collect(),
    ))
}
