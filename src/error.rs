use crate::scheduler::types::DataRef;
use thiserror::Error;

/// Errors surfaced by the engine and its scheduler back end.
///
/// Token exhaustion is deliberately absent: running out of tokens switches
/// divide-and-conquer branches to the sequential policy and is never reported
/// as a failure.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The pattern composition cannot be translated into a task graph.
    /// Raised during pipeline setup, before any stage is registered or any
    /// task submitted.
    #[error("unsupported pattern composition: {0}")]
    UnsupportedPattern(&'static str),

    /// A divider returned fewer than two subproblems for a value the
    /// predicate did not accept as a base case.
    #[error("divide produced {0} subproblems, at least 2 are required")]
    MalformedDivide(usize),

    /// A data reference pointed at a slot that was already released or never
    /// existed.
    #[error("data slot {0:?} is missing or already released")]
    SlotMissing(DataRef),

    /// A stored value did not have the type the stage expected.
    #[error("payload type mismatch, expected {expected}")]
    PayloadType { expected: &'static str },

    /// A user callable failed while a stage was executing it.
    #[error("stage failure: {0}")]
    StageFailure(String),

    /// The run was aborted by an earlier stage failure.
    #[error("run aborted")]
    Aborted,

    /// `run` was invoked without a source stage registered as stage 0.
    #[error("no source stage registered for this run")]
    MissingSource,
}
