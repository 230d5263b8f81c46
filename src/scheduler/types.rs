use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Unique identifier for a node in the cluster.
///
/// The in-process back end runs as a single node, but descriptors keep the
/// field so locality hints stay meaningful when tasks are shipped elsewhere.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Globally unique identifier of a submitted task within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

/// Index of a registered stage function.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub usize);

impl StageId {
    /// The stage registered immediately after this one. Pipeline chains are
    /// registered left to right, so the successor of a stage in the chain is
    /// always the next id.
    pub fn next(self) -> StageId {
        StageId(self.0 + 1)
    }
}

/// Identifier of one cell in the data store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u64);

/// Handle to a single value held by the distributed data store.
///
/// Immutable once issued. The slot behind it is freed at most once; any
/// access after release fails with `SlotMissing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DataRef {
    pub node: NodeId,
    pub slot: SlotId,
}

impl DataRef {
    pub fn new(node: NodeId, slot: SlotId) -> Self {
        Self { node, slot }
    }
}

/// Whether a stage may run concurrently with itself.
///
/// A sequential stage sees one task at a time on a node. Reducers and
/// generators rely on this to keep their internal state single-threaded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StageKind {
    Sequential,
    Parallel,
}

/// One unit of work: which stage function to invoke, where its inputs live,
/// and which tasks it is ordered against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Registered stage function to invoke.
    pub stage_id: StageId,
    /// Unique id of this task within the run.
    pub task_id: TaskId,
    /// Stream position of the item this task carries. Metadata only: stages
    /// propagate it but the engine never reorders on output.
    pub order: u64,
    /// Nodes this task prefers to run on, most preferred first.
    pub locality: Vec<NodeId>,
    /// When set, the task must run on one of its locality nodes instead of
    /// treating them as a hint.
    pub hard: bool,
    /// Input data references, consumed by the stage function.
    pub data_location: Vec<DataRef>,
    /// Tasks that must complete before this one may run.
    pub before_dep: BTreeSet<TaskId>,
    /// Tasks that are unblocked when this one completes.
    pub after_dep: BTreeSet<TaskId>,
}

impl TaskDescriptor {
    pub fn new(
        stage_id: StageId,
        task_id: TaskId,
        order: u64,
        locality: Vec<NodeId>,
        hard: bool,
        data_location: Vec<DataRef>,
    ) -> Self {
        Self {
            stage_id,
            task_id,
            order,
            locality,
            hard,
            data_location,
            before_dep: BTreeSet::new(),
            after_dep: BTreeSet::new(),
        }
    }

    pub fn with_before_dep(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.before_dep = deps.into_iter().collect();
        self
    }

    pub fn with_after_dep(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.after_dep = deps.into_iter().collect();
        self
    }

    /// First input reference. Stage functions that consume exactly one item
    /// read through this.
    pub fn input(&self) -> Option<&DataRef> {
        self.data_location.first()
    }
}
