//! In-memory slot store.
//!
//! Holds the intermediate values that flow between stages. Each `put` claims a
//! fresh slot and returns a `DataRef`; readers either copy the value out
//! (`get`) or take it and free the slot (`take`). Values are type-erased so a
//! single store can serve every stage of a heterogeneous pipeline.

use crate::error::EngineError;
use crate::scheduler::types::{DataRef, NodeId, SlotId};
use dashmap::DashMap;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};

/// Type-erased stored value.
pub type StoredValue = Box<dyn Any + Send + Sync>;

pub struct DataStore {
    node: NodeId,
    slots: DashMap<SlotId, StoredValue>,
    next_slot: AtomicU64,
}

impl DataStore {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            slots: DashMap::new(),
            next_slot: AtomicU64::new(0),
        }
    }

    /// Stores a value in a fresh slot and returns its reference.
    pub fn put<T: Send + Sync + 'static>(&self, value: T) -> DataRef {
        let slot = SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed));
        self.slots.insert(slot, Box::new(value));
        tracing::trace!("stored value in slot {}", slot.0);
        DataRef::new(self.node, slot)
    }

    /// Overwrites the value behind an existing reference.
    ///
    /// Used by stages that reserve a slot up front and write their result
    /// into it later, such as divide-and-conquer problem records.
    pub fn put_at<T: Send + Sync + 'static>(
        &self,
        data_ref: &DataRef,
        value: T,
    ) -> Result<(), EngineError> {
        match self.slots.get_mut(&data_ref.slot) {
            Some(mut cell) => {
                *cell = Box::new(value);
                Ok(())
            }
            None => Err(EngineError::SlotMissing(*data_ref)),
        }
    }

    /// Copies the value out of a slot, leaving the slot live.
    pub fn get<T: Clone + 'static>(&self, data_ref: &DataRef) -> Result<T, EngineError> {
        let cell = self
            .slots
            .get(&data_ref.slot)
            .ok_or(EngineError::SlotMissing(*data_ref))?;
        cell.downcast_ref::<T>()
            .cloned()
            .ok_or(EngineError::PayloadType {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Removes the value from a slot, freeing it.
    pub fn take<T: 'static>(&self, data_ref: &DataRef) -> Result<T, EngineError> {
        let (_, cell) = self
            .slots
            .remove(&data_ref.slot)
            .ok_or(EngineError::SlotMissing(*data_ref))?;
        match cell.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(_) => Err(EngineError::PayloadType {
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    /// Number of live slots. Every run should drain the store back to where
    /// it started.
    pub fn live_slots(&self) -> usize {
        self.slots.len()
    }
}
