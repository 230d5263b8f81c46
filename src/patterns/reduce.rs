//! Reducer window state.
//!
//! A reducer is single-threaded by construction: the translator registers it
//! as a sequential stage, so the window is only ever touched by one task at a
//! time. The handle keeps the typed window behind erased entry points so the
//! translator can drive it without knowing the item type.

use super::{Payload, downcast};
use crate::error::EngineError;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct ReduceHandle {
    add: Box<dyn Fn(Payload) -> Result<(), EngineError> + Send + Sync>,
    needed: Box<dyn Fn() -> bool + Send + Sync>,
    reduce: Box<dyn Fn() -> Result<Payload, EngineError> + Send + Sync>,
    local_order: AtomicU64,
}

impl ReduceHandle {
    pub(crate) fn new<I, C>(window_size: usize, offset: usize, identity: I, combiner: C) -> Self
    where
        I: Clone + Send + Sync + 'static,
        C: Fn(I, I) -> I + Send + Sync + 'static,
    {
        let window_size = window_size.max(1);
        let offset = offset.clamp(1, window_size);
        let window: std::sync::Arc<Mutex<Vec<I>>> =
            std::sync::Arc::new(Mutex::new(Vec::with_capacity(window_size)));

        let add_window = window.clone();
        let add = Box::new(move |payload: Payload| {
            let item = downcast::<I>(payload)?;
            add_window
                .lock()
                .expect("reduce window lock poisoned")
                .push(item);
            Ok(())
        });

        let needed_window = window.clone();
        let needed =
            Box::new(move || needed_window.lock().expect("reduce window lock poisoned").len() >= window_size);

        let reduce = Box::new(move || {
            let mut window = window.lock().expect("reduce window lock poisoned");
            let folded = window
                .iter()
                .take(window_size)
                .cloned()
                .fold(identity.clone(), |acc, item| combiner(acc, item));
            let drop_count = offset.min(window.len());
            window.drain(..drop_count);
            Ok(Box::new(folded) as Payload)
        });

        Self {
            add,
            needed,
            reduce,
            local_order: AtomicU64::new(0),
        }
    }

    /// Appends one item to the window.
    pub(crate) fn add_item(&self, payload: Payload) -> Result<(), EngineError> {
        (self.add)(payload)
    }

    /// Whether the window holds enough items to reduce.
    pub(crate) fn reduction_needed(&self) -> bool {
        (self.needed)()
    }

    /// Folds the current window sequentially and slides it forward.
    pub(crate) fn reduce_window(&self) -> Result<Payload, EngineError> {
        (self.reduce)()
    }

    /// Next emission order. Monotone per reducer instance.
    pub(crate) fn next_order(&self) -> u64 {
        self.local_order.fetch_add(1, Ordering::SeqCst)
    }
}
