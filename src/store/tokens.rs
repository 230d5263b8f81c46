//! Token pool.
//!
//! Admission credits shared by every task on a node. One token stands for one
//! in-flight item chain in a pipeline, or one outstanding subproblem record in
//! a divide-and-conquer tree. The pool bounds how far a generator can run
//! ahead of its consumers and how wide a divide-and-conquer fan-out may grow;
//! when `try_allocate` fails, the caller switches to its sequential path
//! instead of waiting.

use std::sync::Mutex;

pub struct TokenPool {
    capacity: usize,
    available: Mutex<usize>,
}

impl TokenPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves `count` tokens atomically. Never blocks: either all `count`
    /// tokens are taken or none are.
    ///
    /// A zero-capacity pool refuses every nonzero request, which pushes all
    /// callers onto their sequential paths.
    pub fn try_allocate(&self, count: usize) -> bool {
        if count == 0 {
            return true;
        }
        let mut available = self.available.lock().expect("token pool lock poisoned");
        if *available >= count {
            *available -= count;
            tracing::trace!("allocated {} tokens, {} left", count, *available);
            true
        } else {
            tracing::debug!(
                "token allocation of {} refused, only {} available",
                count,
                *available
            );
            false
        }
    }

    /// Returns `count` tokens to the pool, clamped at capacity.
    pub fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut available = self.available.lock().expect("token pool lock poisoned");
        *available = (*available + count).min(self.capacity);
        tracing::trace!("released {} tokens, {} available", count, *available);
    }

    /// Current number of unreserved tokens.
    pub fn available(&self) -> usize {
        *self.available.lock().expect("token pool lock poisoned")
    }
}
