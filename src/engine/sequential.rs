//! Sequential execution policy.
//!
//! Used on its own for reference runs and by the divide-and-conquer stage as
//! the token-exhaustion fallback: when no tokens are left for a fan-out, the
//! whole subtree is evaluated recursively on the calling worker with the same
//! callables and no further token traffic.

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialExecution;

impl SequentialExecution {
    /// Recursive divide-and-conquer evaluation.
    ///
    /// The predicate wins over the divider: a value accepted as a base case
    /// is solved even if it could be divided further. A divider returning
    /// fewer than two subproblems for a non-base value is an error.
    pub fn divide_conquer<I, R>(
        &self,
        input: I,
        divide: &impl Fn(&I) -> Vec<I>,
        predicate: &impl Fn(&I) -> bool,
        solve: &impl Fn(&I) -> R,
        combine: &impl Fn(R, R) -> R,
    ) -> Result<R, EngineError> {
        if predicate(&input) {
            return Ok(solve(&input));
        }

        let subproblems = divide(&input);
        if subproblems.len() < 2 {
            return Err(EngineError::MalformedDivide(subproblems.len()));
        }

        let mut partials = subproblems
            .into_iter()
            .map(|sub| self.divide_conquer(sub, divide, predicate, solve, combine));
        let first = partials
            .next()
            .unwrap_or(Err(EngineError::MalformedDivide(0)))?;
        partials.try_fold(first, |acc, partial| Ok(combine(acc, partial?)))
    }
}
