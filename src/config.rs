//! Engine configuration.
//!
//! Defaults can be overridden through the environment, which is how deployment
//! scripts tune a node without recompiling:
//! - `TASKWEAVE_WORKERS`: worker thread count.
//! - `TASKWEAVE_TOKENS`: token pool capacity (0 disables admission control and
//!   all parallel fan-out budgets).
//! - `TASKWEAVE_ORDERING`: default value of the advisory ordering flag.

/// Runtime knobs owned by the execution policy facade.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Number of worker threads the scheduler back end spawns.
    pub workers: usize,
    /// Token pool capacity. One token admits one in-flight item chain or one
    /// divide-and-conquer subproblem.
    pub tokens: usize,
    /// Whether ordered execution is requested. Advisory: the engine carries
    /// item order as metadata and a back end may use it to prefer older items.
    pub ordering: bool,
}

impl Configuration {
    pub fn new(workers: usize, tokens: usize) -> Self {
        Self {
            workers: workers.max(1),
            tokens,
            ordering: false,
        }
    }

    /// Builds a configuration from the environment, falling back to the
    /// hardware parallelism and a token pool of 128.
    pub fn from_env() -> Self {
        let workers = std::env::var("TASKWEAVE_WORKERS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or_else(default_workers);
        let tokens = std::env::var("TASKWEAVE_TOKENS")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(128);
        let ordering = std::env::var("TASKWEAVE_ORDERING")
            .ok()
            .and_then(|value| value.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            workers: workers.max(1),
            tokens,
            ordering,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tokens: 128,
            ordering: false,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
