//! World configuration.

/// Default per-ref history capacity.
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Configuration for an STM world.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of versions retained per ref.
    ///
    /// Larger values let longer-running readers keep their snapshot at
    /// the cost of memory; a reader whose snapshot falls off the back
    /// of the window is retried against the latest state.
    pub max_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-ref history capacity. Clamped to at least 1.
    #[must_use]
    pub fn max_history(mut self, capacity: usize) -> Self {
        self.max_history = capacity.max(1);
        self
    }
}
