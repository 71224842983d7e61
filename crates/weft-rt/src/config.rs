// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool configuration.

/// Environment variable overriding the default pool size.
pub const POOL_SIZE_ENV: &str = "WEFT_POOL_SIZE";

/// Default worker thread name prefix.
pub const DEFAULT_THREAD_NAME: &str = "weft-worker";

/// Settings for a [`ThreadPool`](crate::pool::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads. 0 means one per available CPU.
    pub workers: usize,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            workers: 0,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }

    /// Defaults, with the worker count taken from `WEFT_POOL_SIZE` when set.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(raw) = std::env::var(POOL_SIZE_ENV) {
            match parse_workers(&raw) {
                Some(n) => config.workers = n,
                None => tracing::warn!(
                    var = POOL_SIZE_ENV,
                    value = %raw,
                    "ignoring unparsable pool size"
                ),
            }
        }
        config
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Worker count with 0 resolved to the available parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.workers
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_workers(raw: &str) -> Option<usize> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_resolves_to_cpu_count() {
        let config = PoolConfig::new();
        assert!(config.resolved_workers() >= 1);
        assert_eq!(PoolConfig::new().with_workers(3).resolved_workers(), 3);
    }

    #[test]
    fn builder_setters() {
        let config = PoolConfig::default()
            .with_workers(2)
            .with_thread_name("test-pool");
        assert_eq!(config.workers, 2);
        assert_eq!(config.thread_name, "test-pool");
    }

    #[test]
    fn parse_worker_counts() {
        assert_eq!(parse_workers(" 8 "), Some(8));
        assert_eq!(parse_workers("eight"), None);
        assert_eq!(parse_workers("-1"), None);
    }
}
