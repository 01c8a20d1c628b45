//! Watcher configuration.
use std::time::Duration;

/// Knobs for the watcher actor and its chain queries.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Capacity of the command inbox; senders wait when it is full.
    pub inbox_capacity: usize,
    /// Backoff applied to failing chain queries.
    pub retry: RetryConfig,
    /// Upper bound on a single chain query attempt.
    pub query_timeout: Duration,
    /// Blocks whose body could not be fetched, kept for another try.
    pub max_deferred_blocks: usize,
    /// Wall-clock budget for all chain queries made while handling one
    /// registration or notification. Retries stop once it is spent.
    pub command_deadline: Duration,
    /// Chain queries in flight at once during a confirmation recheck.
    pub max_concurrent_queries: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
            retry: RetryConfig::default(),
            query_timeout: Duration::from_secs(30),
            max_deferred_blocks: 16,
            command_deadline: Duration::from_secs(60),
            max_concurrent_queries: 16,
        }
    }
}

impl WatcherConfig {
    /// Set the inbox capacity (minimum 1).
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity.max(1);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt query timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set how many unfetchable blocks are held for retry.
    pub fn with_max_deferred_blocks(mut self, n: usize) -> Self {
        self.max_deferred_blocks = n;
        self
    }

    /// Set the per-command query budget.
    pub fn with_command_deadline(mut self, deadline: Duration) -> Self {
        self.command_deadline = deadline;
        self
    }

    /// Set how many recheck queries may run at once (minimum 1).
    pub fn with_max_concurrent_queries(mut self, n: usize) -> Self {
        self.max_concurrent_queries = n.max(1);
        self
    }
}

/// Exponential backoff for chain queries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// First delay between attempts.
    pub initial_backoff: Duration,
    /// Delay ceiling.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}
