use std::time::Duration;

/// Settings for [`TransferEngine`](crate::application::engine::TransferEngine).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on the work done inside one atomic scope. When it fires the
    /// scope is rolled back and the transfer fails with `Timeout`.
    pub scope_timeout: Option<Duration>,
}

impl EngineConfig {
    pub fn with_scope_timeout(mut self, timeout: Duration) -> Self {
        self.scope_timeout = Some(timeout);
        self
    }
}

/// Settings shared by the store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long a scope waits for a row lock before failing with a transient error.
    pub lock_timeout: Option<Duration>,
}

impl StoreConfig {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Some(Self::DEFAULT_LOCK_TIMEOUT),
        }
    }
}
