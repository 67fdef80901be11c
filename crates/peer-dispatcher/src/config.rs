use std::time::Duration;

/// Per-connection dispatcher settings. Read once when the dispatcher is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long a block request may stay unanswered before the peer is considered to be snubbing us
    pub request_timeout: Duration,
}

impl DispatcherConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(request_timeout: Duration) -> Self {
        DispatcherConfig { request_timeout }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig::new(Self::DEFAULT_REQUEST_TIMEOUT)
    }
}
