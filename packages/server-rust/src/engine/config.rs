use std::time::Duration;

/// Dispatch pipeline configuration.
///
/// Controls dispatch admission and the per-request deadline.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of requests in the pipeline before new dispatches are refused.
    pub max_concurrent_requests: u32,
    /// Deadline applied to every request's signal.
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 1024,
            request_timeout: Duration::from_secs(30),
        }
    }
}
