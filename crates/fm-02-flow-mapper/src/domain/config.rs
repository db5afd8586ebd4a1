//! Flow mapper configuration.

use crate::error::{FlowMapperError, FlowMapperResult};

/// Retry policy for flow starts that come back as not found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries before the session is errored with `FLOW_NOT_FOUND`.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMapperConfig {
    /// How long a closing mapping lingers before it is removed, so late
    /// duplicates still find it.
    pub cleanup_delay_ms: u64,
    pub flow_start_retry: RetryPolicy,
}

impl Default for FlowMapperConfig {
    fn default() -> Self {
        Self {
            cleanup_delay_ms: 30_000,
            flow_start_retry: RetryPolicy::default(),
        }
    }
}

impl FlowMapperConfig {
    pub fn validate(&self) -> FlowMapperResult<()> {
        if self.cleanup_delay_ms == 0 {
            return Err(FlowMapperError::InvalidConfig {
                reason: "cleanup_delay_ms must be positive".into(),
            });
        }
        let retry = &self.flow_start_retry;
        if retry.max_attempts > 0 && (retry.base_backoff_ms == 0 || retry.max_backoff_ms < retry.base_backoff_ms) {
            return Err(FlowMapperError::InvalidConfig {
                reason: "retry backoff must be positive and max_backoff_ms >= base_backoff_ms".into(),
            });
        }
        Ok(())
    }
}
