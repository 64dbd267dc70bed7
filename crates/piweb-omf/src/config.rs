use piweb_client::{SdkError, SdkResult};
use std::time::Duration;

pub const DEFAULT_OMF_VERSION: &str = "1.2";
pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_MAX_CONCURRENT_CONTAINERS: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OmfConfig {
    pub omf_version: String,
    /// Target data server; sent as `dataServerWebId` when set.
    pub data_server_web_id: Option<String>,
}

impl Default for OmfConfig {
    fn default() -> Self {
        Self {
            omf_version: DEFAULT_OMF_VERSION.to_string(),
            data_server_web_id: None,
        }
    }
}

impl OmfConfig {
    pub fn for_data_server(web_id: impl Into<String>) -> Self {
        Self {
            data_server_web_id: Some(web_id.into()),
            ..Self::default()
        }
    }
}

/// How timestamps within one container's input must progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimestampOrdering {
    #[default]
    NonDecreasing,
    Strict,
    Unchecked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestionConfig {
    pub batch_size: usize,
    pub max_concurrent_containers: usize,
    pub ordering: TimestampOrdering,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_containers: DEFAULT_MAX_CONCURRENT_CONTAINERS,
            ordering: TimestampOrdering::default(),
        }
    }
}

impl IngestionConfig {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SdkResult<()> {
        if self.batch_size == 0 {
            return Err(SdkError::InvalidArgument(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_containers == 0 {
            return Err(SdkError::InvalidArgument(
                "max_concurrent_containers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded wait for a freshly created hierarchy node to show up in listings.
#[derive(Clone, Debug, PartialEq)]
pub struct VisibilityRetry {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for VisibilityRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl VisibilityRetry {
    /// No waiting between lookups; used by tests and the mock backend.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            backoff_factor: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before lookup `attempt` (1-based, the first lookup after creation).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let base = (self.initial_delay_ms as f64) * self.backoff_factor.powi(exp);
        let delay = base.min(self.max_delay_ms as f64).round().max(0.0) as u64;
        Duration::from_millis(delay)
    }
}
