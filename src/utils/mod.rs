pub mod progress;
pub mod retry;

pub use progress::{Estimate, SpeedEstimator, format_bytes, format_speed, format_eta, format_duration};
pub use retry::{retry_until_cancelled, retry_with_config, RetryConfig, DEFAULT_RETRY_DELAYS};
