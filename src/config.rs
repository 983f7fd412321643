use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use serde::Deserialize;
use crate::session::{ControllerConfig, DuplicatePolicy, UploadOptions};
use crate::tus::{TusClientConfig, DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT};
use crate::utils::DEFAULT_RETRY_DELAYS;

/// `config.toml` 的内容，未填写的字段使用默认值
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub endpoint: String,
    pub token: Option<String>,
    pub bucket: Option<String>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub upsert: bool,

    pub chunk_size: usize,
    pub large_file_threshold: u64,
    pub max_concurrent: usize,
    pub retry_delays_ms: Vec<u64>,
    pub duplicate_policy: DuplicatePolicy,
    pub speed_smoothing: Option<f64>,

    /// 不设置时历史只保存在内存中
    pub history_file: Option<PathBuf>,
    pub history_limit: usize,

    /// 单位秒
    pub timeout: u64,
    pub headers: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let controller = ControllerConfig::default();

        Self {
            endpoint: String::new(),
            token: None,
            bucket: None,
            content_type: None,
            cache_control: None,
            upsert: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            large_file_threshold: controller.large_file_threshold,
            max_concurrent: controller.max_concurrent,
            retry_delays_ms: DEFAULT_RETRY_DELAYS
                .iter()
                .map(|delay| delay.as_millis() as u64)
                .collect(),
            duplicate_policy: controller.duplicate_policy,
            speed_smoothing: None,
            history_file: None,
            history_limit: controller.history_limit,
            timeout: DEFAULT_TIMEOUT,
            headers: HashMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        Self::parse(&config_str).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn parse(config_str: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(config_str)?;
        anyhow::ensure!(!config.endpoint.is_empty(), "endpoint is required");
        anyhow::ensure!(config.chunk_size > 0, "chunk_size must be greater than 0");
        Ok(config)
    }

    pub fn client_config(&self) -> TusClientConfig {
        TusClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            headers: self.headers.clone(),
            ..Default::default()
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            max_concurrent: self.max_concurrent,
            large_file_threshold: self.large_file_threshold,
            retry_delays: self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect(),
            duplicate_policy: self.duplicate_policy,
            history_limit: self.history_limit,
            speed_smoothing: self.speed_smoothing,
            ..Default::default()
        }
    }

    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size,
            bucket: self.bucket.clone(),
            token: self.token.clone(),
            content_type: self.content_type.clone(),
            cache_control: self.cache_control.clone(),
            upsert: self.upsert,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = Config::parse(r#"endpoint = "http://localhost:1080/files/""#).unwrap();

        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.retry_delays_ms, vec![0, 3000, 5000, 10000, 20000]);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert!(config.history_file.is_none());

        let controller = config.controller_config();
        assert_eq!(controller.retry_delays, DEFAULT_RETRY_DELAYS.to_vec());
        assert_eq!(controller.max_concurrent, 3);
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            endpoint = "https://project.example.co/storage/v1/upload/resumable"
            token = "secret"
            bucket = "photos"
            upsert = true
            chunk_size = 1048576
            max_concurrent = 1
            retry_delays_ms = [0, 100]
            duplicate_policy = "supersede"
            speed_smoothing = 0.3
            history_file = "history.json"

            [headers]
            apikey = "anon"
            "#,
        )
        .unwrap();

        let options = config.upload_options();
        assert_eq!(options.chunk_size, 1024 * 1024);
        assert_eq!(options.bucket.as_deref(), Some("photos"));
        assert_eq!(options.token.as_deref(), Some("secret"));
        assert!(options.upsert);

        let controller = config.controller_config();
        assert_eq!(controller.duplicate_policy, DuplicatePolicy::Supersede);
        assert_eq!(controller.retry_delays, vec![Duration::ZERO, Duration::from_millis(100)]);
        assert_eq!(controller.speed_smoothing, Some(0.3));

        let client = config.client_config();
        assert_eq!(client.headers.get("apikey").map(String::as_str), Some("anon"));
    }

    #[test]
    fn test_missing_endpoint() {
        assert!(Config::parse("chunk_size = 10").is_err());
        assert!(Config::parse(r#"endpoint = "http://x"
chunk_size = 0"#).is_err());
    }
}
