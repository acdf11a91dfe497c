use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::transform::TransformKind;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection string for the task queue
    pub redis_url: String,

    /// Redis list holding pending task messages
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Bucket holding source images and transform results
    pub bucket_name: String,

    /// Bucket region (ignored by most S3-compatible endpoints)
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Custom endpoint URL for S3-compatible stores (MinIO, R2, ...)
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    /// Access key ID. Falls back to the ambient AWS credential chain when unset.
    #[serde(default)]
    pub s3_access_key: Option<String>,

    /// Secret access key
    #[serde(default)]
    pub s3_secret_key: Option<String>,

    /// Use path-style bucket addressing
    #[serde(default)]
    pub s3_path_style: bool,

    /// Maximum number of messages pulled from the queue per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent dispatcher workers. When unset, one worker per task in the batch.
    #[serde(default)]
    pub worker_count: Option<usize>,

    /// Run the publisher track alongside the consumer
    #[serde(default = "default_true")]
    pub publish_enabled: bool,

    #[serde(default = "default_publish_interval_secs")]
    pub publish_interval_secs: u64,

    /// Tasks enqueued per publish round
    #[serde(default = "default_publish_batch_size")]
    pub publish_batch_size: usize,

    /// Wall-clock budget of one invocation
    #[serde(default = "default_invocation_deadline_secs")]
    pub invocation_deadline_secs: u64,

    /// Wait after an empty poll or a failed extraction
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Key prefix the publisher samples source images from
    #[serde(default = "default_input_prefix")]
    pub input_prefix: String,

    /// Destination folder for transform results
    #[serde(default = "default_output_folder")]
    pub output_folder: String,

    /// Ordered list of transforms applied to every task (comma-separated)
    #[serde(default = "default_transforms")]
    pub transforms: Vec<String>,

    #[serde(default = "default_brighten_gamma")]
    pub brighten_gamma: f32,

    /// Process-local directory for scratch files
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_queue_key() -> String {
    "image_tasks".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_publish_interval_secs() -> u64 {
    10
}

fn default_publish_batch_size() -> usize {
    10
}

// 14 minutes, leaving headroom under the 15 minute serverless ceiling
fn default_invocation_deadline_secs() -> u64 {
    840
}

fn default_idle_backoff_ms() -> u64 {
    1000
}

fn default_input_prefix() -> String {
    "input-images/".to_string()
}

fn default_output_folder() -> String {
    "bw-images".to_string()
}

fn default_transforms() -> Vec<String> {
    vec!["monochrome".to_string(), "bright".to_string()]
}

fn default_brighten_gamma() -> f32 {
    0.1
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl AppConfig {
    /// Load from the process environment (and `.env` when present), then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build from an explicit set of variables. Used by tests.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size cannot be 0".to_string()));
        }
        if self.worker_count == Some(0) {
            return Err(ConfigError::Invalid("worker_count cannot be 0".to_string()));
        }
        if self.invocation_deadline_secs == 0 {
            return Err(ConfigError::Invalid(
                "invocation_deadline_secs cannot be 0".to_string(),
            ));
        }
        if self.publish_enabled && self.publish_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "publish_batch_size cannot be 0".to_string(),
            ));
        }
        if self.publish_enabled && self.publish_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "publish_interval_secs cannot be 0".to_string(),
            ));
        }
        if self.idle_backoff_ms == 0 {
            return Err(ConfigError::Invalid("idle_backoff_ms cannot be 0".to_string()));
        }
        if self.transforms.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one transform must be configured".to_string(),
            ));
        }
        for name in &self.transforms {
            if name.parse::<TransformKind>().is_err() {
                return Err(ConfigError::Invalid(format!("unknown transform: {}", name)));
            }
        }
        if !(self.brighten_gamma.is_finite() && self.brighten_gamma > 0.0) {
            return Err(ConfigError::Invalid(
                "brighten_gamma must be a positive number".to_string(),
            ));
        }
        Ok(())
    }

    pub fn invocation_deadline(&self) -> Duration {
        Duration::from_secs(self.invocation_deadline_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
