//! Configuration management

use agentflow_sqs::queue::MAX_WAIT_TIME_SECONDS;
use agentflow_sqs::registry::DEFAULT_BASE_URL;
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    /// Prefix of every queue URL handed out
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_sweep_interval")]
    pub retention_sweep_interval_secs: u64,

    /// Long-poll wait used by job queue receives
    #[serde(default = "default_job_queue_wait")]
    pub job_queue_wait_time_secs: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            retention_sweep_interval_secs: default_sweep_interval(),
            job_queue_wait_time_secs: default_job_queue_wait(),
        }
    }
}

fn default_port() -> u16 {
    9324
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_job_queue_wait() -> i64 {
    20
}

impl Config {
    /// Load configuration from an optional TOML file and environment
    /// variables such as `AGENTFLOW_QUEUE__BASE_URL`. A missing default file
    /// is not an error; a missing explicit path is.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::File::with_name(path.unwrap_or("agentflow")).required(path.is_some()),
            )
            .add_source(
                config::Environment::with_prefix("AGENTFLOW")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config = config.try_deserialize::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail later, on every request
    pub fn validate(&self) -> anyhow::Result<()> {
        let wait = self.queue.job_queue_wait_time_secs;
        if !(0..=i64::from(MAX_WAIT_TIME_SECONDS)).contains(&wait) {
            anyhow::bail!(
                "queue.job_queue_wait_time_secs must be between 0 and {MAX_WAIT_TIME_SECONDS}, got {wait}"
            );
        }
        if self.queue.retention_sweep_interval_secs == 0 {
            anyhow::bail!("queue.retention_sweep_interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 9324);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.queue.base_url, "http://localhost:9324/queue");
        assert_eq!(config.queue.retention_sweep_interval_secs, 60);
        assert_eq!(config.queue.job_queue_wait_time_secs, 20);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                "[queue]\nbase_url = \"http://queues.internal/q\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.queue.base_url, "http://queues.internal/q");
        assert_eq!(config.queue.job_queue_wait_time_secs, 20);
        assert_eq!(config.server.port, 9324);
    }

    #[test]
    fn test_validate_rejects_out_of_range_job_queue_wait() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.queue.job_queue_wait_time_secs = 21;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("job_queue_wait_time_secs"));

        config.queue.job_queue_wait_time_secs = -1;
        assert!(config.validate().is_err());

        config.queue.job_queue_wait_time_secs = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sweep_interval() {
        let mut config = Config::default();
        config.queue.retention_sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(Config::load(Some("/nonexistent/agentflow-config")).is_err());
    }
}
