//! Queue identity and configuration attributes

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::SqsError;

pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
pub const MESSAGE_RETENTION_PERIOD: &str = "MessageRetentionPeriod";
pub const DELAY_SECONDS: &str = "DelaySeconds";
pub const MAXIMUM_MESSAGE_SIZE: &str = "MaximumMessageSize";
pub const RECEIVE_MESSAGE_WAIT_TIME_SECONDS: &str = "ReceiveMessageWaitTimeSeconds";

/// Upper bound for a visibility timeout, in seconds (12 hours)
pub const MAX_VISIBILITY_TIMEOUT: u32 = 43_200;
/// Upper bound for a per-message or queue delay, in seconds
pub const MAX_DELAY_SECONDS: u32 = 900;
/// Upper bound for a long-poll wait, in seconds
pub const MAX_WAIT_TIME_SECONDS: u32 = 20;

/// Configured attributes of a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAttributes {
    pub visibility_timeout: u32,
    pub message_retention_period: u32,
    pub delay_seconds: u32,
    pub maximum_message_size: u32,
    pub receive_message_wait_time_seconds: u32,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            visibility_timeout: 30,
            message_retention_period: 1_209_600, // 14 days
            delay_seconds: 0,
            maximum_message_size: 262_144, // 256KB
            receive_message_wait_time_seconds: 0,
        }
    }
}

impl QueueAttributes {
    /// Defaults with the given overrides applied. Fails on the first unknown
    /// name or out-of-range value.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self, SqsError> {
        let mut attrs = Self::default();
        for (name, value) in overrides {
            match name.as_str() {
                VISIBILITY_TIMEOUT => {
                    attrs.visibility_timeout = parse_in_range(name, value, 0, MAX_VISIBILITY_TIMEOUT)?;
                }
                MESSAGE_RETENTION_PERIOD => {
                    attrs.message_retention_period = parse_in_range(name, value, 60, 1_209_600)?;
                }
                DELAY_SECONDS => {
                    attrs.delay_seconds = parse_in_range(name, value, 0, MAX_DELAY_SECONDS)?;
                }
                MAXIMUM_MESSAGE_SIZE => {
                    attrs.maximum_message_size = parse_in_range(name, value, 1024, 262_144)?;
                }
                RECEIVE_MESSAGE_WAIT_TIME_SECONDS => {
                    attrs.receive_message_wait_time_seconds =
                        parse_in_range(name, value, 0, MAX_WAIT_TIME_SECONDS)?;
                }
                _ => return Err(SqsError::InvalidAttributeName(name.clone())),
            }
        }
        Ok(attrs)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.message_retention_period))
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (VISIBILITY_TIMEOUT.to_string(), self.visibility_timeout.to_string()),
            (MESSAGE_RETENTION_PERIOD.to_string(), self.message_retention_period.to_string()),
            (DELAY_SECONDS.to_string(), self.delay_seconds.to_string()),
            (MAXIMUM_MESSAGE_SIZE.to_string(), self.maximum_message_size.to_string()),
            (
                RECEIVE_MESSAGE_WAIT_TIME_SECONDS.to_string(),
                self.receive_message_wait_time_seconds.to_string(),
            ),
        ])
    }
}

fn parse_in_range(name: &str, value: &str, min: u32, max: u32) -> Result<u32, SqsError> {
    let parsed: u32 = value
        .trim()
        .parse()
        .map_err(|_| SqsError::InvalidParameter(format!("Invalid {name}: {value}")))?;
    if !(min..=max).contains(&parsed) {
        return Err(SqsError::InvalidParameter(format!(
            "{name} must be between {min} and {max}"
        )));
    }
    Ok(parsed)
}

/// Queue names: 1-80 characters, alphanumeric, hyphens and underscores
pub fn validate_queue_name(name: &str) -> Result<(), SqsError> {
    let valid = !name.is_empty()
        && name.len() <= 80
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SqsError::InvalidParameter(format!("Invalid queue name: {name}")))
    }
}

/// Queue attributes may arrive as JSON strings or numbers
pub fn attribute_strings(
    attributes: HashMap<String, Value>,
) -> Result<HashMap<String, String>, SqsError> {
    attributes
        .into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => Ok((name, s)),
            Value::Number(n) => Ok((name, n.to_string())),
            Value::Bool(b) => Ok((name, b.to_string())),
            other => Err(SqsError::InvalidParameter(format!(
                "Attribute {name} has unsupported value {other}"
            ))),
        })
        .collect()
}

/// Extract the queue name from either a queue URL or a bare name
pub fn queue_name_from_url(url_or_name: &str) -> &str {
    url_or_name
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url_or_name)
}

/// Identity of a registered queue
#[derive(Debug, Clone)]
pub struct Queue {
    pub name: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Registration order within the registry
    pub seq: u64,
}

impl Queue {
    pub fn new(name: &str, base_url: &str, seq: u64) -> Self {
        Self {
            url: format!("{}/{}", base_url.trim_end_matches('/'), name),
            name: name.to_string(),
            created_at: Utc::now(),
            seq,
        }
    }
}
