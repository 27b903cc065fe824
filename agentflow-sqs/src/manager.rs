//! Job queue manager
//!
//! Provisions the well-known job queue at startup and exposes a narrowed
//! send/receive/delete contract bound to it, so the job workflow never has
//! to handle queue identity itself.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

use crate::broker::{ReceiveMessageInput, SendMessageInput, SendMessageOutput};
use crate::error::SqsError;
use crate::message::{MessageAttributeValue, ReceivedMessage};
use crate::queue::{DELAY_SECONDS, MESSAGE_RETENTION_PERIOD, VISIBILITY_TIMEOUT};
use crate::registry::{QueueRegistry, QueueStats};

pub const JOB_QUEUE_NAME: &str = "job-queue";
/// Source tag stamped on every job message
pub const JOB_SOURCE: &str = "agentflow-service";
/// Long-poll wait used by [`JobQueueManager::receive`] unless overridden
pub const DEFAULT_RECEIVE_WAIT_SECONDS: i64 = 20;

/// Fixed attributes of the job queue
fn job_queue_attributes() -> HashMap<String, String> {
    HashMap::from([
        // Long enough for a worker to finish a job before it is redelivered
        (VISIBILITY_TIMEOUT.to_string(), "300".to_string()),
        // 14 days
        (MESSAGE_RETENTION_PERIOD.to_string(), "1209600".to_string()),
        (DELAY_SECONDS.to_string(), "0".to_string()),
    ])
}

#[derive(Debug)]
pub struct JobQueueManager {
    registry: Arc<QueueRegistry>,
    queue_url: OnceLock<String>,
    receive_wait_seconds: i64,
}

impl JobQueueManager {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self::with_receive_wait(registry, DEFAULT_RECEIVE_WAIT_SECONDS)
    }

    pub fn with_receive_wait(registry: Arc<QueueRegistry>, receive_wait_seconds: i64) -> Self {
        Self {
            registry,
            queue_url: OnceLock::new(),
            receive_wait_seconds,
        }
    }

    /// Provision the job queue. Callers treat failure as fatal.
    pub fn initialize(&self) -> Result<String, SqsError> {
        if let Some(url) = self.queue_url.get() {
            return Ok(url.clone());
        }

        let url = self
            .registry
            .create_queue(JOB_QUEUE_NAME, &job_queue_attributes())
            .map_err(|e| {
                error!(error = %e, "Failed to initialize job queue");
                e
            })?;
        let url = self.queue_url.get_or_init(|| url).clone();
        info!(url = %url, "Job queue initialized");
        Ok(url)
    }

    pub fn url(&self) -> Result<String, SqsError> {
        self.queue_url.get().cloned().ok_or(SqsError::NotInitialized)
    }

    /// Serialize `payload` as the message body and stamp it with a timestamp
    /// and the service source tag.
    pub fn send<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        delay_seconds: Option<i64>,
    ) -> Result<SendMessageOutput, SqsError> {
        let url = self.url()?;
        let body = serde_json::to_string(payload)?;

        let attributes = HashMap::from([
            (
                "timestamp".to_string(),
                MessageAttributeValue::string(chrono::Utc::now().to_rfc3339()),
            ),
            (
                "source".to_string(),
                MessageAttributeValue::string(JOB_SOURCE),
            ),
        ]);
        let input = SendMessageInput {
            body,
            delay_seconds,
            attributes,
            dedup_id: None,
        };
        self.registry.send_message(&url, input)
    }

    /// Long-poll the job queue for up to `max_messages` messages
    pub async fn receive(&self, max_messages: i64) -> Result<Vec<ReceivedMessage>, SqsError> {
        let url = self.url()?;
        let input = ReceiveMessageInput::new(max_messages).with_wait(self.receive_wait_seconds);
        self.registry.receive_message(&url, input).await
    }

    /// Acknowledge a job message. Stale handles return false.
    pub fn delete(&self, receipt_handle: &str) -> Result<bool, SqsError> {
        let url = self.url()?;
        self.registry.delete_message(&url, receipt_handle)
    }

    pub fn stats(&self) -> Result<QueueStats, SqsError> {
        self.url()?;
        self.registry
            .get_queue_stats(Some(JOB_QUEUE_NAME))?
            .into_iter()
            .next()
            .ok_or_else(|| SqsError::QueueNotFound(JOB_QUEUE_NAME.to_string()))
    }
}
