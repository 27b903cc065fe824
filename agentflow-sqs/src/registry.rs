//! Process-wide catalog of queues

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::broker::{
    BatchEntry, BatchEntryResult, MessageBroker, ReceiveMessageInput, SendMessageInput,
    SendMessageOutput,
};
use crate::error::SqsError;
use crate::message::ReceivedMessage;
use crate::queue::{queue_name_from_url, validate_queue_name, Queue, QueueAttributes};

/// Default prefix for derived queue URLs
pub const DEFAULT_BASE_URL: &str = "http://localhost:9324/queue";

/// Observability snapshot of one queue
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub name: String,
    pub url: String,
    /// Visible plus delayed messages
    pub message_count: usize,
    pub in_flight_count: usize,
    pub delayed_count: usize,
    pub created_at: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
}

/// Maps queue names to their brokers. Constructed once at startup and shared
/// by handle.
#[derive(Debug)]
pub struct QueueRegistry {
    queues: DashMap<String, MessageBroker>,
    base_url: String,
    next_seq: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl QueueRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            queues: DashMap::new(),
            base_url: base_url.into(),
            next_seq: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a queue, or return the URL of the existing queue with that
    /// name. Attributes only apply on first creation.
    pub fn create_queue(
        &self,
        name: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, SqsError> {
        validate_queue_name(name)?;

        match self.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                debug!(name = %name, "Queue already exists");
                Ok(existing.get().queue().url.clone())
            }
            Entry::Vacant(slot) => {
                let attributes = QueueAttributes::with_overrides(attributes)?;
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let queue = Queue::new(name, &self.base_url, seq);
                let url = queue.url.clone();
                info!(name = %name, url = %url, "Creating queue");
                slot.insert(MessageBroker::new(queue, attributes));
                Ok(url)
            }
        }
    }

    pub fn get_queue_url(&self, name: &str) -> Result<String, SqsError> {
        self.queues
            .get(name)
            .map(|broker| broker.queue().url.clone())
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    /// Queue URLs in registration order, optionally filtered by name prefix
    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let mut queues: Vec<(u64, String)> = self
            .queues
            .iter()
            .filter(|entry| prefix.map_or(true, |p| entry.key().starts_with(p)))
            .map(|entry| (entry.value().queue().seq, entry.value().queue().url.clone()))
            .collect();
        queues.sort_by_key(|(seq, _)| *seq);
        queues.into_iter().map(|(_, url)| url).collect()
    }

    /// Look up a broker by queue URL or bare name
    pub fn broker(&self, url_or_name: &str) -> Result<MessageBroker, SqsError> {
        let name = queue_name_from_url(url_or_name);
        self.queues
            .get(name)
            .map(|broker| broker.value().clone())
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))
    }

    pub fn delete_queue(&self, url: &str) -> Result<(), SqsError> {
        let name = queue_name_from_url(url);
        let (_, broker) = self
            .queues
            .remove(name)
            .ok_or_else(|| SqsError::QueueNotFound(name.to_string()))?;
        // A long poll may still hold a clone of the broker
        broker.purge();
        info!(name = %name, "Deleted queue");
        Ok(())
    }

    pub fn purge_queue(&self, url: &str) -> Result<usize, SqsError> {
        Ok(self.broker(url)?.purge())
    }

    pub fn send_message(
        &self,
        url: &str,
        input: SendMessageInput,
    ) -> Result<SendMessageOutput, SqsError> {
        self.broker(url)?.send_message(input)
    }

    pub fn send_message_batch(
        &self,
        url: &str,
        entries: Vec<BatchEntry>,
    ) -> Result<Vec<BatchEntryResult>, SqsError> {
        self.broker(url)?.send_message_batch(entries)
    }

    pub async fn receive_message(
        &self,
        url: &str,
        input: ReceiveMessageInput,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        let broker = self.broker(url)?;
        broker.receive_message(input).await
    }

    /// Acknowledge a delivery. Unknown queues are an error; stale receipt
    /// handles are not.
    pub fn delete_message(&self, url: &str, receipt_handle: &str) -> Result<bool, SqsError> {
        Ok(self.broker(url)?.delete_message(receipt_handle))
    }

    /// Configured attributes plus derived counts. `names` empty or
    /// containing `All` selects everything.
    pub fn get_queue_attributes(
        &self,
        url: &str,
        names: &[String],
    ) -> Result<HashMap<String, String>, SqsError> {
        let broker = self.broker(url)?;
        let counts = broker.counts();

        let mut attributes = broker.attributes().to_map();
        attributes.insert(
            "ApproximateNumberOfMessages".into(),
            counts.available().to_string(),
        );
        attributes.insert(
            "ApproximateNumberOfMessagesNotVisible".into(),
            counts.in_flight.to_string(),
        );
        attributes.insert(
            "ApproximateNumberOfMessagesDelayed".into(),
            counts.delayed.to_string(),
        );
        attributes.insert(
            "CreatedTimestamp".into(),
            broker.queue().created_at.timestamp().to_string(),
        );

        if names.is_empty() || names.iter().any(|n| n == "All") {
            return Ok(attributes);
        }
        Ok(attributes
            .into_iter()
            .filter(|(key, _)| names.contains(key))
            .collect())
    }

    /// Stats for one named queue, or for every queue in registration order
    pub fn get_queue_stats(&self, name: Option<&str>) -> Result<Vec<QueueStats>, SqsError> {
        let brokers = match name {
            Some(name) => vec![self.broker(name)?],
            None => {
                let mut all: Vec<MessageBroker> =
                    self.queues.iter().map(|entry| entry.value().clone()).collect();
                all.sort_by_key(|broker| broker.queue().seq);
                all
            }
        };

        Ok(brokers
            .iter()
            .map(|broker| {
                let counts = broker.counts();
                let queue = broker.queue();
                QueueStats {
                    name: queue.name.clone(),
                    url: queue.url.clone(),
                    message_count: counts.available(),
                    in_flight_count: counts.in_flight,
                    delayed_count: counts.delayed,
                    created_at: queue.created_at,
                    attributes: broker.attributes().to_map(),
                }
            })
            .collect())
    }

    /// Start the periodic retention sweep. Replaces any running sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(registry) = weak.upgrade() else {
                    break;
                };
                let brokers: Vec<MessageBroker> =
                    registry.queues.iter().map(|entry| entry.value().clone()).collect();
                for broker in brokers {
                    broker.sweep();
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop the sweeper and every message timer
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        for entry in self.queues.iter() {
            entry.value().shutdown();
        }
        info!(queues = self.queues.len(), "Queue registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let registry = QueueRegistry::default();
        let url = registry
            .create_queue("jobs", &attrs(&[("VisibilityTimeout", "60")]))
            .unwrap();
        registry.send_message(&url, SendMessageInput::new("kept")).unwrap();

        let again = registry
            .create_queue("jobs", &attrs(&[("VisibilityTimeout", "5")]))
            .unwrap();
        assert_eq!(url, again);

        let attributes = registry.get_queue_attributes(&url, &[]).unwrap();
        assert_eq!(attributes["VisibilityTimeout"], "60");
        assert_eq!(attributes["ApproximateNumberOfMessages"], "1");
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let registry = QueueRegistry::default();
        assert!(matches!(
            registry.create_queue("bad name", &HashMap::new()),
            Err(SqsError::InvalidParameter(_))
        ));
        assert!(matches!(
            registry.create_queue("q", &attrs(&[("Bogus", "1")])),
            Err(SqsError::InvalidAttributeName(_))
        ));
        assert!(registry.list_queues(None).is_empty());
    }

    #[test]
    fn test_list_queues_in_registration_order() {
        let registry = QueueRegistry::new("http://queues.local");
        for name in ["zeta", "alpha", "job-a", "job-b"] {
            registry.create_queue(name, &HashMap::new()).unwrap();
        }

        assert_eq!(
            registry.list_queues(None),
            vec![
                "http://queues.local/zeta",
                "http://queues.local/alpha",
                "http://queues.local/job-a",
                "http://queues.local/job-b",
            ]
        );
        assert_eq!(
            registry.list_queues(Some("job-")),
            vec!["http://queues.local/job-a", "http://queues.local/job-b"]
        );
    }

    #[test]
    fn test_deleted_queue_is_gone() {
        let registry = QueueRegistry::default();
        let url = registry.create_queue("q", &HashMap::new()).unwrap();

        registry.delete_queue(&url).unwrap();

        assert!(matches!(
            registry.get_queue_url("q"),
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            registry.delete_queue(&url),
            Err(SqsError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lookup_by_url_or_name() {
        let registry = QueueRegistry::default();
        let url = registry.create_queue("orders", &HashMap::new()).unwrap();

        registry.send_message(&url, SendMessageInput::new("by-url")).unwrap();
        registry.send_message("orders", SendMessageInput::new("by-name")).unwrap();

        let stats = registry.get_queue_stats(Some("orders")).unwrap();
        assert_eq!(stats[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_queue_errors() {
        let registry = QueueRegistry::default();
        let missing = "http://localhost:9324/queue/missing";

        assert!(matches!(
            registry.send_message(missing, SendMessageInput::new("x")),
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            registry.receive_message(missing, ReceiveMessageInput::new(1)).await,
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            registry.delete_message(missing, "handle"),
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            registry.purge_queue(missing),
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            registry.get_queue_attributes(missing, &[]),
            Err(SqsError::QueueNotFound(_))
        ));
        assert!(matches!(
            registry.get_queue_stats(Some("missing")),
            Err(SqsError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_keeps_queue_and_attributes() {
        let registry = QueueRegistry::default();
        let url = registry
            .create_queue("q", &attrs(&[("DelaySeconds", "10")]))
            .unwrap();
        registry.send_message(&url, SendMessageInput::new("a")).unwrap();
        registry.send_message(&url, SendMessageInput::new("b").with_delay(0)).unwrap();
        registry
            .receive_message(&url, ReceiveMessageInput::new(1))
            .await
            .unwrap();

        assert_eq!(registry.purge_queue(&url).unwrap(), 2);

        let attributes = registry.get_queue_attributes(&url, &["All".to_string()]).unwrap();
        assert_eq!(attributes["DelaySeconds"], "10");
        assert_eq!(attributes["ApproximateNumberOfMessages"], "0");
        assert_eq!(attributes["ApproximateNumberOfMessagesNotVisible"], "0");
        assert_eq!(attributes["ApproximateNumberOfMessagesDelayed"], "0");
    }

    #[tokio::test]
    async fn test_attribute_selection_and_counts() {
        let registry = QueueRegistry::default();
        let url = registry.create_queue("q", &HashMap::new()).unwrap();
        registry.send_message(&url, SendMessageInput::new("now")).unwrap();
        registry
            .send_message(&url, SendMessageInput::new("later").with_delay(30))
            .unwrap();
        registry.send_message(&url, SendMessageInput::new("taken")).unwrap();
        registry
            .receive_message(&url, ReceiveMessageInput::new(1))
            .await
            .unwrap();

        let names = vec![
            "ApproximateNumberOfMessages".to_string(),
            "ApproximateNumberOfMessagesNotVisible".to_string(),
        ];
        let attributes = registry.get_queue_attributes(&url, &names).unwrap();
        assert_eq!(attributes.len(), 2);
        // One visible plus one delayed
        assert_eq!(attributes["ApproximateNumberOfMessages"], "2");
        assert_eq!(attributes["ApproximateNumberOfMessagesNotVisible"], "1");
    }

    #[test]
    fn test_stats_for_all_queues() {
        let registry = QueueRegistry::default();
        registry.create_queue("first", &HashMap::new()).unwrap();
        registry.create_queue("second", &HashMap::new()).unwrap();

        let stats = registry.get_queue_stats(None).unwrap();
        let names: Vec<&str> = stats.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(stats.iter().all(|s| s.message_count == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_expired_messages() {
        let registry = Arc::new(QueueRegistry::default());
        let url = registry
            .create_queue("q", &attrs(&[("MessageRetentionPeriod", "60")]))
            .unwrap();
        registry.send_message(&url, SendMessageInput::new("old")).unwrap();
        registry.spawn_sweeper(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(75)).await;

        let broker = registry.broker(&url).unwrap();
        assert_eq!(broker.counts().available(), 0);
        registry.shutdown();
    }
}
