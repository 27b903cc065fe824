//! Per-queue message lifecycle
//!
//! Every message is in exactly one of three live states:
//!
//! ```text
//! Pending --(visible_at reached)--> Visible
//! Visible --(receive)--> InFlight
//! InFlight --(delete)--> [removed]
//! InFlight --(deadline expires)--> Visible
//! any --(retention expires)--> [removed]
//! ```
//!
//! All state lives behind one mutex per queue. Delay and visibility
//! deadlines are driven by one Tokio timer task per message; a timer only
//! ever promotes messages that are actually due, so an aborted or late timer
//! can never resurrect a deleted message. The same promotion also runs
//! lazily at the start of every operation.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::SqsError;
use crate::message::{Message, MessageAttributeValue, ReceivedMessage};
use crate::queue::{
    Queue, QueueAttributes, MAX_DELAY_SECONDS, MAX_VISIBILITY_TIMEOUT, MAX_WAIT_TIME_SECONDS,
};

/// Maximum messages returned by one receive call
pub const MAX_RECEIVE_MESSAGES: i64 = 10;
/// Maximum entries in one send batch
pub const MAX_BATCH_ENTRIES: usize = 10;
/// Window in which a repeated deduplication id is ignored
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default)]
pub struct SendMessageInput {
    pub body: String,
    pub delay_seconds: Option<i64>,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub dedup_id: Option<String>,
}

impl SendMessageInput {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay_seconds: i64) -> Self {
        self.delay_seconds = Some(delay_seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageOutput {
    pub message_id: String,
    pub md5_of_body: String,
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// Caller supplied correlation id
    pub id: String,
    pub input: SendMessageInput,
}

#[derive(Debug)]
pub enum BatchEntryResult {
    Sent { id: String, output: SendMessageOutput },
    Failed { id: String, error: SqsError },
}

#[derive(Debug, Clone, Copy)]
pub struct ReceiveMessageInput {
    pub max_messages: i64,
    pub wait_time_seconds: Option<i64>,
    pub visibility_timeout: Option<i64>,
}

impl Default for ReceiveMessageInput {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait_time_seconds: None,
            visibility_timeout: None,
        }
    }
}

impl ReceiveMessageInput {
    pub fn new(max_messages: i64) -> Self {
        Self {
            max_messages,
            ..Self::default()
        }
    }

    pub fn with_wait(mut self, wait_time_seconds: i64) -> Self {
        self.wait_time_seconds = Some(wait_time_seconds);
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: i64) -> Self {
        self.visibility_timeout = Some(visibility_timeout);
        self
    }
}

/// Point-in-time message counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub visible: usize,
    pub delayed: usize,
    pub in_flight: usize,
}

impl MessageCounts {
    /// Messages not currently handed out (visible + delayed)
    pub fn available(&self) -> usize {
        self.visible + self.delayed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MessageState {
    Pending { visible_at: Instant },
    Visible,
    InFlight { receipt_handle: String, deadline: Instant },
}

impl MessageState {
    /// Instant at which a pending or in-flight message becomes visible
    fn due_at(&self) -> Option<Instant> {
        match self {
            Self::Pending { visible_at } => Some(*visible_at),
            Self::InFlight { deadline, .. } => Some(*deadline),
            Self::Visible => None,
        }
    }
}

#[derive(Debug)]
struct StoredMessage {
    message: Message,
    /// Send order, used for oldest-first selection
    seq: u64,
    state: MessageState,
}

#[derive(Debug)]
struct DedupEntry {
    output: SendMessageOutput,
    sent_at: Instant,
}

/// Mutable state of one queue. The `visible`, `due` and `in_flight` indexes
/// are derived from each message's `state` and updated only through the
/// helpers below. `by_seq` holds every live message in send order, which is
/// also retention order.
#[derive(Debug, Default)]
struct QueueState {
    messages: HashMap<String, StoredMessage>,
    by_seq: BTreeMap<u64, String>,
    visible: BTreeMap<u64, String>,
    due: BTreeMap<(Instant, u64), String>,
    in_flight: HashMap<String, String>,
    timers: HashMap<String, JoinHandle<()>>,
    dedup: HashMap<String, DedupEntry>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, message: Message, state: MessageState) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = message.message_id.clone();
        match state.due_at() {
            Some(at) => {
                self.due.insert((at, seq), id.clone());
            }
            None => {
                self.visible.insert(seq, id.clone());
            }
        }
        self.by_seq.insert(seq, id.clone());
        self.messages.insert(id, StoredMessage { message, seq, state });
    }

    fn make_visible(&mut self, message_id: &str) {
        if let Some(stored) = self.messages.get_mut(message_id) {
            if let Some(at) = stored.state.due_at() {
                self.due.remove(&(at, stored.seq));
            }
            if let MessageState::InFlight { receipt_handle, .. } = &stored.state {
                self.in_flight.remove(receipt_handle);
            }
            stored.state = MessageState::Visible;
            self.visible.insert(stored.seq, message_id.to_string());
        }
        self.cancel_timer(message_id);
    }

    fn remove(&mut self, message_id: &str) -> Option<Message> {
        let stored = self.messages.remove(message_id)?;
        self.by_seq.remove(&stored.seq);
        if let Some(at) = stored.state.due_at() {
            self.due.remove(&(at, stored.seq));
        }
        match &stored.state {
            MessageState::Visible => {
                self.visible.remove(&stored.seq);
            }
            MessageState::InFlight { receipt_handle, .. } => {
                self.in_flight.remove(receipt_handle);
            }
            MessageState::Pending { .. } => {}
        }
        self.cancel_timer(message_id);
        Some(stored.message)
    }

    fn cancel_timer(&mut self, message_id: &str) {
        if let Some(timer) = self.timers.remove(message_id) {
            timer.abort();
        }
    }

    fn cancel_all_timers(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }

    /// Drop messages older than the retention period, and stale dedup ids.
    /// Walks send order from the oldest and stops at the first survivor.
    fn evict_expired(&mut self, now: Instant, retention: Duration) -> usize {
        let mut evicted = 0;
        while let Some(id) = self.by_seq.first_key_value().map(|(_, id)| id.clone()) {
            let expired = self
                .messages
                .get(&id)
                .map_or(true, |m| now.saturating_duration_since(m.message.sent_at) >= retention);
            if !expired {
                break;
            }
            if self.remove(&id).is_none() {
                self.by_seq.pop_first();
            }
            evicted += 1;
        }
        self.dedup
            .retain(|_, entry| now.saturating_duration_since(entry.sent_at) < DEDUP_WINDOW);
        evicted
    }

    /// Make every due pending or expired in-flight message visible
    fn promote_due(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        while self.due.first_key_value().is_some_and(|((at, _), _)| *at <= now) {
            if let Some((_, id)) = self.due.pop_first() {
                self.make_visible(&id);
                promoted += 1;
            }
        }
        promoted
    }

    /// Move up to `max` visible messages, oldest first, to in-flight
    fn take_visible(
        &mut self,
        max: usize,
        now: Instant,
        visibility: Duration,
    ) -> Vec<(ReceivedMessage, Instant)> {
        let selected: Vec<(u64, String)> = self
            .visible
            .iter()
            .take(max)
            .map(|(seq, id)| (*seq, id.clone()))
            .collect();

        let deadline = now + visibility;
        let received_at = chrono::Utc::now();
        let mut batch = Vec::with_capacity(selected.len());
        for (seq, id) in selected {
            self.visible.remove(&seq);
            let Some(stored) = self.messages.get_mut(&id) else {
                continue;
            };
            let receipt_handle = uuid::Uuid::new_v4().to_string();
            self.due.insert((deadline, seq), id.clone());
            stored.state = MessageState::InFlight {
                receipt_handle: receipt_handle.clone(),
                deadline,
            };
            stored.message.receive_count += 1;
            let first_receive = *stored
                .message
                .first_receive_timestamp
                .get_or_insert(received_at);
            self.in_flight.insert(receipt_handle.clone(), id.clone());

            let msg = &stored.message;
            batch.push((
                ReceivedMessage {
                    message_id: msg.message_id.clone(),
                    receipt_handle,
                    body: msg.body.clone(),
                    md5_of_body: msg.md5_of_body.clone(),
                    attributes: msg.attributes.clone(),
                    sent_timestamp: msg.sent_timestamp,
                    receive_count: msg.receive_count,
                    first_receive_timestamp: first_receive,
                },
                deadline,
            ));
        }
        batch
    }

    fn counts(&self) -> MessageCounts {
        let visible = self.visible.len();
        let in_flight = self.in_flight.len();
        MessageCounts {
            visible,
            delayed: self.messages.len() - visible - in_flight,
            in_flight,
        }
    }

    fn clear(&mut self) -> usize {
        let count = self.messages.len();
        self.cancel_all_timers();
        self.messages.clear();
        self.by_seq.clear();
        self.visible.clear();
        self.due.clear();
        self.in_flight.clear();
        self.dedup.clear();
        count
    }
}

impl Drop for QueueState {
    fn drop(&mut self) {
        self.cancel_all_timers();
    }
}

#[derive(Debug)]
struct Shared {
    queue: Queue,
    attributes: QueueAttributes,
    state: Mutex<QueueState>,
    /// Signalled whenever a message becomes visible
    available: Notify,
}

impl Shared {
    /// Lazy maintenance run under the queue lock by every operation
    fn maintain(&self, state: &mut QueueState, now: Instant) {
        let evicted = state.evict_expired(now, self.attributes.retention_period());
        if evicted > 0 {
            info!(queue = %self.queue.name, count = evicted, "Evicted messages past retention");
        }
        if state.promote_due(now) > 0 {
            self.available.notify_waiters();
        }
    }

    fn on_timer(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let promoted = state.promote_due(now);
        if promoted > 0 {
            debug!(queue = %self.queue.name, count = promoted, "Messages became visible");
            self.available.notify_waiters();
        }
    }
}

/// Message broker for a single queue. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct MessageBroker {
    shared: Arc<Shared>,
}

impl MessageBroker {
    pub fn new(queue: Queue, attributes: QueueAttributes) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                attributes,
                state: Mutex::new(QueueState::default()),
                available: Notify::new(),
            }),
        }
    }

    pub fn queue(&self) -> &Queue {
        &self.shared.queue
    }

    pub fn attributes(&self) -> &QueueAttributes {
        &self.shared.attributes
    }

    /// Send one message. Must be called from within a Tokio runtime when the
    /// message is delayed.
    pub fn send_message(&self, input: SendMessageInput) -> Result<SendMessageOutput, SqsError> {
        let attrs = &self.shared.attributes;
        if input.body.len() > attrs.maximum_message_size as usize {
            return Err(SqsError::InvalidParameter(format!(
                "Message body is {} bytes, exceeding the {} byte limit",
                input.body.len(),
                attrs.maximum_message_size
            )));
        }
        let delay = match input.delay_seconds {
            Some(d) => check_range("DelaySeconds", d, MAX_DELAY_SECONDS)?,
            None => attrs.delay_seconds,
        };

        let mut state = self.shared.state.lock();
        let now = Instant::now();
        self.shared.maintain(&mut state, now);

        if let Some(dedup_id) = &input.dedup_id {
            if let Some(entry) = state.dedup.get(dedup_id) {
                debug!(
                    queue = %self.shared.queue.name,
                    dedup_id = %dedup_id,
                    message_id = %entry.output.message_id,
                    "Duplicate send ignored"
                );
                return Ok(entry.output.clone());
            }
        }

        let message = Message::new(input.body, input.attributes, input.dedup_id);
        let output = SendMessageOutput {
            message_id: message.message_id.clone(),
            md5_of_body: message.md5_of_body.clone(),
        };
        if let Some(dedup_id) = &message.dedup_id {
            state.dedup.insert(
                dedup_id.clone(),
                DedupEntry {
                    output: output.clone(),
                    sent_at: now,
                },
            );
        }

        if delay > 0 {
            let visible_at = now + Duration::from_secs(u64::from(delay));
            state.insert(message, MessageState::Pending { visible_at });
            self.schedule(&mut state, &output.message_id, visible_at);
            info!(
                queue = %self.shared.queue.name,
                message_id = %output.message_id,
                delay_seconds = delay,
                "Sent delayed message"
            );
        } else {
            state.insert(message, MessageState::Visible);
            self.shared.available.notify_waiters();
            info!(queue = %self.shared.queue.name, message_id = %output.message_id, "Sent message");
        }

        Ok(output)
    }

    /// Send each entry independently; one failure does not affect the others
    pub fn send_message_batch(
        &self,
        entries: Vec<BatchEntry>,
    ) -> Result<Vec<BatchEntryResult>, SqsError> {
        if entries.is_empty() {
            return Err(SqsError::InvalidParameter(
                "Batch request must contain at least one entry".into(),
            ));
        }
        if entries.len() > MAX_BATCH_ENTRIES {
            return Err(SqsError::InvalidParameter(format!(
                "Batch request may contain at most {MAX_BATCH_ENTRIES} entries"
            )));
        }

        let results = entries
            .into_iter()
            .map(|entry| match self.send_message(entry.input) {
                Ok(output) => BatchEntryResult::Sent { id: entry.id, output },
                Err(error) => {
                    debug!(queue = %self.shared.queue.name, id = %entry.id, error = %error, "Batch entry failed");
                    BatchEntryResult::Failed { id: entry.id, error }
                }
            })
            .collect();
        Ok(results)
    }

    /// Receive up to `max_messages` visible messages, long-polling for up to
    /// the wait time when none are available. Dropping the returned future
    /// while it waits has no effect on queue state.
    pub async fn receive_message(
        &self,
        input: ReceiveMessageInput,
    ) -> Result<Vec<ReceivedMessage>, SqsError> {
        if !(1..=MAX_RECEIVE_MESSAGES).contains(&input.max_messages) {
            return Err(SqsError::InvalidParameter(format!(
                "MaxNumberOfMessages must be between 1 and {MAX_RECEIVE_MESSAGES}"
            )));
        }
        let attrs = &self.shared.attributes;
        let visibility = match input.visibility_timeout {
            Some(v) => check_range("VisibilityTimeout", v, MAX_VISIBILITY_TIMEOUT)?,
            None => attrs.visibility_timeout,
        };
        let wait = match input.wait_time_seconds {
            Some(w) => check_range("WaitTimeSeconds", w, MAX_WAIT_TIME_SECONDS)?,
            None => attrs.receive_message_wait_time_seconds,
        };
        let max = usize::try_from(input.max_messages).unwrap_or(1);
        let visibility = Duration::from_secs(u64::from(visibility));
        let wait_until = Instant::now() + Duration::from_secs(u64::from(wait));

        loop {
            let available = {
                let mut state = self.shared.state.lock();
                let now = Instant::now();
                self.shared.maintain(&mut state, now);

                let batch = state.take_visible(max, now, visibility);
                if !batch.is_empty() || now >= wait_until {
                    let messages = batch
                        .into_iter()
                        .map(|(msg, deadline)| {
                            self.schedule(&mut state, &msg.message_id, deadline);
                            msg
                        })
                        .collect::<Vec<_>>();
                    if !messages.is_empty() {
                        info!(queue = %self.shared.queue.name, count = messages.len(), "Received messages");
                    }
                    return Ok(messages);
                }
                // Registered before the lock is released so a send in between is not missed
                self.shared.available.notified()
            };

            tokio::select! {
                () = available => {}
                () = tokio::time::sleep_until(wait_until) => {}
            }
        }
    }

    /// Acknowledge a delivery. Returns false, without error, when the handle
    /// is stale or unknown.
    pub fn delete_message(&self, receipt_handle: &str) -> bool {
        let mut state = self.shared.state.lock();
        self.shared.maintain(&mut state, Instant::now());

        let Some(message_id) = state.in_flight.get(receipt_handle).cloned() else {
            debug!(queue = %self.shared.queue.name, receipt_handle = %receipt_handle, "Ignoring stale receipt handle");
            return false;
        };
        state.remove(&message_id);
        info!(queue = %self.shared.queue.name, message_id = %message_id, "Deleted message");
        true
    }

    /// Remove every message, keeping the queue and its attributes
    pub fn purge(&self) -> usize {
        let count = self.shared.state.lock().clear();
        info!(queue = %self.shared.queue.name, count = count, "Purged queue");
        count
    }

    /// Run retention and visibility maintenance without any other change
    pub fn sweep(&self) {
        let mut state = self.shared.state.lock();
        self.shared.maintain(&mut state, Instant::now());
    }

    pub fn counts(&self) -> MessageCounts {
        let mut state = self.shared.state.lock();
        self.shared.maintain(&mut state, Instant::now());
        state.counts()
    }

    /// Cancel every outstanding timer
    pub fn shutdown(&self) {
        self.shared.state.lock().cancel_all_timers();
    }

    fn schedule(&self, state: &mut QueueState, message_id: &str, at: Instant) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            if let Some(shared) = shared.upgrade() {
                shared.on_timer();
            }
        });
        if let Some(previous) = state.timers.insert(message_id.to_string(), timer) {
            previous.abort();
        }
    }
}

fn check_range(name: &str, value: i64, max: u32) -> Result<u32, SqsError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| SqsError::InvalidParameter(format!("{name} must be between 0 and {max}")))
}
