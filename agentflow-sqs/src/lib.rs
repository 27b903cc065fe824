//! In-process SQS-style message queues for agentflow
//!
//! Provides named queues with:
//! - Delayed delivery and visibility-timeout redelivery
//! - Long-poll receive with wakeup on send
//! - Batch send with per-entry results
//! - Retention sweeping and purge
//! - A fixed job queue used by the job workflow
//!
//! Two HTTP adapters sit on top: the AWS JSON protocol ([`handle_request`])
//! and REST routes under `/sqs` ([`rest::routes`]).

pub mod broker;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod message;
pub mod queue;
pub mod registry;
pub mod rest;

use std::sync::Arc;

pub use broker::{
    BatchEntry, BatchEntryResult, MessageBroker, ReceiveMessageInput, SendMessageInput,
    SendMessageOutput,
};
pub use error::SqsError;
pub use handlers::handle_request;
pub use manager::JobQueueManager;
pub use message::{MessageAttributeValue, ReceivedMessage};
pub use registry::{QueueRegistry, QueueStats};

/// Shared state for both HTTP adapters
#[derive(Debug)]
pub struct SqsState {
    pub registry: Arc<QueueRegistry>,
    pub job_queue: Arc<JobQueueManager>,
}

impl SqsState {
    pub fn new(registry: Arc<QueueRegistry>, job_queue: Arc<JobQueueManager>) -> Self {
        Self {
            registry,
            job_queue,
        }
    }
}
