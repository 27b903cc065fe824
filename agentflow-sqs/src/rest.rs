//! REST routes for queue administration and the job queue
//!
//! Mounted under `/sqs` by the server. Bodies are camelCase JSON; errors use
//! the REST error shape from `agentflow_core`.

use agentflow_core::RequestId;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::broker::{
    BatchEntry, BatchEntryResult, ReceiveMessageInput, SendMessageInput, SendMessageOutput,
    MAX_BATCH_ENTRIES,
};
use crate::error::SqsError;
use crate::handlers::{with_request_id, MessageWire};
use crate::message::{attributes_from_wire, AttributeValueWire, ReceivedMessage};
use crate::queue::attribute_strings;
use crate::registry::QueueStats;
use crate::SqsState;

type RestResult = Result<(StatusCode, Value), SqsError>;

pub fn routes() -> Router<Arc<SqsState>> {
    Router::new()
        .route("/queue", post(create_queue))
        .route("/queue/:queue_name", delete(delete_queue))
        .route("/queue/:queue_name/url", get(get_queue_url))
        .route("/queue/:queue_name/attributes", get(get_queue_attributes))
        .route("/queue/:queue_name/purge", post(purge_queue))
        .route("/queue/:queue_name/stats", get(get_queue_stats))
        .route("/queues", get(list_queues))
        .route("/message", post(send_message).delete(delete_message))
        .route("/messages/batch", post(send_message_batch))
        .route("/message/receive", post(receive_message))
        .route("/stats", get(get_all_stats))
        .route("/job-queue/send", post(send_job_message))
        .route("/job-queue/receive", post(receive_job_messages))
        .route("/job-queue/message", delete(delete_job_message))
        .route("/job-queue/stats", get(get_job_queue_stats))
        .route("/job-queue/url", get(get_job_queue_url))
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateQueueBody {
    queue_name: String,
    #[serde(default)]
    attributes: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ListQueuesParams {
    prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeParams {
    attribute_names: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    queue_url: String,
    message_body: String,
    delay_seconds: Option<i64>,
    #[serde(default)]
    message_attributes: HashMap<String, AttributeValueWire>,
    message_deduplication_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBatchBody {
    queue_url: String,
    entries: Vec<BatchEntryBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchEntryBody {
    id: String,
    message_body: String,
    delay_seconds: Option<i64>,
    #[serde(default)]
    message_attributes: HashMap<String, AttributeValueWire>,
    message_deduplication_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveMessageBody {
    queue_url: String,
    max_number_of_messages: Option<i64>,
    visibility_timeout: Option<i64>,
    wait_time_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMessageBody {
    queue_url: String,
    receipt_handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSendBody {
    message_body: Value,
    delay_seconds: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReceiveBody {
    max_messages: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobDeleteBody {
    receipt_handle: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SentWire {
    message_id: String,
    md5_of_body: String,
}

impl From<SendMessageOutput> for SentWire {
    fn from(output: SendMessageOutput) -> Self {
        Self {
            message_id: output.message_id,
            md5_of_body: output.md5_of_body,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsWire {
    name: String,
    url: String,
    message_count: usize,
    in_flight_count: usize,
    delayed_count: usize,
    created_at: DateTime<Utc>,
    attributes: HashMap<String, String>,
}

impl From<QueueStats> for StatsWire {
    fn from(stats: QueueStats) -> Self {
        Self {
            name: stats.name,
            url: stats.url,
            message_count: stats.message_count,
            in_flight_count: stats.in_flight_count,
            delayed_count: stats.delayed_count,
            created_at: stats.created_at,
            attributes: stats.attributes,
        }
    }
}

// === Queue administration ===

async fn create_queue(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    respond((|| -> RestResult {
        let req: CreateQueueBody = parse(&body)?;
        let attributes = attribute_strings(req.attributes)?;
        let queue_url = state.registry.create_queue(&req.queue_name, &attributes)?;
        Ok((StatusCode::CREATED, json!({ "queueUrl": queue_url })))
    })())
}

async fn get_queue_url(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
) -> Response {
    respond(
        state
            .registry
            .get_queue_url(&queue_name)
            .map(|queue_url| (StatusCode::OK, json!({ "queueUrl": queue_url }))),
    )
}

async fn list_queues(
    State(state): State<Arc<SqsState>>,
    Query(params): Query<ListQueuesParams>,
) -> Response {
    let queue_urls = state.registry.list_queues(params.prefix.as_deref());
    respond(Ok((
        StatusCode::OK,
        json!({ "count": queue_urls.len(), "queueUrls": queue_urls }),
    )))
}

async fn get_queue_attributes(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
    Query(params): Query<AttributeParams>,
) -> Response {
    let names: Vec<String> = params
        .attribute_names
        .map(|names| {
            names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    respond(
        state
            .registry
            .get_queue_attributes(&queue_name, &names)
            .map(|attributes| (StatusCode::OK, json!({ "attributes": attributes }))),
    )
}

async fn delete_queue(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
) -> Response {
    respond(
        state
            .registry
            .delete_queue(&queue_name)
            .map(|()| (StatusCode::OK, json!({ "deleted": queue_name }))),
    )
}

async fn purge_queue(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
) -> Response {
    respond(
        state
            .registry
            .purge_queue(&queue_name)
            .map(|purged| (StatusCode::OK, json!({ "purged": purged }))),
    )
}

async fn get_queue_stats(
    State(state): State<Arc<SqsState>>,
    Path(queue_name): Path<String>,
) -> Response {
    respond((|| -> RestResult {
        let stats = state
            .registry
            .get_queue_stats(Some(&queue_name))?
            .into_iter()
            .next()
            .map(StatsWire::from)
            .ok_or_else(|| SqsError::QueueNotFound(queue_name.clone()))?;
        Ok((StatusCode::OK, json!({ "stats": stats })))
    })())
}

async fn get_all_stats(State(state): State<Arc<SqsState>>) -> Response {
    respond((|| -> RestResult {
        let stats: serde_json::Map<String, Value> = state
            .registry
            .get_queue_stats(None)?
            .into_iter()
            .map(|s| -> Result<(String, Value), SqsError> {
                Ok((s.name.clone(), serde_json::to_value(StatsWire::from(s))?))
            })
            .collect::<Result<_, SqsError>>()?;
        Ok((StatusCode::OK, json!({ "stats": stats })))
    })())
}

// === Messages ===

async fn send_message(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    respond((|| -> RestResult {
        let req: SendMessageBody = parse(&body)?;
        let input = SendMessageInput {
            body: req.message_body,
            delay_seconds: req.delay_seconds,
            attributes: attributes_from_wire(req.message_attributes)?,
            dedup_id: req.message_deduplication_id,
        };
        let sent = SentWire::from(state.registry.send_message(&req.queue_url, input)?);
        Ok((StatusCode::CREATED, serde_json::to_value(sent)?))
    })())
}

async fn send_message_batch(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    respond((|| -> RestResult {
        let req: SendMessageBatchBody = parse(&body)?;
        let broker = state.registry.broker(&req.queue_url)?;
        if req.entries.len() > MAX_BATCH_ENTRIES {
            return Err(SqsError::InvalidParameter(format!(
                "Batch request may contain at most {MAX_BATCH_ENTRIES} entries"
            )));
        }

        // Entries with malformed attributes fail on their own
        let mut failed = Vec::new();
        let mut entries = Vec::with_capacity(req.entries.len());
        for entry in req.entries {
            match attributes_from_wire(entry.message_attributes) {
                Ok(attributes) => entries.push(BatchEntry {
                    id: entry.id,
                    input: SendMessageInput {
                        body: entry.message_body,
                        delay_seconds: entry.delay_seconds,
                        attributes,
                        dedup_id: entry.message_deduplication_id,
                    },
                }),
                Err(error) => failed.push(batch_failure(&entry.id, &error)),
            }
        }

        let mut successful = Vec::new();
        if !entries.is_empty() || failed.is_empty() {
            for result in broker.send_message_batch(entries)? {
                match result {
                    BatchEntryResult::Sent { id, output } => successful.push(json!({
                        "id": id,
                        "messageId": output.message_id,
                        "md5OfBody": output.md5_of_body,
                    })),
                    BatchEntryResult::Failed { id, error } => {
                        failed.push(batch_failure(&id, &error));
                    }
                }
            }
        }
        Ok((
            StatusCode::CREATED,
            json!({ "successful": successful, "failed": failed }),
        ))
    })())
}

fn batch_failure(id: &str, error: &SqsError) -> Value {
    json!({
        "id": id,
        "code": error.code().as_str(),
        "message": error.to_string(),
    })
}

async fn receive_message(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    let req: ReceiveMessageBody = match parse(&body) {
        Ok(req) => req,
        Err(e) => return respond(Err(e)),
    };
    let input = ReceiveMessageInput {
        max_messages: req.max_number_of_messages.unwrap_or(1),
        wait_time_seconds: req.wait_time_seconds,
        visibility_timeout: req.visibility_timeout,
    };
    let result = state.registry.receive_message(&req.queue_url, input).await;
    respond(result.map(messages_body))
}

async fn delete_message(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    respond((|| -> RestResult {
        let req: DeleteMessageBody = parse(&body)?;
        let deleted = state
            .registry
            .delete_message(&req.queue_url, &req.receipt_handle)?;
        Ok((StatusCode::OK, json!({ "deleted": deleted })))
    })())
}

// === Job queue ===

async fn send_job_message(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    respond((|| -> RestResult {
        let req: JobSendBody = parse(&body)?;
        let sent = SentWire::from(state.job_queue.send(&req.message_body, req.delay_seconds)?);
        Ok((StatusCode::CREATED, serde_json::to_value(sent)?))
    })())
}

async fn receive_job_messages(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    let req: JobReceiveBody = if body.is_empty() {
        JobReceiveBody::default()
    } else {
        match parse(&body) {
            Ok(req) => req,
            Err(e) => return respond(Err(e)),
        }
    };
    let result = state.job_queue.receive(req.max_messages.unwrap_or(1)).await;
    respond(result.map(messages_body))
}

async fn delete_job_message(State(state): State<Arc<SqsState>>, body: Bytes) -> Response {
    respond((|| -> RestResult {
        let req: JobDeleteBody = parse(&body)?;
        let deleted = state.job_queue.delete(&req.receipt_handle)?;
        Ok((StatusCode::OK, json!({ "deleted": deleted })))
    })())
}

async fn get_job_queue_stats(State(state): State<Arc<SqsState>>) -> Response {
    respond(
        state
            .job_queue
            .stats()
            .map(|stats| (StatusCode::OK, json!({ "stats": StatsWire::from(stats) }))),
    )
}

async fn get_job_queue_url(State(state): State<Arc<SqsState>>) -> Response {
    respond(
        state
            .job_queue
            .url()
            .map(|queue_url| (StatusCode::OK, json!({ "queueUrl": queue_url }))),
    )
}

// === Helpers ===

fn messages_body(messages: Vec<ReceivedMessage>) -> (StatusCode, Value) {
    let messages: Vec<MessageWire> = messages.into_iter().map(MessageWire::from).collect();
    (
        StatusCode::OK,
        json!({ "count": messages.len(), "messages": messages }),
    )
}

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, SqsError> {
    Ok(serde_json::from_slice(body)?)
}

fn respond(result: RestResult) -> Response {
    let request_id = RequestId::new();
    let (status, body) = match result {
        Ok(ok) => ok,
        Err(e) => {
            warn!(error = %e, "Queue request failed");
            let error = e.to_api_error().with_request_id(request_id.as_str());
            let status = StatusCode::from_u16(error.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let response = (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                Body::from(error.to_rest_json()),
            )
                .into_response();
            return with_request_id(response, request_id.as_str());
        }
    };
    let response = (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from(body.to_string()),
    )
        .into_response();
    with_request_id(response, request_id.as_str())
}
