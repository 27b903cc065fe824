//! HTTP handlers for the SQS JSON protocol

use agentflow_core::{ApiError, ErrorCode, RequestId};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{
    BatchEntry, BatchEntryResult, ReceiveMessageInput, SendMessageInput, MAX_BATCH_ENTRIES,
};
use crate::error::SqsError;
use crate::message::{attributes_from_wire, attributes_to_wire, AttributeValueWire, ReceivedMessage};
use crate::queue::attribute_strings;
use crate::SqsState;

const AMZ_JSON: &str = "application/x-amz-json-1.0";

/// Handle SQS requests based on X-Amz-Target header
pub async fn handle_request(
    State(state): State<Arc<SqsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = RequestId::new();
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    info!(target = %target, request_id = %request_id, "SQS request");

    let result = match target {
        "AmazonSQS.CreateQueue" => handle_create_queue(&state, &body),
        "AmazonSQS.GetQueueUrl" => handle_get_queue_url(&state, &body),
        "AmazonSQS.ListQueues" => handle_list_queues(&state, &body),
        "AmazonSQS.SendMessage" => handle_send_message(&state, &body),
        "AmazonSQS.SendMessageBatch" => handle_send_message_batch(&state, &body),
        "AmazonSQS.ReceiveMessage" => handle_receive_message(&state, &body).await,
        "AmazonSQS.DeleteMessage" => handle_delete_message(&state, &body),
        "AmazonSQS.GetQueueAttributes" => handle_get_queue_attributes(&state, &body),
        "AmazonSQS.DeleteQueue" => handle_delete_queue(&state, &body),
        "AmazonSQS.PurgeQueue" => handle_purge_queue(&state, &body),
        _ => {
            warn!(target = %target, "Unknown SQS operation");
            let error = ApiError::new(
                ErrorCode::UnknownOperation,
                format!("Unknown operation: {target}"),
            );
            return error_response(&error.with_request_id(request_id.as_str()));
        }
    };

    match result {
        Ok(value) => json_response(StatusCode::OK, &value, &request_id),
        Err(e) => {
            warn!(target = %target, error = %e, "SQS request failed");
            error_response(&e.to_api_error().with_request_id(request_id.as_str()))
        }
    }
}

// === Request/Response types ===

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateQueueRequest {
    queue_name: String,
    #[serde(default)]
    attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueNameRequest {
    queue_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueueUrlResponse {
    queue_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListQueuesRequest {
    queue_name_prefix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListQueuesResponse {
    queue_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueueUrlRequest {
    queue_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageRequest {
    queue_url: String,
    message_body: String,
    delay_seconds: Option<i64>,
    #[serde(default)]
    message_attributes: HashMap<String, AttributeValueWire>,
    message_deduplication_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageResponse {
    message_id: String,
    #[serde(rename = "MD5OfMessageBody")]
    md5_of_message_body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchRequest {
    queue_url: String,
    entries: Vec<SendMessageBatchRequestEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchRequestEntry {
    id: String,
    message_body: String,
    delay_seconds: Option<i64>,
    #[serde(default)]
    message_attributes: HashMap<String, AttributeValueWire>,
    message_deduplication_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendMessageBatchResponse {
    successful: Vec<BatchResultEntry>,
    failed: Vec<BatchErrorEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchResultEntry {
    id: String,
    message_id: String,
    #[serde(rename = "MD5OfMessageBody")]
    md5_of_message_body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchErrorEntry {
    id: String,
    sender_fault: bool,
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageRequest {
    queue_url: String,
    max_number_of_messages: Option<i64>,
    visibility_timeout: Option<i64>,
    wait_time_seconds: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    messages: Vec<MessageWire>,
}

/// A delivered message as it appears on the wire
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MessageWire {
    message_id: String,
    receipt_handle: String,
    #[serde(rename = "MD5OfBody")]
    md5_of_body: String,
    body: String,
    attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    message_attributes: HashMap<String, AttributeValueWire>,
}

impl From<ReceivedMessage> for MessageWire {
    fn from(msg: ReceivedMessage) -> Self {
        Self {
            attributes: msg.system_attributes(),
            message_attributes: attributes_to_wire(&msg.attributes),
            message_id: msg.message_id,
            receipt_handle: msg.receipt_handle,
            md5_of_body: msg.md5_of_body,
            body: msg.body,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DeleteMessageRequest {
    queue_url: String,
    receipt_handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueueAttributesRequest {
    queue_url: String,
    #[serde(default)]
    attribute_names: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueueAttributesResponse {
    attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct EmptyResponse {}

// === Handlers ===

type HandlerResult = Result<serde_json::Value, SqsError>;

fn handle_create_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: CreateQueueRequest = parse(body)?;
    let attributes = attribute_strings(req.attributes)?;
    let queue_url = state.registry.create_queue(&req.queue_name, &attributes)?;
    to_value(&QueueUrlResponse { queue_url })
}

fn handle_get_queue_url(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueNameRequest = parse(body)?;
    let queue_url = state.registry.get_queue_url(&req.queue_name)?;
    to_value(&QueueUrlResponse { queue_url })
}

fn handle_list_queues(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: ListQueuesRequest = if body.is_empty() {
        ListQueuesRequest::default()
    } else {
        parse(body)?
    };
    let queue_urls = state.registry.list_queues(req.queue_name_prefix.as_deref());
    to_value(&ListQueuesResponse { queue_urls })
}

fn handle_send_message(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: SendMessageRequest = parse(body)?;
    let input = SendMessageInput {
        body: req.message_body,
        delay_seconds: req.delay_seconds,
        attributes: attributes_from_wire(req.message_attributes)?,
        dedup_id: req.message_deduplication_id,
    };
    let output = state.registry.send_message(&req.queue_url, input)?;
    to_value(&SendMessageResponse {
        message_id: output.message_id,
        md5_of_message_body: output.md5_of_body,
    })
}

fn handle_send_message_batch(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: SendMessageBatchRequest = parse(body)?;
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
            Err(error) => failed.push(batch_error(entry.id, &error)),
        }
    }

    let mut successful = Vec::new();
    if !entries.is_empty() || failed.is_empty() {
        for result in broker.send_message_batch(entries)? {
            match result {
                BatchEntryResult::Sent { id, output } => successful.push(BatchResultEntry {
                    id,
                    message_id: output.message_id,
                    md5_of_message_body: output.md5_of_body,
                }),
                BatchEntryResult::Failed { id, error } => failed.push(batch_error(id, &error)),
            }
        }
    }

    to_value(&SendMessageBatchResponse { successful, failed })
}

fn batch_error(id: String, error: &SqsError) -> BatchErrorEntry {
    BatchErrorEntry {
        id,
        sender_fault: true,
        code: error.code().as_str().to_string(),
        message: error.to_string(),
    }
}

async fn handle_receive_message(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: ReceiveMessageRequest = parse(body)?;
    let input = ReceiveMessageInput {
        max_messages: req.max_number_of_messages.unwrap_or(1),
        wait_time_seconds: req.wait_time_seconds,
        visibility_timeout: req.visibility_timeout,
    };
    let messages = state.registry.receive_message(&req.queue_url, input).await?;
    to_value(&ReceiveMessageResponse {
        messages: messages.into_iter().map(MessageWire::from).collect(),
    })
}

fn handle_delete_message(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: DeleteMessageRequest = parse(body)?;
    state
        .registry
        .delete_message(&req.queue_url, &req.receipt_handle)?;
    to_value(&EmptyResponse {})
}

fn handle_get_queue_attributes(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: GetQueueAttributesRequest = parse(body)?;
    let attributes = state
        .registry
        .get_queue_attributes(&req.queue_url, &req.attribute_names)?;
    to_value(&GetQueueAttributesResponse { attributes })
}

fn handle_delete_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueUrlRequest = parse(body)?;
    state.registry.delete_queue(&req.queue_url)?;
    to_value(&EmptyResponse {})
}

fn handle_purge_queue(state: &SqsState, body: &Bytes) -> HandlerResult {
    let req: QueueUrlRequest = parse(body)?;
    state.registry.purge_queue(&req.queue_url)?;
    to_value(&EmptyResponse {})
}

// === Helpers ===

fn parse<T: DeserializeOwned>(body: &Bytes) -> Result<T, SqsError> {
    Ok(serde_json::from_slice(body)?)
}

fn to_value<T: Serialize>(value: &T) -> HandlerResult {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(agentflow_core::request_id::REQUEST_ID_HEADER, value);
    }
    response
}

fn json_response(status: StatusCode, body: &serde_json::Value, request_id: &RequestId) -> Response {
    let response = (
        status,
        [(header::CONTENT_TYPE, AMZ_JSON)],
        Body::from(body.to_string()),
    )
        .into_response();
    with_request_id(response, request_id.as_str())
}

fn error_response(error: &ApiError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let response = (
        status,
        [(header::CONTENT_TYPE, AMZ_JSON)],
        Body::from(error.to_json()),
    )
        .into_response();
    with_request_id(response, &error.request_id)
}
