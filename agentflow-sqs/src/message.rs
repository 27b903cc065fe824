//! Message payloads and typed message attributes

use base64::{engine::general_purpose, Engine};
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;

use crate::error::SqsError;

/// A typed message attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum MessageAttributeValue {
    String(String),
    /// Numbers keep their textual form so no precision is lost
    Number(String),
    Binary(Vec<u8>),
}

impl MessageAttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn data_type(&self) -> &'static str {
        match self {
            Self::String(_) => "String",
            Self::Number(_) => "Number",
            Self::Binary(_) => "Binary",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Number(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}

/// Wire representation shared by the JSON protocol and the REST adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeValueWire {
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<String>,
}

impl TryFrom<AttributeValueWire> for MessageAttributeValue {
    type Error = SqsError;

    fn try_from(wire: AttributeValueWire) -> Result<Self, Self::Error> {
        // Custom type suffixes such as "Number.float" are allowed
        let base_type = wire.data_type.split('.').next().unwrap_or_default();
        match base_type {
            "String" => wire
                .string_value
                .map(Self::String)
                .ok_or_else(|| SqsError::MissingParameter("StringValue".into())),
            "Number" => {
                let value = wire
                    .string_value
                    .ok_or_else(|| SqsError::MissingParameter("StringValue".into()))?;
                if value.trim().parse::<f64>().is_err() {
                    return Err(SqsError::InvalidParameter(format!(
                        "Number attribute is not numeric: {value}"
                    )));
                }
                Ok(Self::Number(value))
            }
            "Binary" => {
                let encoded = wire
                    .binary_value
                    .ok_or_else(|| SqsError::MissingParameter("BinaryValue".into()))?;
                general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map(Self::Binary)
                    .map_err(|e| SqsError::InvalidParameter(format!("Invalid BinaryValue: {e}")))
            }
            other => Err(SqsError::InvalidParameter(format!(
                "Unsupported attribute DataType: {other}"
            ))),
        }
    }
}

impl From<&MessageAttributeValue> for AttributeValueWire {
    fn from(value: &MessageAttributeValue) -> Self {
        match value {
            MessageAttributeValue::String(s) | MessageAttributeValue::Number(s) => Self {
                data_type: value.data_type().to_string(),
                string_value: Some(s.clone()),
                binary_value: None,
            },
            MessageAttributeValue::Binary(bytes) => Self {
                data_type: value.data_type().to_string(),
                string_value: None,
                binary_value: Some(general_purpose::STANDARD.encode(bytes)),
            },
        }
    }
}

/// Convert a wire attribute map, failing on the first invalid entry
pub fn attributes_from_wire(
    wire: HashMap<String, AttributeValueWire>,
) -> Result<HashMap<String, MessageAttributeValue>, SqsError> {
    wire.into_iter()
        .map(|(name, value)| Ok((name, MessageAttributeValue::try_from(value)?)))
        .collect()
}

pub fn attributes_to_wire(
    attributes: &HashMap<String, MessageAttributeValue>,
) -> HashMap<String, AttributeValueWire> {
    attributes
        .iter()
        .map(|(name, value)| (name.clone(), AttributeValueWire::from(value)))
        .collect()
}

/// Lowercase hex MD5 of the message body
pub fn body_digest(body: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A stored message
#[derive(Debug, Clone)]
pub struct Message {
    pub message_id: String,
    pub body: String,
    pub md5_of_body: String,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub dedup_id: Option<String>,
    /// Monotonic send instant, used for retention
    pub sent_at: Instant,
    pub sent_timestamp: DateTime<Utc>,
    pub receive_count: u32,
    pub first_receive_timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(
        body: String,
        attributes: HashMap<String, MessageAttributeValue>,
        dedup_id: Option<String>,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            md5_of_body: body_digest(&body),
            body,
            attributes,
            dedup_id,
            sent_at: Instant::now(),
            sent_timestamp: Utc::now(),
            receive_count: 0,
            first_receive_timestamp: None,
        }
    }
}

/// One delivery of a message, handed out by a receive call
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    pub attributes: HashMap<String, MessageAttributeValue>,
    pub sent_timestamp: DateTime<Utc>,
    pub receive_count: u32,
    pub first_receive_timestamp: DateTime<Utc>,
}

impl ReceivedMessage {
    /// System attributes reported alongside each delivery
    pub fn system_attributes(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                "SentTimestamp".to_string(),
                self.sent_timestamp.timestamp_millis().to_string(),
            ),
            (
                "ApproximateReceiveCount".to_string(),
                self.receive_count.to_string(),
            ),
            (
                "ApproximateFirstReceiveTimestamp".to_string(),
                self.first_receive_timestamp.timestamp_millis().to_string(),
            ),
        ])
    }
}
