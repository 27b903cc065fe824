//! Queue emulator errors

use agentflow_core::{ApiError, ErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqsError {
    #[error("Queue does not exist: {0}")]
    QueueNotFound(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Unknown attribute: {0}")]
    InvalidAttributeName(String),
    #[error("{0} is required")]
    MissingParameter(String),
    #[error("Job queue is not initialized")]
    NotInitialized,
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SqsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueNotFound(_) => ErrorCode::QueueDoesNotExist,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameterValue,
            Self::InvalidAttributeName(_) => ErrorCode::InvalidAttributeName,
            Self::MissingParameter(_) => ErrorCode::MissingParameter,
            Self::NotInitialized => ErrorCode::ServiceUnavailable,
            Self::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.code(), self.to_string())
    }
}
