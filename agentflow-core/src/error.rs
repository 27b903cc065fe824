//! API error codes and formatting

use serde::Serialize;
use thiserror::Error;

/// Error codes surfaced by the queue API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Lookup
    QueueDoesNotExist,

    // Request validation
    InvalidParameterValue,
    InvalidAttributeName,
    MissingParameter,
    UnknownOperation,
    SerializationError,

    // Service state
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueDoesNotExist => "QueueDoesNotExist",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::InvalidAttributeName => "InvalidAttributeName",
            Self::MissingParameter => "MissingParameter",
            Self::UnknownOperation => "UnknownOperationException",
            Self::SerializationError => "SerializationException",
            Self::ServiceUnavailable => "ServiceUnavailable",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::QueueDoesNotExist => 404,
            Self::InvalidParameterValue
            | Self::InvalidAttributeName
            | Self::MissingParameter
            | Self::UnknownOperation
            | Self::SerializationError => 400,
            Self::ServiceUnavailable => 503,
        }
    }
}

/// API error carrying a code, a human readable message and the request id
#[derive(Debug, Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Format as an AWS JSON protocol error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: &'a str,
            message: &'a str,
        }

        let error = JsonError {
            error_type: self.code.as_str(),
            message: &self.message,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"__type":"{}","message":"{}"}}"#, self.code.as_str(), self.message)
        })
    }

    /// Format as a REST error body
    pub fn to_rest_json(&self) -> String {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RestError<'a> {
            error: &'a str,
            message: &'a str,
            request_id: &'a str,
        }

        let error = RestError {
            error: self.code.as_str(),
            message: &self.message,
            request_id: &self.request_id,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}","message":"{}"}}"#, self.code.as_str(), self.message)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_json_format() {
        let error = ApiError::new(ErrorCode::QueueDoesNotExist, "Queue does not exist: jobs");

        let json = error.to_json();
        assert!(json.contains(r#""__type":"QueueDoesNotExist""#));
        assert!(json.contains("Queue does not exist: jobs"));
    }

    #[test]
    fn test_error_rest_format() {
        let error = ApiError::new(ErrorCode::InvalidParameterValue, "bad delay")
            .with_request_id("test-request-id");

        let json = error.to_rest_json();
        assert!(json.contains(r#""error":"InvalidParameterValue""#));
        assert!(json.contains(r#""requestId":"test-request-id""#));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::QueueDoesNotExist.http_status(), 404);
        assert_eq!(ErrorCode::InvalidParameterValue.http_status(), 400);
        assert_eq!(ErrorCode::ServiceUnavailable.http_status(), 503);
    }

    #[test]
    fn test_every_code_is_client_or_service_error() {
        let codes = [
            ErrorCode::QueueDoesNotExist,
            ErrorCode::InvalidParameterValue,
            ErrorCode::InvalidAttributeName,
            ErrorCode::MissingParameter,
            ErrorCode::UnknownOperation,
            ErrorCode::SerializationError,
            ErrorCode::ServiceUnavailable,
        ];
        for code in codes {
            let status = code.http_status();
            assert!(status == 503 || (400..500).contains(&status), "{code:?} -> {status}");
        }
    }

    #[test]
    fn test_display_uses_code_string() {
        let error = ApiError::new(ErrorCode::UnknownOperation, "nope");
        assert_eq!(error.to_string(), "UnknownOperationException: nope");
    }
}
