//! Core types for the agentflow service
//!
//! This crate provides the error codes and request identifiers shared by
//! the queue emulator and the HTTP server.

pub mod error;
pub mod request_id;

pub use error::{ApiError, ErrorCode};
pub use request_id::RequestId;
