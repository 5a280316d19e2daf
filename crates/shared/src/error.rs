use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid number for {field}: {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },
    #[error("invalid date for {field}: {raw:?} (expected YYYY-MM-DD)")]
    InvalidDate { field: &'static str, raw: String },
    #[error("unknown {field} value: {raw:?}")]
    UnknownVariant { field: &'static str, raw: String },
}

/// Non-success response from the sales API.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RequestError {
    pub status: u16,
    pub message: String,
}

impl RequestError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn from_response_body(status: u16, body: &str) -> Self {
        if body.trim().is_empty() {
            return Self::new(status, format!("Request failed with {status}"));
        }
        Self::new(status, body)
    }
}
