use serde::Serialize;
use thiserror::Error;

/// A single failed validation check, tagged with the bulk destination index
/// when the failure belongs to one destination rather than the whole request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub index: Option<usize>,
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            index: None,
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn at(index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("validation failed: {} field error(s)", .0.len())]
    ValidationFailed(Vec<FieldError>),

    #[error("candidate fetch failed: {0}")]
    CandidateFetchFailed(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("routing failed: {0}")]
    RoutingFailed(String),

    #[error("assignment already resolved: {0}")]
    AssignmentConflict(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}
