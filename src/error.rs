//! Error types for the query engine
//!
//! Every expected failure is a typed result value with a stable machine code;
//! free-text messages are rendering hints, never the contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Stable machine-readable error codes. Closed enum: callers match on these
/// to render localized text, so variants are append-only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    EmptyInput,
    InvalidInput,
    // Entity resolution
    EntityNotFound,
    EntityAmbiguous,
    InvalidCodeFormat,
    // Temporal resolution
    UnresolvableExpression,
    FutureDate,
    // Validation
    MissingRequiredField,
    CrossFieldConflict,
    OutOfRange,
    // Routing
    UnknownQuery,
    // Downstream
    HandlerFailed,
    HandlerTimeout,
    AllBranchesFailed,
    Internal,
}

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Input Errors
    // =============================

    #[error("empty query text")]
    EmptyInput,

    #[error("query text carries no recognizable content: {0}")]
    InvalidInput(String),

    // =============================
    // Entity Resolution Errors
    // =============================

    #[error("entity not found: {span}")]
    EntityNotFound {
        span: String,
        suggestion: Option<String>,
    },

    #[error("entity '{span}' is ambiguous between {candidates:?}")]
    EntityAmbiguous {
        span: String,
        candidates: Vec<String>,
    },

    #[error("invalid security code format: {detail}")]
    InvalidCodeFormat {
        detail: String,
        suggestion: Option<String>,
    },

    // =============================
    // Temporal Resolution Errors
    // =============================

    #[error("unresolvable time expression: {0}")]
    UnresolvableExpression(String),

    #[error("date {0} is after the latest trading session")]
    FutureDate(chrono::NaiveDate),

    // =============================
    // Validation / Routing Errors
    // =============================

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("conflicting fields: {0}")]
    CrossFieldConflict(String),

    #[error("value out of range: {0}")]
    OutOfRange(String),

    #[error("query did not match any known category")]
    UnknownQuery,

    // =============================
    // Downstream Errors
    // =============================

    #[error("handler '{handler}' failed: {detail}")]
    HandlerFailed { handler: String, detail: String },

    #[error("handler '{0}' timed out")]
    HandlerTimeout(String),

    #[error("all composite branches failed")]
    AllBranchesFailed,

    #[error("reference data unavailable: {0}")]
    ReferenceUnavailable(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl EngineError {
    /// Stable code for this error. Callers render messages from the code,
    /// never by parsing the Display string.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::EmptyInput => ErrorCode::EmptyInput,
            EngineError::InvalidInput(_) => ErrorCode::InvalidInput,
            EngineError::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            EngineError::EntityAmbiguous { .. } => ErrorCode::EntityAmbiguous,
            EngineError::InvalidCodeFormat { .. } => ErrorCode::InvalidCodeFormat,
            EngineError::UnresolvableExpression(_) => ErrorCode::UnresolvableExpression,
            EngineError::FutureDate(_) => ErrorCode::FutureDate,
            EngineError::MissingRequiredField(_) => ErrorCode::MissingRequiredField,
            EngineError::CrossFieldConflict(_) => ErrorCode::CrossFieldConflict,
            EngineError::OutOfRange(_) => ErrorCode::OutOfRange,
            EngineError::UnknownQuery => ErrorCode::UnknownQuery,
            EngineError::HandlerFailed { .. } => ErrorCode::HandlerFailed,
            EngineError::HandlerTimeout(_) => ErrorCode::HandlerTimeout,
            EngineError::AllBranchesFailed => ErrorCode::AllBranchesFailed,
            EngineError::ReferenceUnavailable(_)
            | EngineError::SerializationError(_)
            | EngineError::HttpError(_) => ErrorCode::Internal,
        }
    }

    /// Human-readable suggestion for fixing the query, where one exists.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            EngineError::EntityNotFound { suggestion, .. } => suggestion.clone(),
            EngineError::InvalidCodeFormat { suggestion, .. } => suggestion.clone(),
            EngineError::EntityAmbiguous { candidates, .. } => {
                Some(format!("请使用完整名称明确指定：{}", candidates.join("、")))
            }
            EngineError::EmptyInput => Some("查询内容不能为空".to_string()),
            EngineError::UnknownQuery => Some(
                "无法识别的查询类型，请描述股价、财务、资金流向或公告相关的问题".to_string(),
            ),
            _ => None,
        }
    }
}
