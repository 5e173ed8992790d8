use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Error kinds surfaced to OpenAI-compatible clients in `error.type`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorType {
    #[serde(rename = "invalid_request_error")]
    InvalidRequest,
    #[serde(rename = "missing_session_id")]
    MissingSessionId,
    #[serde(rename = "unauthorized")]
    Unauthorized,
    #[serde(rename = "not_found")]
    NotFound,
    #[serde(rename = "payload_too_large")]
    PayloadTooLarge,
    #[serde(rename = "codex_execution_error")]
    CodexExecution,
    #[serde(rename = "codex_stream_error")]
    CodexStream,
    #[serde(rename = "internal_server_error")]
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request_error",
            Self::MissingSessionId => "missing_session_id",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::PayloadTooLarge => "payload_too_large",
            Self::CodexExecution => "codex_execution_error",
            Self::CodexStream => "codex_stream_error",
            Self::Internal => "internal_server_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::MissingSessionId => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::PayloadTooLarge => 413,
            Self::CodexExecution => 500,
            Self::CodexStream => 500,
            Self::Internal => 500,
        }
    }
}

/// `{ "error": { "message": ..., "type": ... } }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub type_: ErrorType,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{message}")]
    InvalidRequest { message: String },
    #[error("session_id (or conversation_id / thread_id / user) is required in this deployment.")]
    MissingSessionId,
    #[error("Invalid or missing API key.")]
    Unauthorized,
    #[error("No route for {path}.")]
    NotFound { path: String },
    #[error("Request body exceeds the {limit} byte limit.")]
    PayloadTooLarge { limit: usize },
    #[error("{message}")]
    CodexExecution { message: String },
    #[error("{message}")]
    CodexStream { message: String },
    #[error("{message}")]
    Internal { message: String },
}

impl BridgeError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::MissingSessionId => ErrorType::MissingSessionId,
            Self::Unauthorized => ErrorType::Unauthorized,
            Self::NotFound { .. } => ErrorType::NotFound,
            Self::PayloadTooLarge { .. } => ErrorType::PayloadTooLarge,
            Self::CodexExecution { .. } => ErrorType::CodexExecution,
            Self::CodexStream { .. } => ErrorType::CodexStream,
            Self::Internal { .. } => ErrorType::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.error_type().status_code()
    }

    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                type_: self.error_type(),
            },
        }
    }

    /// The `error` member as a bare JSON value, for embedding in stream chunks.
    pub fn to_error_value(&self) -> Value {
        json!({
            "message": self.to_string(),
            "type": self.error_type().as_str(),
        })
    }
}

impl From<BridgeError> for ErrorBody {
    fn from(value: BridgeError) -> Self {
        value.to_error_body()
    }
}

impl From<&BridgeError> for ErrorBody {
    fn from(value: &BridgeError) -> Self {
        value.to_error_body()
    }
}
