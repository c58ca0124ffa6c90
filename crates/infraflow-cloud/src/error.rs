//! Cloud provider error types

use thiserror::Error;

/// Provider error codes that are worth retrying with a fixed delay.
///
/// Throttling and transient conflicts (another operation on the same
/// resource still running) clear up on their own.
const RETRYABLE_CODES: &[&str] = &[
    "Throttling",
    "Throttling.User",
    "Throttling.Api",
    "ServiceUnavailable",
    "OperationConflict",
    "TaskConflict",
    "IncorrectStatus",
    "IncorrectVpcStatus",
    "IncorrectVSwitchStatus",
    "IncorrectEipStatus",
    "IncorrectInstanceStatus",
    "OperationFailed.LastTokenProcessing",
    "LastTokenProcessing",
    "SystemBusy",
];

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("API error [{code}]: {message}")]
    Api { code: String, message: String },

    #[error("Ambiguous result: {0}")]
    Ambiguous(String),

    #[error("Unexpected resource status: {0}")]
    UnexpectedStatus(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Provider error code, if this error came from the provider API
    pub fn code(&self) -> Option<&str> {
        match self {
            CloudError::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the provider reported throttling or a transient conflict
    pub fn is_retryable(&self) -> bool {
        self.code()
            .is_some_and(|code| RETRYABLE_CODES.contains(&code) || code.starts_with("Throttling"))
    }

    /// Whether the provider reported the addressed resource as absent
    ///
    /// Actors translate this into an empty result; it never reaches the flow.
    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|code| {
            code.ends_with(".NotFound") || code.ends_with("NotFound") || code == "NotFound"
        })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CloudError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
