use axum::{
    Json,
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
};
use serde::Serialize;
use thiserror::Error;

pub type GradeResult<T> = Result<T, GradeError>;

/// Why a grading session (or one of its steps) could not produce a verdict.
#[derive(Debug, Clone, Error)]
pub enum GradeError {
    #[error("source code is empty")]
    EmptySource,
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("execution service error: {message}")]
    ExecutionService {
        status: Option<u16>,
        message: String,
    },
    #[error("unexpected response shape: {0}")]
    UnexpectedResponseShape(String),
    #[error("execution still pending after {attempts} poll attempts")]
    Timeout { attempts: u32 },
    #[error("program produced no output (status: {status})")]
    NoOutput {
        status: String,
        stderr: Option<String>,
        compile_output: Option<String>,
    },
    #[error("comparator error: {0}")]
    Comparator(String),
}

impl GradeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptySource => "empty_source",
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ExecutionService { .. } => "execution_service_error",
            Self::UnexpectedResponseShape(_) => "unexpected_response_shape",
            Self::Timeout { .. } => "timeout",
            Self::NoOutput { .. } => "no_output",
            Self::Comparator(_) => "comparator_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::EmptySource => "Write some code before submitting".to_string(),
            Self::UnsupportedLanguage(key) => format!("Language '{key}' is not supported"),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::ExecutionService { .. } => {
                "The code runner is unavailable right now, try again shortly".to_string()
            }
            Self::UnexpectedResponseShape(_) => {
                "The code runner returned a response we could not read".to_string()
            }
            Self::Timeout { .. } => "Your code took too long to finish running".to_string(),
            Self::NoOutput { .. } => {
                "Your code ran but printed nothing, check for errors below".to_string()
            }
            Self::Comparator(_) => "Your output could not be checked right now".to_string(),
        }
    }

    /// Rejected before anything was sent to the execution service.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::EmptySource | Self::UnsupportedLanguage(_) | Self::InvalidRequest(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptySource | Self::UnsupportedLanguage(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ExecutionService { .. }
            | Self::UnexpectedResponseShape(_)
            | Self::Comparator(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::NoOutput { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<reqwest::Error> for GradeError {
    fn from(err: reqwest::Error) -> Self {
        Self::ExecutionService {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("attempt limit of {limit} reached")]
    AttemptsExceeded { limit: usize },
    #[error("ledger storage error: {0}")]
    Storage(String),
}

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Grade(#[from] GradeError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("execution not found")]
    NotFound,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compile_output: Option<String>,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Grade(err) => err.code(),
            Self::Ledger(LedgerError::AttemptsExceeded { .. }) => "attempts_exceeded",
            Self::Ledger(LedgerError::Storage(_)) => "storage_error",
            Self::NotFound => "not_found",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Grade(err) => err.status(),
            Self::Ledger(LedgerError::AttemptsExceeded { .. }) => StatusCode::CONFLICT,
            Self::Ledger(LedgerError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn body(&self) -> ErrorBody {
        let mut body = ErrorBody {
            error: self.code(),
            message: String::new(),
            detail: None,
            stderr: None,
            compile_output: None,
        };
        match self {
            Self::Grade(err) => {
                body.message = err.message();
                match err {
                    GradeError::NoOutput {
                        stderr,
                        compile_output,
                        ..
                    } => {
                        body.stderr = stderr.clone();
                        body.compile_output = compile_output.clone();
                    }
                    GradeError::ExecutionService { message, .. }
                    | GradeError::UnexpectedResponseShape(message)
                    | GradeError::Comparator(message) => body.detail = Some(message.clone()),
                    _ => {}
                }
            }
            Self::Ledger(LedgerError::AttemptsExceeded { limit }) => {
                body.message = format!("You have used all {limit} attempts for this problem");
            }
            Self::Ledger(LedgerError::Storage(_)) => {
                body.message = "Your attempt could not be saved".to_string();
            }
            Self::NotFound => body.message = "No execution with that token".to_string(),
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::warn!(error = %self, code = self.code(), "request failed");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
