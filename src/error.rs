use crate::models::{AccessLevel, ValidationIssue};
use crate::quiz::QuizError;
use crate::store::StoreError;
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{} access query failed: {source}", .criterion.as_str())]
    AccessQueryFailure {
        criterion: AccessLevel,
        #[source]
        source: StoreError,
    },
    #[error("no usable questions available in {source_id}")]
    EmptyQuestionPool { source_id: String },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("access denied")]
    Forbidden,
    #[error("validation failed")]
    Validation(Vec<ValidationIssue>),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound { kind, id: id.into() }
    }

    pub fn validation(field: &str, issue: &str) -> Self {
        EngineError::Validation(vec![ValidationIssue::new(field, issue)])
    }

    pub fn into_app_error(self, request_id: impl Into<String>) -> AppError {
        let request_id = request_id.into();
        let message = self.to_string();
        match self {
            EngineError::AccessQueryFailure { .. } | EngineError::Store(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", message, request_id)
            }
            EngineError::EmptyQuestionPool { .. } => AppError::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "EMPTY_QUESTION_POOL",
                message,
                request_id,
            ),
            EngineError::NotFound { .. } => {
                AppError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message, request_id)
            }
            EngineError::Forbidden => {
                AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message, request_id)
            }
            EngineError::Validation(issues) => {
                AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id)
                    .with_details(issues.into_iter().map(ErrorDetail::from).collect())
            }
            EngineError::Quiz(QuizError::NoActiveQuiz) => {
                AppError::new(StatusCode::NOT_FOUND, "NO_ACTIVE_QUIZ", message, request_id)
            }
            EngineError::Quiz(QuizError::UnknownQuestion(_)) => {
                AppError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id)
            }
            EngineError::Quiz(_) => {
                AppError::new(StatusCode::CONFLICT, "QUIZ_STATE", message, request_id)
            }
        }
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut issues: Vec<ValidationIssue> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let issue = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    ValidationIssue::new(field.to_string(), issue)
                })
            })
            .collect();
        issues.sort_by(|a, b| a.field.cmp(&b.field));
        EngineError::Validation(issues)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<ValidationIssue> for ErrorDetail {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            field: issue.field,
            issue: issue.issue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}
