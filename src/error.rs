//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Message returned to callers for every fault. Details stay in the logs.
pub const GENERIC_FAULT_MESSAGE: &str = "Something went wrong";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    #[error("reserved field name '{field}' in resource {resource}")]
    ReservedField { resource: String, field: String },
    #[error("invalid aggregate on {resource}: {reason}")]
    InvalidAggregate { resource: String, reason: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database: {0}")]
    Db(sqlx::Error),
    #[error("aggregate recompute for parent {parent_id} failed: {source}")]
    Consistency {
        parent_id: String,
        #[source]
        source: Box<AppError>,
    },
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Validation failure located on one field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation { .. } | AppError::MalformedQuery(_) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Config(_) | AppError::Db(_) | AppError::Consistency { .. } | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True for conditions the caller cannot fix: storage faults, broken config, failed recomputes.
    pub fn is_fault(&self) -> bool {
        self.status_code().is_server_error()
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::NotFound(_) => "not_found",
            AppError::Validation { .. } | AppError::MalformedQuery(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Db(_) => "database_error",
            AppError::Consistency { .. } | AppError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show the caller.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(m) | AppError::MalformedQuery(m) | AppError::BadRequest(m) => m.clone(),
            AppError::Validation { message, .. } => format!("Invalid input data: {}", message),
            _ => GENERIC_FAULT_MESSAGE.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        classify_db_error(err)
    }
}

/// Sort storage errors into not-found, validation, malformed query, or fault.
fn classify_db_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::RowNotFound = err {
        return AppError::NotFound("no record found".into());
    }
    let sqlx::Error::Database(ref db_err) = err else {
        return AppError::Db(err);
    };
    let code = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
    let pg = db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>();
    let column = pg.and_then(|e| e.column()).map(str::to_string);
    let constraint = db_err.constraint().map(str::to_string);
    let message = db_err.message().to_string();
    match code.as_str() {
        "23505" => AppError::Validation {
            field: constraint,
            message: format!("duplicate value: {}", message),
        },
        "23502" | "23503" | "23514" => AppError::Validation {
            field: column.or(constraint),
            message,
        },
        "22P02" | "22007" | "22008" | "22003" | "2201W" | "2201X" | "42703" | "42883" => {
            AppError::MalformedQuery(message)
        }
        _ => AppError::Db(err),
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_fault() {
            tracing::error!(error = %self, debug = ?self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let details = match &self {
            AppError::Validation { field: Some(f), .. } => Some(serde_json::json!({ "field": f })),
            _ => None,
        };
        let body = ErrorBody {
            status: if status.is_client_error() { "fail" } else { "error" },
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.public_message(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_conditions_are_not_faults() {
        assert_eq!(AppError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::invalid("price", "must be a number").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::MalformedQuery("bad".into()).status_code(), StatusCode::BAD_REQUEST);
        assert!(!AppError::NotFound("x".into()).is_fault());
    }

    #[test]
    fn faults_hide_details() {
        let err = AppError::Internal("connection refused on 10.0.0.3".into());
        assert!(err.is_fault());
        assert_eq!(err.public_message(), GENERIC_FAULT_MESSAGE);

        let wrapped = AppError::Consistency {
            parent_id: "p".into(),
            source: Box::new(AppError::invalid("rating", "nope")),
        };
        assert!(wrapped.is_fault());
        assert_eq!(wrapped.public_message(), GENERIC_FAULT_MESSAGE);
    }

    #[test]
    fn row_not_found_is_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn transport_errors_are_faults() {
        let err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, AppError::Db(_)));
        assert!(err.is_fault());
    }

    #[test]
    fn malformed_query_is_classified_as_validation() {
        assert_eq!(AppError::MalformedQuery("x".into()).code(), "validation_error");
    }
}
