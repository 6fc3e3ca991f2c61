use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crates::application::{payments::PaymentError, word_lookup::LookupError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Payment(err) => err.status_code(),
            AppError::Lookup(err) => err.status_code(),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self, "backend: request failed");
        }

        // Internal detail stays in the logs.
        let message = match &self {
            AppError::Internal(_)
            | AppError::Payment(PaymentError::Internal(_))
            | AppError::Lookup(LookupError::Internal(_)) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_errors_keep_their_status() {
        let err = AppError::from(PaymentError::StaleOrMismatchedAmount {
            expected: 10000,
            claimed: 9999,
        });
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let response = AppError::from(PaymentError::DuplicateRequest).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = AppError::from(PaymentError::StillProcessing).into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn internal_errors_hide_detail() {
        let err = AppError::from(anyhow::anyhow!("connection refused on 10.0.0.3"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Internal server error");

        let err = AppError::from(PaymentError::Internal(anyhow::anyhow!("pool timed out")));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn lookup_errors_keep_their_status() {
        let err = AppError::from(LookupError::NotFound("qwzx".to_string()));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
