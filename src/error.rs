// src/error.rs
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;

use crate::handlers::ApiResponse;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    ValidationError(String),
    NotFound(String),
    MethodNotAllowed,
    Unauthorized(String),
    Forbidden(String),
    AuthError(String),
    InternalServerError(String),
    DatabaseError(sqlx::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Message shown to clients for every 5xx. The detail only goes to the log.
pub const SERVER_ERROR_MESSAGE: &str = "Server error";

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::ValidationError(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::AuthError(msg) => write!(f, "{}", msg),
            ApiError::MethodNotAllowed => write!(f, "Method not allowed"),
            ApiError::InternalServerError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database error: {}", err),
        }
    }
}

impl ApiError {
    pub fn not_found(label: &str) -> Self {
        ApiError::NotFound(format!("{} not found", label))
    }

    /// Text placed in the envelope's `message`.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::InternalServerError(_) | ApiError::DatabaseError(_) => {
                SERVER_ERROR_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Unauthorized(_) | ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::InternalServerError(_) | ApiError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("❌ {}", self);
        }
        ApiResponse::<()>::error(self.public_message(), status.as_u16()).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                return ApiError::BadRequest("Record already exists".to_string());
            }
            if db_err.is_foreign_key_violation() {
                return ApiError::BadRequest("Referenced record does not exist".to_string());
            }
            if db_err.is_check_violation() {
                return ApiError::BadRequest("Value violates a data constraint".to_string());
            }
        }
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Record not found".to_string()),
            other => ApiError::DatabaseError(other),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        // First field message wins, matching the ordered required-field checks.
        let message = err
            .field_errors()
            .into_iter()
            .flat_map(|(_, errors)| errors.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| err.to_string());
        ApiError::ValidationError(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_rt::test]
    async fn server_errors_hide_detail() {
        let err = ApiError::InternalServerError("disk on fire".to_string());
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["data"], serde_json::Value::Null);
        assert_eq!(json["message"], SERVER_ERROR_MESSAGE);
        assert_eq!(json["code"], 500);
    }

    #[actix_rt::test]
    async fn client_errors_keep_message_and_code() {
        let resp = ApiError::not_found("Patient").error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Patient not found");
        assert_eq!(json["code"], 404);
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            ApiError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
