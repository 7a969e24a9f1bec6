// src/handlers.rs
use actix_web::{http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::error::{ApiError, ApiResult};

// ==================== COMMON STRUCTURES ====================

/// Uniform response envelope. `data` is always present in the JSON (null on failure).
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub code: u16,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: 200,
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            code: 200,
        }
    }

    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            code: 201,
        }
    }

    pub fn into_response(self) -> HttpResponse {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        HttpResponse::build(status).json(self)
    }
}

impl ApiResponse<()> {
    pub fn error(message: impl Into<String>, code: u16) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code,
        }
    }

    /// Success without a payload, e.g. after a delete.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            code: 200,
        }
    }
}

// ==================== FALLBACK HANDLERS ====================

pub async fn method_not_allowed() -> ApiResult<HttpResponse> {
    Err(ApiError::MethodNotAllowed)
}

pub async fn route_not_found() -> ApiResult<HttpResponse> {
    Err(ApiError::NotFound("Endpoint not found".to_string()))
}
