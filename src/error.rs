//! 统一错误模型
//! 定义所有错误类型、错误分类和错误响应格式

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// 机器可读的错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    Validation,
    Conflict,
    NotFound,
    /// 存储不可达、超时等基础设施故障，调用方可自行决定是否重试
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl AppError {
    /// 获取错误分类
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthorized => ErrorKind::Unauthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::Timeout(_)
            | AppError::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// 是否为基础设施故障（可重试）
    pub fn is_infrastructure(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }

    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Forbidden(reason) => reason.clone(),
            AppError::NotFound(msg) => format!("Resource not found: {}", msg),
            AppError::Validation(msg) => msg.clone(),
            AppError::Conflict(msg) => msg.clone(),
            AppError::Timeout(_) => "Service temporarily unavailable".to_string(),
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    // 便捷方法
    pub fn forbidden(msg: impl Into<String>) -> Self {
        AppError::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AppError::Timeout(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub kind: ErrorKind,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                kind: self.kind(),
                message: self.user_message(),
                request_id,
            },
        };

        // 业务错误只记 warn，基础设施错误记 error
        if self.is_infrastructure() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::warn!(
                code = self.code(),
                kind = self.kind().as_str(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 从 validator 校验错误转换
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Unauthorized.code(), 401);
        assert_eq!(AppError::forbidden("missing complaint.resolve").code(), 403);
        assert_eq!(AppError::not_found("complaint").code(), 404);
        assert_eq!(AppError::conflict("duplicate").code(), 409);
        assert_eq!(AppError::validation("bad").code(), 422);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::forbidden("x").kind(), ErrorKind::Forbidden);
        assert_eq!(AppError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(AppError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(AppError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(AppError::timeout("x").kind(), ErrorKind::Infrastructure);
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_infrastructure());
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let message = error.user_message();
        assert_eq!(message, "Database error occurred");
        assert!(!message.contains("sqlx"));

        let error = AppError::timeout("permission store: connection refused on 10.0.0.5");
        assert!(!error.user_message().contains("10.0.0.5"));
    }

    #[test]
    fn test_forbidden_message_names_permission() {
        let error = AppError::forbidden("Missing permission: complaint.resolve");
        assert!(error.user_message().contains("complaint.resolve"));
    }
}
