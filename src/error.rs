//! 统一错误模型
//! 定义引擎的错误分类及对外错误响应格式

use crate::models::policy::DenyReason;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 引擎错误类型
///
/// `Denied` 是策略判定的正常否定结果，只有调用层通过 `require` 把它转换为错误；
/// 其余变体都是真正的失败。
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Access denied: {}", .0.code())]
    Denied(DenyReason),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Token already consumed")]
    AlreadyConsumed,

    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Denied(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Expired(_) | AppError::AlreadyConsumed => StatusCode::GONE,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::TransientStorage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::Crypto(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含规则细节等敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Denied(_) => "forbidden".to_string(),
            AppError::NotFound(what) => format!("Resource not found: {}", what),
            AppError::Expired(_) => "Expired".to_string(),
            AppError::AlreadyConsumed => "Token already consumed".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::Timeout(_) => "Request timeout".to_string(),
            AppError::TransientStorage(_) => "Service temporarily unavailable".to_string(),
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Crypto(_) | AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    /// 是否为可重试的存储错误
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientStorage(_) => true,
            AppError::Database(e) => is_transient_sqlx(e),
            _ => false,
        }
    }

    /// 拒绝原因（仅 `Denied` 有值）
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            AppError::Denied(reason) => Some(reason),
            _ => None,
        }
    }

    // 便捷方法
    pub fn not_found(what: &str) -> Self {
        AppError::NotFound(what.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }
}

/// 连接池、IO 错误以及序列化冲突/死锁视为瞬时错误
fn is_transient_sqlx(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
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
                message: self.user_message(),
                request_id,
            },
        };

        // 拒绝是预期结果，按 warn 记录；其余按 error 记录
        if let AppError::Denied(reason) = &self {
            tracing::warn!(
                reason = reason.code(),
                request_id = %error_response.error.request_id,
                "Request denied"
            );
        } else {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Engine error"
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

/// 请求校验失败（validator 派生）
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {}", e))
    }
}
