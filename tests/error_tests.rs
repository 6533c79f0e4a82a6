//! 错误处理单元测试
//!
//! 测试引擎错误类型的各种行为

use access_engine::error::{AppError, ErrorDetail, ErrorResponse};
use access_engine::models::policy::DenyReason;
use axum::http::StatusCode;
use axum::response::IntoResponse;

fn denied() -> AppError {
    AppError::Denied(DenyReason::ExplicitDeny {
        rule_id: "credential-anonymous-deny".to_string(),
    })
}

// ==================== 错误状态码测试 ====================

#[test]
fn test_error_status_codes() {
    assert_eq!(denied().status_code(), StatusCode::FORBIDDEN);
    assert_eq!(AppError::NotFound("dataset".to_string()).status_code(), StatusCode::NOT_FOUND);
    assert_eq!(AppError::Expired("state".to_string()).status_code(), StatusCode::GONE);
    assert_eq!(AppError::AlreadyConsumed.status_code(), StatusCode::GONE);
    assert_eq!(AppError::Validation("error".to_string()).status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        AppError::Timeout("request".to_string()).status_code(),
        StatusCode::REQUEST_TIMEOUT
    );
    assert_eq!(
        AppError::TransientStorage("busy".to_string()).status_code(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[test]
fn test_server_error_status_codes() {
    for error in [
        AppError::Database(sqlx::Error::RowNotFound),
        AppError::Config("Invalid config".to_string()),
        AppError::Crypto("bad tag".to_string()),
        AppError::Internal("Something went wrong".to_string()),
    ] {
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

// ==================== 用户消息测试 ====================

#[test]
fn test_user_messages_no_sensitive_info() {
    // 数据库错误不应该暴露技术细节
    let message = AppError::Database(sqlx::Error::RowNotFound).user_message();
    assert_eq!(message, "Database error occurred");
    assert!(!message.to_lowercase().contains("row"));

    // 拒绝不暴露规则 ID
    let message = denied().user_message();
    assert_eq!(message, "forbidden");
    assert!(!message.contains("credential"));

    // 解密失败不暴露细节
    let message = AppError::Crypto("aead tag mismatch".to_string()).user_message();
    assert_eq!(message, "Internal server error");

    let message = AppError::Config("missing encryption_key".to_string()).user_message();
    assert!(!message.contains("encryption_key"));
}

#[test]
fn test_user_messages_for_client_errors() {
    assert_eq!(
        AppError::NotFound("dataset".to_string()).user_message(),
        "Resource not found: dataset"
    );
    assert_eq!(
        AppError::Validation("invalid provider".to_string()).user_message(),
        "invalid provider"
    );
    assert_eq!(AppError::AlreadyConsumed.user_message(), "Token already consumed");
    assert_eq!(AppError::Expired("handshake".to_string()).user_message(), "Expired");
}

// ==================== 错误码测试 ====================

#[test]
fn test_error_code_consistency() {
    let errors = vec![
        denied(),
        AppError::NotFound("test".to_string()),
        AppError::Expired("test".to_string()),
        AppError::AlreadyConsumed,
        AppError::Validation("test".to_string()),
        AppError::Timeout("test".to_string()),
        AppError::TransientStorage("test".to_string()),
        AppError::Internal("test".to_string()),
    ];

    for error in errors {
        assert_eq!(error.code(), error.status_code().as_u16());
    }
}

// ==================== 便捷方法测试 ====================

#[test]
fn test_convenience_methods() {
    let err = AppError::not_found("User");
    if let AppError::NotFound(msg) = err {
        assert_eq!(msg, "User");
    } else {
        panic!("expected NotFound");
    }

    let err = AppError::validation("Invalid email");
    assert!(matches!(err, AppError::Validation(ref msg) if msg == "Invalid email"));
}

#[test]
fn test_deny_reason_accessor() {
    assert_eq!(
        denied().deny_reason().map(DenyReason::code),
        Some("explicit_deny")
    );
    assert_eq!(
        AppError::Denied(DenyReason::AnonymousDefault)
            .deny_reason()
            .map(DenyReason::code),
        Some("anonymous_default_deny")
    );
    assert!(AppError::AlreadyConsumed.deny_reason().is_none());
}

#[test]
fn test_transient_classification() {
    assert!(AppError::TransientStorage("x".to_string()).is_transient());
    assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_transient());
    assert!(AppError::Database(sqlx::Error::PoolClosed).is_transient());
    assert!(!AppError::Database(sqlx::Error::RowNotFound).is_transient());
    assert!(!denied().is_transient());
    assert!(!AppError::Validation("x".to_string()).is_transient());
}

// ==================== 错误显示测试 ====================

#[test]
fn test_error_display() {
    assert_eq!(format!("{}", denied()), "Access denied: explicit_deny");
    assert_eq!(
        format!("{}", AppError::NotFound("User".to_string())),
        "Resource not found: User"
    );
    assert_eq!(format!("{}", AppError::AlreadyConsumed), "Token already consumed");
}

// ==================== From 转换测试 ====================

#[test]
fn test_from_sqlx_error() {
    let app_error = AppError::from(sqlx::Error::RowNotFound);
    assert!(matches!(app_error, AppError::Database(_)));
}

#[test]
fn test_from_config_error() {
    let app_error = AppError::from(config::ConfigError::Message("bad key".to_string()));
    assert!(matches!(app_error, AppError::Config(ref msg) if msg.contains("bad key")));
}

#[test]
fn test_from_serde_json_error() {
    let parse_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let app_error = AppError::from(parse_error);
    assert!(matches!(app_error, AppError::Internal(_)));
}

#[test]
fn test_from_validation_errors() {
    let mut errors = validator::ValidationErrors::new();
    errors.add("provider", validator::ValidationError::new("regex"));

    let app_error = AppError::from(errors);
    assert!(matches!(app_error, AppError::Validation(ref msg) if msg.contains("provider")));
    assert_eq!(app_error.status_code(), StatusCode::BAD_REQUEST);
}

// ==================== 错误响应测试 ====================

#[test]
fn test_error_response_serialization() {
    let error_response = ErrorResponse {
        error: ErrorDetail {
            code: 404,
            message: "Resource not found".to_string(),
            request_id: "req-123".to_string(),
        },
    };

    let json_obj = serde_json::to_value(&error_response).unwrap();

    assert_eq!(json_obj["error"]["code"], 404);
    assert_eq!(json_obj["error"]["message"], "Resource not found");
    assert_eq!(json_obj["error"]["request_id"], "req-123");
}

#[test]
fn test_into_response_status() {
    let response = denied().into_response();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = AppError::AlreadyConsumed.into_response();
    assert_eq!(response.status(), StatusCode::GONE);
}

// ==================== 错误传播测试 ====================

#[test]
fn test_error_with_question_mark_operator() {
    fn may_fail(should_fail: bool) -> access_engine::Result<()> {
        if should_fail {
            Err(AppError::AlreadyConsumed)
        } else {
            Ok(())
        }
    }

    fn caller(should_fail: bool) -> access_engine::Result<()> {
        may_fail(should_fail)?;
        Ok(())
    }

    assert!(matches!(caller(true), Err(AppError::AlreadyConsumed)));
    assert!(caller(false).is_ok());
}
