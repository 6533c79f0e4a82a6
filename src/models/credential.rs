//! Credential vault models

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// provider 名：小写字母数字开头，至多 64 字符
pub static PROVIDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("provider pattern is valid"));

/// 已加密的第三方凭据记录，(user_id, provider) 唯一
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Credential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    /// base64(nonce || ciphertext)
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// 审计快照（不含令牌）
    pub fn redacted_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "user_id": self.user_id,
            "provider": self.provider,
            "has_refresh_token": self.refresh_token.is_some(),
            "expires_at": self.expires_at,
            "scopes": self.scopes,
            "last_error": self.last_error,
        })
    }

    pub fn to_ref(&self) -> CredentialRef {
        CredentialRef {
            id: self.id,
            user_id: self.user_id,
            provider: self.provider.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// 写入凭据后返回的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRef {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 解密后的凭据，令牌用 Secret 包装防止日志泄露
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

impl DecryptedCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 写入凭据请求
#[derive(Debug, Clone, Validate)]
pub struct StoreCredential {
    #[validate(regex(path = *PROVIDER_PATTERN, message = "invalid provider name"))]
    pub provider: String,
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[validate(length(max = 64))]
    pub scopes: Vec<String>,
}

/// 只按 provider 定位凭据的请求（读取、撤销、握手、刷新失败）
#[derive(Debug, Clone, Validate)]
pub struct ProviderName {
    #[validate(regex(path = *PROVIDER_PATTERN, message = "invalid provider name"))]
    pub provider: String,
}

impl ProviderName {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
        }
    }
}

/// upsert 结果：新建还是替换由存储层在同一临界区内判定
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    Created(Credential),
    Replaced { prior: Credential, current: Credential },
}

impl UpsertOutcome {
    pub fn current(&self) -> &Credential {
        match self {
            UpsertOutcome::Created(current) | UpsertOutcome::Replaced { current, .. } => current,
        }
    }

    pub fn is_replaced(&self) -> bool {
        matches!(self, UpsertOutcome::Replaced { .. })
    }
}

/// 撤销结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revoked;

/// OAuth 握手 CSRF 状态，只保存令牌哈希
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OAuthState {
    pub token_hash: String,
    pub user_id: Uuid,
    pub provider: String,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// 发起握手的返回值；原始令牌只在此处出现一次
#[derive(Debug, Clone)]
pub struct HandshakeStart {
    pub state_token: Secret<String>,
    pub ttl: chrono::Duration,
    pub expires_at: DateTime<Utc>,
}

/// 原子消费结果
#[derive(Debug, Clone)]
pub enum ConsumeOutcome {
    /// 本次调用完成消费（是否过期由调用方判断）
    Consumed(OAuthState),
    AlreadyConsumed,
    NotFound,
}

/// 握手完成后绑定的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeBinding {
    pub user_id: Uuid,
    pub provider: String,
}
