//! 凭据保险库
//!
//! OAuth 令牌以 AES-256-GCM 加密存储，只有所有者（或内部服务）可以读写。
//! 握手状态令牌只返回一次原文，存储层只保存其哈希，消费与查找原子完成。

use crate::{
    clock::Clock,
    crypto::{hash_token, random_token, TokenCipher},
    error::{AppError, Result},
    models::{
        credential::*,
        policy::Action,
        principal::Principal,
        resource::{ResourceAttrs, ResourceClass, ResourceRef},
    },
    redact::{default_redactor, MAX_MESSAGE_CHARS},
    repository::{CredentialStore, OAuthStateStore},
    services::{
        audit_recorder::{AuditEvent, AuditRecorder},
        policy_engine::PolicyEngine,
    },
};
use secrecy::Secret;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct CredentialVault {
    credentials: Arc<dyn CredentialStore>,
    states: Arc<dyn OAuthStateStore>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditRecorder>,
    cipher: TokenCipher,
    clock: Arc<dyn Clock>,
    state_ttl: chrono::Duration,
}

impl CredentialVault {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        states: Arc<dyn OAuthStateStore>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditRecorder>,
        cipher: TokenCipher,
        clock: Arc<dyn Clock>,
        state_ttl: chrono::Duration,
    ) -> Self {
        Self {
            credentials,
            states,
            policy,
            audit,
            cipher,
            clock,
            state_ttl,
        }
    }

    /// 保存（或替换）调用方在某 provider 下的凭据
    pub async fn store(&self, principal: &Principal, request: StoreCredential) -> Result<CredentialRef> {
        request.validate()?;
        let user_id = self.authorize(principal, Action::Write).await?;

        let access_token = self.cipher.encrypt(&request.access_token)?;
        let refresh_token = request
            .refresh_token
            .as_ref()
            .map(|token| self.cipher.encrypt(token))
            .transpose()?;

        let now = self.clock.now();
        let credential = Credential {
            id: Uuid::new_v4(),
            user_id,
            provider: request.provider,
            access_token,
            refresh_token,
            expires_at: request.expires_at,
            scopes: request.scopes,
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        };
        let outcome = self.credentials.upsert(&credential).await?;

        let event = match &outcome {
            UpsertOutcome::Replaced { prior, current } => AuditEvent::updated(
                ResourceClass::Credential,
                current.id,
                None,
                prior.redacted_snapshot(),
                current.redacted_snapshot(),
            ),
            UpsertOutcome::Created(current) => AuditEvent::created(
                ResourceClass::Credential,
                current.id,
                None,
                current.redacted_snapshot(),
            ),
        };
        self.audit.record(principal, event).await?;

        let stored = outcome.current();
        tracing::info!(
            user_id = %user_id,
            provider = %stored.provider,
            replaced = outcome.is_replaced(),
            "Credential stored"
        );
        Ok(stored.to_ref())
    }

    /// 读取并解密凭据
    pub async fn get(&self, principal: &Principal, provider: &str) -> Result<DecryptedCredential> {
        ProviderName::new(provider).validate()?;
        let user_id = self.authorize(principal, Action::Read).await?;

        let credential = self.find(user_id, provider).await?;
        let access_token = self.cipher.decrypt(&credential.access_token)?;
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .map(|token| self.cipher.decrypt(token))
            .transpose()?;

        Ok(DecryptedCredential {
            id: credential.id,
            user_id: credential.user_id,
            provider: credential.provider,
            access_token,
            refresh_token,
            expires_at: credential.expires_at,
            scopes: credential.scopes,
            last_error: credential.last_error,
            last_error_at: credential.last_error_at,
        })
    }

    /// 撤销凭据
    pub async fn revoke(&self, principal: &Principal, provider: &str) -> Result<Revoked> {
        ProviderName::new(provider).validate()?;
        let user_id = self.authorize(principal, Action::Delete).await?;

        let prior = self.find(user_id, provider).await?;
        if !self.credentials.delete(user_id, provider).await? {
            return Err(AppError::NotFound(format!("credential {}", provider)));
        }

        self.audit
            .record(
                principal,
                AuditEvent::deleted(
                    ResourceClass::Credential,
                    prior.id,
                    None,
                    prior.redacted_snapshot(),
                ),
            )
            .await?;

        tracing::info!(user_id = %user_id, provider = %provider, "Credential revoked");
        Ok(Revoked)
    }

    /// 记录刷新失败；信息脱敏并截断后保存
    pub async fn record_refresh_error(
        &self,
        principal: &Principal,
        provider: &str,
        message: &str,
    ) -> Result<()> {
        ProviderName::new(provider).validate()?;
        let user_id = self.authorize(principal, Action::Write).await?;

        let prior = self.find(user_id, provider).await?;
        let message = default_redactor().redact_and_truncate(message, MAX_MESSAGE_CHARS);
        let now = self.clock.now();

        if !self.credentials.set_error(user_id, provider, &message, now).await? {
            return Err(AppError::NotFound(format!("credential {}", provider)));
        }

        let mut updated = prior.clone();
        updated.last_error = Some(message.clone());
        updated.last_error_at = Some(now);
        updated.updated_at = now;

        self.audit
            .record(
                principal,
                AuditEvent::updated(
                    ResourceClass::Credential,
                    prior.id,
                    None,
                    prior.redacted_snapshot(),
                    updated.redacted_snapshot(),
                ),
            )
            .await?;

        tracing::warn!(
            user_id = %user_id,
            provider = %provider,
            error = %message,
            "Credential refresh failed"
        );
        Ok(())
    }

    /// 开始 OAuth 握手，返回一次性状态令牌
    pub async fn begin_handshake(&self, principal: &Principal, provider: &str) -> Result<HandshakeStart> {
        ProviderName::new(provider).validate()?;
        let user_id = self.authorize(principal, Action::Write).await?;

        let token = random_token();
        let now = self.clock.now();
        let expires_at = now + self.state_ttl;

        self.states
            .insert_state(&OAuthState {
                token_hash: hash_token(&token),
                user_id,
                provider: provider.to_string(),
                expires_at,
                consumed_at: None,
                created_at: now,
            })
            .await?;

        metrics::counter!("vault.handshakes", "outcome" => "begun").increment(1);
        tracing::info!(
            user_id = %user_id,
            provider = %provider,
            expires_at = %expires_at,
            "OAuth handshake started"
        );

        Ok(HandshakeStart {
            state_token: Secret::new(token),
            ttl: self.state_ttl,
            expires_at,
        })
    }

    /// 完成握手：令牌只能成功消费一次
    pub async fn complete_handshake(&self, state_token: &str) -> Result<HandshakeBinding> {
        let now = self.clock.now();
        let outcome = self.states.consume(&hash_token(state_token), now).await?;

        let (label, result) = match outcome {
            ConsumeOutcome::Consumed(state) if state.expires_at <= now => (
                "expired",
                Err(AppError::Expired("handshake state".to_string())),
            ),
            ConsumeOutcome::Consumed(state) => (
                "completed",
                Ok(HandshakeBinding {
                    user_id: state.user_id,
                    provider: state.provider,
                }),
            ),
            ConsumeOutcome::AlreadyConsumed => ("replayed", Err(AppError::AlreadyConsumed)),
            ConsumeOutcome::NotFound => (
                "unknown",
                Err(AppError::NotFound("handshake state".to_string())),
            ),
        };

        metrics::counter!("vault.handshakes", "outcome" => label).increment(1);
        match &result {
            Ok(binding) => tracing::info!(
                user_id = %binding.user_id,
                provider = %binding.provider,
                "OAuth handshake completed"
            ),
            Err(e) => tracing::warn!(outcome = label, error = %e, "OAuth handshake rejected"),
        }

        result
    }

    /// 凭据归属于调用方用户；匿名由策略拒绝，服务身份没有自己的凭据
    async fn authorize(&self, principal: &Principal, action: Action) -> Result<Uuid> {
        let attrs = ResourceAttrs::draft(ResourceClass::Credential, principal.user_id(), None);
        self.policy
            .require(principal, action, &ResourceRef::Loaded(attrs))
            .await?;

        principal
            .user_id()
            .ok_or_else(|| AppError::validation("credentials belong to a user principal"))
    }

    async fn find(&self, user_id: Uuid, provider: &str) -> Result<Credential> {
        self.credentials
            .find(user_id, provider)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("credential {}", provider)))
    }
}
