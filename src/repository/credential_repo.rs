//! Credential repository (凭据与 OAuth 握手状态数据访问)

use super::{CredentialStore, OAuthStateStore};
use crate::{error::AppError, models::credential::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub struct PgCredentialRepository {
    db: PgPool,
}

impl PgCredentialRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialRepository {
    /// 以 (user_id, provider) 为键 upsert，刷新令牌时清空上次错误
    ///
    /// 先尝试插入；冲突时在同一事务内锁定已有行再更新，
    /// 因此并发的首次写入只有一个会得到 `Created`。
    async fn upsert(&self, credential: &Credential) -> Result<UpsertOutcome, AppError> {
        let mut tx = self.db.begin().await?;

        let created = sqlx::query_as::<_, Credential>(
            r#"
            INSERT INTO credentials (
                id, user_id, provider, access_token, refresh_token, expires_at,
                scopes, last_error, last_error_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, NULL, $8, $9)
            ON CONFLICT (user_id, provider) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(credential.id)
        .bind(credential.user_id)
        .bind(&credential.provider)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.scopes)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(created) = created {
            tx.commit().await?;
            return Ok(UpsertOutcome::Created(created));
        }

        let prior = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE user_id = $1 AND provider = $2 FOR UPDATE",
        )
        .bind(credential.user_id)
        .bind(&credential.provider)
        .fetch_one(&mut *tx)
        .await?;

        let current = sqlx::query_as::<_, Credential>(
            r#"
            UPDATE credentials SET
                access_token = $3,
                refresh_token = $4,
                expires_at = $5,
                scopes = $6,
                last_error = NULL,
                last_error_at = NULL,
                updated_at = $7
            WHERE user_id = $1 AND provider = $2
            RETURNING *
            "#,
        )
        .bind(credential.user_id)
        .bind(&credential.provider)
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.scopes)
        .bind(credential.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(UpsertOutcome::Replaced { prior, current })
    }

    async fn find(&self, user_id: Uuid, provider: &str) -> Result<Option<Credential>, AppError> {
        let credential = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE user_id = $1 AND provider = $2",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.db)
        .await?;

        Ok(credential)
    }

    async fn delete(&self, user_id: Uuid, provider: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM credentials WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_error(
        &self,
        user_id: Uuid,
        provider: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials
            SET last_error = $3, last_error_at = $4, updated_at = $4
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(message)
        .bind(at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl OAuthStateStore for PgCredentialRepository {
    async fn insert_state(&self, state: &OAuthState) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (token_hash, user_id, provider, expires_at, consumed_at, created_at)
            VALUES ($1, $2, $3, $4, NULL, $5)
            "#,
        )
        .bind(&state.token_hash)
        .bind(state.user_id)
        .bind(&state.provider)
        .bind(state.expires_at)
        .bind(state.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 条件 UPDATE 保证同一令牌只有一次消费成功
    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome, AppError> {
        let consumed = sqlx::query_as::<_, OAuthState>(
            r#"
            UPDATE oauth_states
            SET consumed_at = $2
            WHERE token_hash = $1 AND consumed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        if let Some(state) = consumed {
            return Ok(ConsumeOutcome::Consumed(state));
        }

        let exists: bool =
            sqlx::query("SELECT EXISTS(SELECT 1 FROM oauth_states WHERE token_hash = $1)")
                .bind(token_hash)
                .fetch_one(&self.db)
                .await?
                .get(0);

        Ok(if exists {
            ConsumeOutcome::AlreadyConsumed
        } else {
            ConsumeOutcome::NotFound
        })
    }

    async fn delete_stale_states(&self, now: DateTime<Utc>, limit: u32) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM oauth_states
            WHERE token_hash IN (
                SELECT token_hash FROM oauth_states
                WHERE expires_at < $1
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(now)
        .bind(i64::from(limit))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}
