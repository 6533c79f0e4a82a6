//! Principal repository (账号与组织成员数据访问)

use super::PrincipalStore;
use crate::{error::AppError, models::principal::*};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

pub struct PgPrincipalRepository {
    db: PgPool,
}

impl PgPrincipalRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PrincipalStore for PgPrincipalRepository {
    // ==================== Accounts ====================

    async fn insert_account(&self, account: &Account) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, account_type, tier, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account.id)
        .bind(&account.account_type)
        .bind(&account.tier)
        .bind(account.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, AppError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(account)
    }

    // ==================== Memberships ====================

    async fn memberships(&self, user_id: Uuid) -> Result<Vec<Membership>, AppError> {
        let memberships = sqlx::query_as::<_, Membership>(
            "SELECT org_id, role FROM org_memberships WHERE user_id = $1 ORDER BY org_id",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(memberships)
    }

    async fn upsert_membership(
        &self,
        user_id: Uuid,
        membership: &Membership,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO org_memberships (user_id, org_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, org_id) DO UPDATE SET role = EXCLUDED.role
            "#,
        )
        .bind(user_id)
        .bind(membership.org_id)
        .bind(membership.role)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn remove_membership(&self, user_id: Uuid, org_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM org_memberships WHERE user_id = $1 AND org_id = $2")
            .bind(user_id)
            .bind(org_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Feature overrides ====================

    async fn feature_overrides(&self, user_id: Uuid) -> Result<HashMap<String, bool>, AppError> {
        let rows = sqlx::query("SELECT feature_key, enabled FROM feature_overrides WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.db)
            .await?;

        let mut overrides = HashMap::with_capacity(rows.len());
        for row in rows {
            overrides.insert(row.try_get("feature_key")?, row.try_get("enabled")?);
        }

        Ok(overrides)
    }

    async fn set_feature_override(
        &self,
        user_id: Uuid,
        key: &str,
        enabled: bool,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO feature_overrides (user_id, feature_key, enabled, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, feature_key)
            DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(key)
        .bind(enabled)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
