//! Resource repository (资源数据访问)

use super::ResourceStore;
use crate::{error::AppError, models::resource::Resource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgResourceRepository {
    db: PgPool,
}

impl PgResourceRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ResourceStore for PgResourceRepository {
    async fn insert(&self, resource: &Resource) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO resources (
                id, class, owner_id, org_id, parent_id, shared_with, payload,
                retention_mode, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(resource.id)
        .bind(resource.class)
        .bind(resource.owner_id)
        .bind(resource.org_id)
        .bind(resource.parent_id)
        .bind(&resource.shared_with)
        .bind(&resource.payload)
        .bind(resource.retention_mode)
        .bind(resource.expires_at)
        .bind(resource.created_at)
        .bind(resource.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Resource>, AppError> {
        let resource = sqlx::query_as::<_, Resource>("SELECT * FROM resources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(resource)
    }

    /// owner_id / class / parent_id / expires_at 不在可更新列中
    async fn update(&self, resource: &Resource) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE resources
            SET
                payload = $2,
                shared_with = $3,
                retention_mode = $4,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(resource.id)
        .bind(&resource.payload)
        .bind(&resource.shared_with)
        .bind(resource.retention_mode)
        .bind(resource.updated_at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 子资源由外键 ON DELETE CASCADE 一并删除
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 有界批量删除；SKIP LOCKED 让并发清理互不阻塞
    async fn delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM resources
            WHERE id IN (
                SELECT id FROM resources
                WHERE expires_at IS NOT NULL AND expires_at < $1
                ORDER BY expires_at
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
