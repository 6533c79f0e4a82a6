//! Audit repository (审计数据访问)

use super::AuditStore;
use crate::{error::AppError, models::audit::*};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

pub struct PgAuditRepository {
    db: PgPool,
}

impl PgAuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditStore for PgAuditRepository {
    /// 追加审计条目
    ///
    /// 链头行 `FOR UPDATE` 串行化所有追加，序号与前序哈希在同一事务内确定。
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry, AppError> {
        let mut tx = self.db.begin().await?;

        let head = sqlx::query(
            "SELECT last_sequence, last_hash FROM audit_chain_head WHERE id = TRUE FOR UPDATE",
        )
        .fetch_one(&mut *tx)
        .await?;
        let last_sequence: i64 = head.try_get("last_sequence")?;
        let last_hash: Option<String> = head.try_get("last_hash")?;

        let entry = draft.seal(last_sequence + 1, last_hash);

        sqlx::query(
            r#"
            INSERT INTO audit_entries (
                id, sequence, actor, actor_id, operation, resource_class, resource_id,
                org_id, prior_state, new_state, occurred_at, previous_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id)
        .bind(entry.sequence)
        .bind(&entry.actor)
        .bind(entry.actor_id)
        .bind(entry.operation)
        .bind(entry.resource_class)
        .bind(entry.resource_id)
        .bind(entry.org_id)
        .bind(&entry.prior_state)
        .bind(&entry.new_state)
        .bind(entry.occurred_at)
        .bind(&entry.previous_hash)
        .bind(&entry.entry_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE audit_chain_head SET last_sequence = $1, last_hash = $2 WHERE id = TRUE",
        )
        .bind(entry.sequence)
        .bind(&entry.entry_hash)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(entry)
    }

    /// 查询审计条目（按序号升序）
    async fn list(
        &self,
        filters: &AuditFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>, AppError> {
        let mut query = String::from("SELECT * FROM audit_entries WHERE 1=1");
        let mut index = 0;

        if filters.actor_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND actor_id = ${}", index));
        }
        if filters.resource_class.is_some() {
            index += 1;
            query.push_str(&format!(" AND resource_class = ${}", index));
        }
        if filters.resource_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND resource_id = ${}", index));
        }
        if filters.org_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND org_id = ${}", index));
        }
        if filters.operation.is_some() {
            index += 1;
            query.push_str(&format!(" AND operation = ${}", index));
        }
        if filters.start_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND occurred_at >= ${}", index));
        }
        if filters.end_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND occurred_at <= ${}", index));
        }

        query.push_str(&format!(
            " ORDER BY sequence ASC LIMIT ${} OFFSET ${}",
            index + 1,
            index + 2
        ));

        let mut query_builder = sqlx::query_as::<_, AuditEntry>(&query);

        if let Some(actor_id) = filters.actor_id {
            query_builder = query_builder.bind(actor_id);
        }
        if let Some(resource_class) = filters.resource_class {
            query_builder = query_builder.bind(resource_class);
        }
        if let Some(resource_id) = filters.resource_id {
            query_builder = query_builder.bind(resource_id);
        }
        if let Some(org_id) = filters.org_id {
            query_builder = query_builder.bind(org_id);
        }
        if let Some(operation) = filters.operation {
            query_builder = query_builder.bind(operation);
        }
        if let Some(start_time) = filters.start_time {
            query_builder = query_builder.bind(start_time);
        }
        if let Some(end_time) = filters.end_time {
            query_builder = query_builder.bind(end_time);
        }

        let entries = query_builder
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        Ok(entries)
    }

    /// 保留策略清理（链头不变，剩余条目仍可校验）
    async fn purge_before(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_entries
            WHERE id IN (
                SELECT id FROM audit_entries
                WHERE occurred_at < $1
                ORDER BY sequence
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(cutoff)
        .bind(i64::from(limit))
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected())
    }
}
