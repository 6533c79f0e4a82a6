//! 审计记录服务
//!
//! 变更提交后追加一条哈希链审计条目。追加只在存储层重试，业务变更不会重做。

use crate::{
    clock::Clock,
    error::{AppError, Result},
    models::{
        audit::*,
        policy::Action,
        principal::Principal,
        resource::{ResourceAttrs, ResourceClass, ResourceRef},
    },
    repository::AuditStore,
    retry::RetryPolicy,
    services::policy_engine::PolicyEngine,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// 校验读取时的分页大小
const VERIFY_PAGE_SIZE: i64 = 1000;

/// 一次已提交的变更
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub operation: AuditOperation,
    pub resource_class: ResourceClass,
    pub resource_id: Uuid,
    pub org_id: Option<Uuid>,
    pub prior_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn created(
        class: ResourceClass,
        id: Uuid,
        org_id: Option<Uuid>,
        new_state: serde_json::Value,
    ) -> Self {
        Self {
            operation: AuditOperation::Create,
            resource_class: class,
            resource_id: id,
            org_id,
            prior_state: None,
            new_state: Some(new_state),
        }
    }

    pub fn updated(
        class: ResourceClass,
        id: Uuid,
        org_id: Option<Uuid>,
        prior_state: serde_json::Value,
        new_state: serde_json::Value,
    ) -> Self {
        Self {
            operation: AuditOperation::Update,
            resource_class: class,
            resource_id: id,
            org_id,
            prior_state: Some(prior_state),
            new_state: Some(new_state),
        }
    }

    pub fn deleted(
        class: ResourceClass,
        id: Uuid,
        org_id: Option<Uuid>,
        prior_state: serde_json::Value,
    ) -> Self {
        Self {
            operation: AuditOperation::Delete,
            resource_class: class,
            resource_id: id,
            org_id,
            prior_state: Some(prior_state),
            new_state: None,
        }
    }
}

pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    policy: Arc<PolicyEngine>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl AuditRecorder {
    pub fn new(
        store: Arc<dyn AuditStore>,
        policy: Arc<PolicyEngine>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            retry,
        }
    }

    /// 追加审计条目
    pub async fn record(&self, actor: &Principal, event: AuditEvent) -> Result<AuditEntry> {
        let draft = AuditDraft {
            id: Uuid::new_v4(),
            actor: actor.subject(),
            actor_id: actor.user_id(),
            operation: event.operation,
            resource_class: event.resource_class,
            resource_id: event.resource_id,
            org_id: event.org_id,
            prior_state: event.prior_state,
            new_state: event.new_state,
            occurred_at: self.clock.now(),
        };
        draft.validate().map_err(AppError::Validation)?;

        let store = &self.store;
        let entry = self
            .retry
            .run("audit.append", move || {
                let draft = draft.clone();
                async move { store.append(draft).await }
            })
            .await?;

        metrics::counter!("audit.entries", "operation" => entry.operation.as_str()).increment(1);
        tracing::info!(
            actor = %entry.actor,
            operation = entry.operation.as_str(),
            resource_class = %entry.resource_class,
            resource_id = %entry.resource_id,
            sequence = entry.sequence,
            "Audit entry recorded"
        );

        Ok(entry)
    }

    /// 查询审计条目，只返回调用方有权读取的条目（本人操作或所在组织的管理员）
    ///
    /// 分页作用于过滤之前，一页可能少于 `limit` 条。
    pub async fn list(
        &self,
        principal: &Principal,
        filters: &AuditFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>> {
        let entries = self.store.list(filters, limit, offset).await?;
        let total = entries.len();

        let visible: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| self.policy.is_permitted(principal, Action::Read, &e.attrs()))
            .collect();

        if visible.len() < total {
            tracing::debug!(
                principal = %principal.subject(),
                hidden = total - visible.len(),
                "Audit entries filtered by policy"
            );
        }

        Ok(visible)
    }

    /// 校验一段连续条目的哈希与链接
    ///
    /// 第一条的 previous_hash 不做要求（更早的条目可能已被保留策略清理）。
    pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
        let total = entries.len();
        let invalid = |index: usize, message: String| ChainVerification {
            valid: false,
            total_entries: total,
            verified_entries: index,
            first_invalid_index: Some(index),
            error_message: Some(message),
        };

        for (index, entry) in entries.iter().enumerate() {
            if entry.recompute_hash() != entry.entry_hash {
                return invalid(
                    index,
                    format!("entry {} hash mismatch", entry.sequence),
                );
            }

            if index > 0 {
                let previous = &entries[index - 1];
                if entry.sequence != previous.sequence + 1 {
                    return invalid(
                        index,
                        format!(
                            "sequence gap between {} and {}",
                            previous.sequence, entry.sequence
                        ),
                    );
                }
                if entry.previous_hash.as_deref() != Some(previous.entry_hash.as_str()) {
                    return invalid(
                        index,
                        format!("entry {} is not linked to its predecessor", entry.sequence),
                    );
                }
            }
        }

        ChainVerification {
            valid: true,
            total_entries: total,
            verified_entries: total,
            first_invalid_index: None,
            error_message: None,
        }
    }

    /// 读出整条日志并校验（仅服务身份）
    pub async fn verify_log(&self, principal: &Principal) -> Result<ChainVerification> {
        self.require_service(principal, Action::Read).await?;

        let filters = AuditFilters::default();
        let mut entries = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.store.list(&filters, VERIFY_PAGE_SIZE, offset).await?;
            let fetched = page.len() as i64;
            entries.extend(page);
            if fetched < VERIFY_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        let result = Self::verify_chain(&entries);
        if result.valid {
            tracing::info!(entries = result.total_entries, "Audit chain verified");
        } else {
            tracing::error!(
                index = ?result.first_invalid_index,
                error = ?result.error_message,
                "Audit chain verification failed"
            );
        }
        Ok(result)
    }

    /// 保留策略清理：删除早于 `cutoff` 的条目（仅服务身份）
    pub async fn purge_before(
        &self,
        principal: &Principal,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64> {
        self.require_service(principal, Action::Delete).await?;

        let store = &self.store;
        let purged = self
            .retry
            .run("audit.purge", move || async move {
                store.purge_before(cutoff, limit).await
            })
            .await?;

        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff, "Audit entries purged");
        }
        Ok(purged)
    }

    async fn require_service(&self, principal: &Principal, action: Action) -> Result<()> {
        let attrs = ResourceAttrs::draft(ResourceClass::AuditEntry, None, None);
        self.policy
            .require(principal, action, &ResourceRef::Loaded(attrs))
            .await?;
        Ok(())
    }
}
