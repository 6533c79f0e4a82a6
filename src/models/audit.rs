//! Audit domain models

use super::resource::{ResourceAttrs, ResourceClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_operation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Create => "create",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
        }
    }
}

/// 待追加的审计事件（由存储分配序号与哈希）
#[derive(Debug, Clone, Serialize)]
pub struct AuditDraft {
    pub id: Uuid,
    /// 执行者主体标识（用户 UUID 或 service:<name>）
    pub actor: String,
    pub actor_id: Option<Uuid>,
    pub operation: AuditOperation,
    pub resource_class: ResourceClass,
    pub resource_id: Uuid,
    pub org_id: Option<Uuid>,
    pub prior_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditDraft {
    /// 校验快照形状：create 只有新状态，update 两者都有，delete 只有旧状态
    pub fn validate(&self) -> Result<(), String> {
        let ok = match self.operation {
            AuditOperation::Create => self.prior_state.is_none() && self.new_state.is_some(),
            AuditOperation::Update => self.prior_state.is_some() && self.new_state.is_some(),
            AuditOperation::Delete => self.prior_state.is_some() && self.new_state.is_none(),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "invalid snapshots for {} audit entry",
                self.operation.as_str()
            ))
        }
    }

    /// 绑定序号与前序哈希，生成最终条目
    pub fn seal(self, sequence: i64, previous_hash: Option<String>) -> AuditEntry {
        let entry_hash = compute_entry_hash(&self, sequence, previous_hash.as_deref());
        AuditEntry {
            id: self.id,
            sequence,
            actor: self.actor,
            actor_id: self.actor_id,
            operation: self.operation,
            resource_class: self.resource_class,
            resource_id: self.resource_id,
            org_id: self.org_id,
            prior_state: self.prior_state,
            new_state: self.new_state,
            occurred_at: self.occurred_at,
            previous_hash,
            entry_hash,
        }
    }
}

/// 审计条目（只追加）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub sequence: i64,
    pub actor: String,
    pub actor_id: Option<Uuid>,
    pub operation: AuditOperation,
    pub resource_class: ResourceClass,
    pub resource_id: Uuid,
    pub org_id: Option<Uuid>,
    pub prior_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditEntry {
    /// 读权限判定使用的属性：owner 即 actor，org 为资源所属组织
    pub fn attrs(&self) -> ResourceAttrs {
        ResourceAttrs {
            class: ResourceClass::AuditEntry,
            id: Some(self.id),
            owner_id: self.actor_id,
            org_id: self.org_id,
            shared_with: Vec::new(),
        }
    }

    /// 重新计算本条目的哈希
    pub fn recompute_hash(&self) -> String {
        let draft = AuditDraft {
            id: self.id,
            actor: self.actor.clone(),
            actor_id: self.actor_id,
            operation: self.operation,
            resource_class: self.resource_class,
            resource_id: self.resource_id,
            org_id: self.org_id,
            prior_state: self.prior_state.clone(),
            new_state: self.new_state.clone(),
            occurred_at: self.occurred_at,
        };
        compute_entry_hash(&draft, self.sequence, self.previous_hash.as_deref())
    }
}

/// SHA-256(规范化 JSON)，包含前序哈希形成链
pub fn compute_entry_hash(draft: &AuditDraft, sequence: i64, previous_hash: Option<&str>) -> String {
    let canonical = serde_json::json!({
        "previous_hash": previous_hash,
        "sequence": sequence,
        "id": draft.id,
        "actor": draft.actor,
        "actor_id": draft.actor_id,
        "operation": draft.operation.as_str(),
        "resource_class": draft.resource_class.as_str(),
        "resource_id": draft.resource_id,
        "org_id": draft.org_id,
        "prior_state": draft.prior_state,
        "new_state": draft.new_state,
        "occurred_at": draft.occurred_at.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// 审计查询条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilters {
    pub actor_id: Option<Uuid>,
    pub resource_class: Option<ResourceClass>,
    pub resource_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub operation: Option<AuditOperation>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AuditFilters {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor_id.map_or(true, |v| entry.actor_id == Some(v))
            && self.resource_class.map_or(true, |v| entry.resource_class == v)
            && self.resource_id.map_or(true, |v| entry.resource_id == v)
            && self.org_id.map_or(true, |v| entry.org_id == Some(v))
            && self.operation.map_or(true, |v| entry.operation == v)
            && self.start_time.map_or(true, |v| entry.occurred_at >= v)
            && self.end_time.map_or(true, |v| entry.occurred_at <= v)
    }
}

/// 链校验结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub total_entries: usize,
    pub verified_entries: usize,
    pub first_invalid_index: Option<usize>,
    pub error_message: Option<String>,
}
