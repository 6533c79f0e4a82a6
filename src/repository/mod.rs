//! Storage layer
//!
//! 每类持久化记录一个存储 trait；`postgres` 为生产实现，`memory` 用于测试与嵌入式场景。

pub mod audit_repo;
pub mod credential_repo;
pub mod memory;
pub mod principal_repo;
pub mod resource_repo;

pub use audit_repo::PgAuditRepository;
pub use credential_repo::PgCredentialRepository;
pub use memory::MemoryStore;
pub use principal_repo::PgPrincipalRepository;
pub use resource_repo::PgResourceRepository;

use crate::error::Result;
use crate::models::{
    audit::{AuditDraft, AuditEntry, AuditFilters},
    credential::{ConsumeOutcome, Credential, OAuthState, UpsertOutcome},
    principal::{Account, Membership},
    resource::Resource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// 账号、组织成员关系与功能覆盖
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn insert_account(&self, account: &Account) -> Result<()>;

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>>;

    async fn memberships(&self, user_id: Uuid) -> Result<Vec<Membership>>;

    /// 新增或更新某用户在某组织中的角色
    async fn upsert_membership(&self, user_id: Uuid, membership: &Membership) -> Result<()>;

    async fn remove_membership(&self, user_id: Uuid, org_id: Uuid) -> Result<bool>;

    async fn feature_overrides(&self, user_id: Uuid) -> Result<HashMap<String, bool>>;

    async fn set_feature_override(&self, user_id: Uuid, key: &str, enabled: bool) -> Result<()>;
}

/// 通用资源记录
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn insert(&self, resource: &Resource) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Resource>>;

    /// 只更新可变字段（payload、shared_with、retention_mode、updated_at），所有者不变
    async fn update(&self, resource: &Resource) -> Result<bool>;

    /// 删除资源及其子资源；不存在时返回 false
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// 删除至多 `limit` 条 `expires_at < now` 的记录，返回删除数
    async fn delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64>;
}

/// 只追加的审计日志
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// 追加条目，由存储分配序号并计算哈希链
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry>;

    /// 按序号升序读取
    async fn list(&self, filters: &AuditFilters, limit: i64, offset: i64) -> Result<Vec<AuditEntry>>;

    /// 保留策略清理：删除至多 `limit` 条早于 `cutoff` 的条目
    async fn purge_before(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<u64>;
}

/// 加密凭据
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 以 (user_id, provider) 为键的 upsert；已存在时保留 id 并返回替换前的记录
    async fn upsert(&self, credential: &Credential) -> Result<UpsertOutcome>;

    async fn find(&self, user_id: Uuid, provider: &str) -> Result<Option<Credential>>;

    async fn delete(&self, user_id: Uuid, provider: &str) -> Result<bool>;

    async fn set_error(
        &self,
        user_id: Uuid,
        provider: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// OAuth 握手状态
#[async_trait]
pub trait OAuthStateStore: Send + Sync {
    async fn insert_state(&self, state: &OAuthState) -> Result<()>;

    /// 查找并消费，二者原子完成
    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome>;

    /// 删除至多 `limit` 条已过期的状态；已消费但未过期的保留，重放仍返回 AlreadyConsumed
    async fn delete_stale_states(&self, now: DateTime<Utc>, limit: u32) -> Result<u64>;
}
