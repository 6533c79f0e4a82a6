//! 内存存储
//!
//! 与 PostgreSQL 实现语义一致的确定性实现，用于测试和嵌入式场景。
//! 每条记录的读改写都在 DashMap 的分片锁内完成；审计追加由互斥锁串行化以维护哈希链。

use super::{AuditStore, CredentialStore, OAuthStateStore, PrincipalStore, ResourceStore};
use crate::error::{AppError, Result};
use crate::models::{
    audit::{AuditDraft, AuditEntry, AuditFilters},
    credential::{ConsumeOutcome, Credential, OAuthState, UpsertOutcome},
    principal::{Account, Membership},
    resource::Resource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct AuditLog {
    entries: Vec<AuditEntry>,
    last_sequence: i64,
    last_hash: Option<String>,
}

/// 内存存储，实现全部存储 trait
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<Uuid, Account>,
    memberships: DashMap<Uuid, Vec<Membership>>,
    overrides: DashMap<Uuid, HashMap<String, bool>>,
    resources: DashMap<Uuid, Resource>,
    audit: Mutex<AuditLog>,
    credentials: DashMap<(Uuid, String), Credential>,
    states: DashMap<String, OAuthState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前资源数量
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// 当前审计条目数量
    pub fn audit_len(&self) -> usize {
        self.audit.lock().map(|log| log.entries.len()).unwrap_or(0)
    }

    /// 直接改写一条审计记录（仅用于测试篡改检测）
    pub fn tamper_audit_entry(&self, sequence: i64, new_state: serde_json::Value) -> bool {
        let Ok(mut log) = self.audit.lock() else {
            return false;
        };
        match log.entries.iter_mut().find(|e| e.sequence == sequence) {
            Some(entry) => {
                entry.new_state = Some(new_state);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        match self.accounts.entry(account.id) {
            Entry::Occupied(_) => Err(AppError::validation("account already exists")),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                Ok(())
            }
        }
    }

    async fn find_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.accounts.get(&id).map(|a| a.clone()))
    }

    async fn memberships(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        Ok(self
            .memberships
            .get(&user_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn upsert_membership(&self, user_id: Uuid, membership: &Membership) -> Result<()> {
        let mut entry = self.memberships.entry(user_id).or_default();
        entry.retain(|m| m.org_id != membership.org_id);
        entry.push(membership.clone());
        Ok(())
    }

    async fn remove_membership(&self, user_id: Uuid, org_id: Uuid) -> Result<bool> {
        let Some(mut entry) = self.memberships.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = entry.len();
        entry.retain(|m| m.org_id != org_id);
        Ok(entry.len() != before)
    }

    async fn feature_overrides(&self, user_id: Uuid) -> Result<HashMap<String, bool>> {
        Ok(self
            .overrides
            .get(&user_id)
            .map(|o| o.clone())
            .unwrap_or_default())
    }

    async fn set_feature_override(&self, user_id: Uuid, key: &str, enabled: bool) -> Result<()> {
        self.overrides
            .entry(user_id)
            .or_default()
            .insert(key.to_string(), enabled);
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn insert(&self, resource: &Resource) -> Result<()> {
        match self.resources.entry(resource.id) {
            Entry::Occupied(_) => Err(AppError::validation("resource already exists")),
            Entry::Vacant(slot) => {
                slot.insert(resource.clone());
                Ok(())
            }
        }
    }

    async fn find(&self, id: Uuid) -> Result<Option<Resource>> {
        Ok(self.resources.get(&id).map(|r| r.clone()))
    }

    async fn update(&self, resource: &Resource) -> Result<bool> {
        let Some(mut stored) = self.resources.get_mut(&resource.id) else {
            return Ok(false);
        };
        stored.payload = resource.payload.clone();
        stored.shared_with = resource.shared_with.clone();
        stored.retention_mode = resource.retention_mode;
        stored.updated_at = resource.updated_at;
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = self.resources.remove(&id).is_some();
        if removed {
            let children: Vec<Uuid> = self
                .resources
                .iter()
                .filter(|r| r.parent_id == Some(id))
                .map(|r| r.id)
                .collect();
            for child in children {
                self.resources.remove(&child);
            }
        }
        Ok(removed)
    }

    async fn delete_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<u64> {
        let expired: Vec<Uuid> = self
            .resources
            .iter()
            .filter(|r| r.expires_at.is_some_and(|at| at < now))
            .map(|r| r.id)
            .collect();

        // 被并发清理抢先删除的行跳过，继续向后取，直到本批删满 `limit` 条
        let mut deleted = 0;
        for id in expired {
            if deleted >= u64::from(limit) {
                break;
            }
            if self
                .resources
                .remove_if(&id, |_, r| r.expires_at.is_some_and(|at| at < now))
                .is_some()
            {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, draft: AuditDraft) -> Result<AuditEntry> {
        let mut log = self
            .audit
            .lock()
            .map_err(|_| AppError::Internal("audit lock poisoned".to_string()))?;

        let sequence = log.last_sequence + 1;
        let entry = draft.seal(sequence, log.last_hash.clone());
        log.last_sequence = sequence;
        log.last_hash = Some(entry.entry_hash.clone());
        log.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list(&self, filters: &AuditFilters, limit: i64, offset: i64) -> Result<Vec<AuditEntry>> {
        let log = self
            .audit
            .lock()
            .map_err(|_| AppError::Internal("audit lock poisoned".to_string()))?;

        Ok(log
            .entries
            .iter()
            .filter(|e| filters.matches(e))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>, limit: u32) -> Result<u64> {
        let mut log = self
            .audit
            .lock()
            .map_err(|_| AppError::Internal("audit lock poisoned".to_string()))?;

        // 条目按序号追加，时间单调，只需从头部截断
        let count = log
            .entries
            .iter()
            .take(limit as usize)
            .take_while(|e| e.occurred_at < cutoff)
            .count();
        log.entries.drain(..count);
        Ok(count as u64)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn upsert(&self, credential: &Credential) -> Result<UpsertOutcome> {
        let key = (credential.user_id, credential.provider.clone());
        match self.credentials.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(credential.clone());
                Ok(UpsertOutcome::Created(credential.clone()))
            }
            // 已存在时保留 id 与创建时间
            Entry::Occupied(mut slot) => {
                let prior = slot.get().clone();
                let stored = slot.get_mut();
                stored.access_token = credential.access_token.clone();
                stored.refresh_token = credential.refresh_token.clone();
                stored.expires_at = credential.expires_at;
                stored.scopes = credential.scopes.clone();
                stored.last_error = None;
                stored.last_error_at = None;
                stored.updated_at = credential.updated_at;
                Ok(UpsertOutcome::Replaced {
                    prior,
                    current: stored.clone(),
                })
            }
        }
    }

    async fn find(&self, user_id: Uuid, provider: &str) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .get(&(user_id, provider.to_string()))
            .map(|c| c.clone()))
    }

    async fn delete(&self, user_id: Uuid, provider: &str) -> Result<bool> {
        Ok(self
            .credentials
            .remove(&(user_id, provider.to_string()))
            .is_some())
    }

    async fn set_error(
        &self,
        user_id: Uuid,
        provider: &str,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut stored) = self.credentials.get_mut(&(user_id, provider.to_string())) else {
            return Ok(false);
        };
        stored.last_error = Some(message.to_string());
        stored.last_error_at = Some(at);
        stored.updated_at = at;
        Ok(true)
    }
}

#[async_trait]
impl OAuthStateStore for MemoryStore {
    async fn insert_state(&self, state: &OAuthState) -> Result<()> {
        self.states.insert(state.token_hash.clone(), state.clone());
        Ok(())
    }

    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let Some(mut state) = self.states.get_mut(token_hash) else {
            return Ok(ConsumeOutcome::NotFound);
        };
        if state.consumed_at.is_some() {
            return Ok(ConsumeOutcome::AlreadyConsumed);
        }
        state.consumed_at = Some(now);
        Ok(ConsumeOutcome::Consumed(state.clone()))
    }

    async fn delete_stale_states(&self, now: DateTime<Utc>, limit: u32) -> Result<u64> {
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|s| s.expires_at < now)
            .map(|s| s.token_hash.clone())
            .take(limit as usize)
            .collect();

        let mut deleted = 0;
        for hash in stale {
            if self.states.remove(&hash).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
