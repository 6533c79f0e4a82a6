//! 数据访问服务
//!
//! 所有资源读写的入口：授权 → 变更 → 审计。每个被允许的变更恰好产生一条审计条目，
//! 被拒绝的请求和被丢弃的子资源不产生审计。

use crate::{
    clock::Clock,
    error::{AppError, Result},
    models::{
        policy::Action,
        principal::Principal,
        resource::*,
        retention::{Expiry, RetentionMode},
    },
    repository::ResourceStore,
    services::{
        audit_recorder::{AuditEvent, AuditRecorder},
        policy_engine::PolicyEngine,
        retention_scheduler::RetentionScheduler,
    },
};
use std::sync::Arc;
use uuid::Uuid;

/// 子资源写入结果
#[derive(Debug, Clone)]
pub enum ChildOutcome {
    Stored(Resource),
    /// 父资源为 immediate_discard，未持久化
    Discarded,
}

impl ChildOutcome {
    pub fn is_discarded(&self) -> bool {
        matches!(self, ChildOutcome::Discarded)
    }
}

pub struct DataAccessService {
    resources: Arc<dyn ResourceStore>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditRecorder>,
    retention: Arc<RetentionScheduler>,
    clock: Arc<dyn Clock>,
}

impl DataAccessService {
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditRecorder>,
        retention: Arc<RetentionScheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resources,
            policy,
            audit,
            retention,
            clock,
        }
    }

    /// 创建资源，所有者为调用方
    pub async fn create(&self, principal: &Principal, request: NewResource) -> Result<Resource> {
        if !request.class.is_generic() {
            return Err(AppError::Validation(format!(
                "{} records are not managed as generic resources",
                request.class
            )));
        }
        if ResourceClass::ALL
            .iter()
            .any(|c| c.child_class() == Some(request.class))
        {
            return Err(AppError::Validation(format!(
                "{} must be added through its parent",
                request.class
            )));
        }
        if request.retention_mode.is_some() && !request.class.is_retention_parent() {
            return Err(AppError::Validation(format!(
                "{} does not carry a retention mode",
                request.class
            )));
        }

        let mut attrs = ResourceAttrs::draft(request.class, principal.user_id(), request.org_id);
        attrs.shared_with = request.shared_with.clone();
        self.policy
            .require(principal, Action::Write, &ResourceRef::Draft(attrs))
            .await?;

        let now = self.clock.now();
        let resource = Resource {
            id: Uuid::new_v4(),
            class: request.class,
            owner_id: principal.user_id(),
            org_id: request.org_id,
            parent_id: None,
            shared_with: dedup(request.shared_with),
            payload: request.payload,
            retention_mode: request.retention_mode,
            expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.resources.insert(&resource).await?;

        self.audit
            .record(
                principal,
                AuditEvent::created(resource.class, resource.id, resource.org_id, resource.snapshot()),
            )
            .await?;

        tracing::info!(
            principal = %principal.subject(),
            class = %resource.class,
            resource_id = %resource.id,
            "Resource created"
        );
        Ok(resource)
    }

    pub async fn read(&self, principal: &Principal, class: ResourceClass, id: Uuid) -> Result<Resource> {
        let resource = self.load(class, id).await?;
        self.policy
            .require(principal, Action::Read, &ResourceRef::Loaded(resource.attrs()))
            .await?;
        Ok(resource)
    }

    /// 替换负载，所有者不变
    pub async fn update_payload(
        &self,
        principal: &Principal,
        class: ResourceClass,
        id: Uuid,
        payload: serde_json::Value,
    ) -> Result<Resource> {
        self.modify(principal, class, id, |resource| {
            resource.payload = payload;
            Ok(())
        })
        .await
    }

    /// 设置共享用户列表（覆盖）
    pub async fn share_with(
        &self,
        principal: &Principal,
        class: ResourceClass,
        id: Uuid,
        user_ids: Vec<Uuid>,
    ) -> Result<Resource> {
        self.modify(principal, class, id, |resource| {
            resource.shared_with = dedup(user_ids);
            Ok(())
        })
        .await
    }

    /// 修改会话的保留模式；已有子资源的过期时间不变
    pub async fn set_retention_mode(
        &self,
        principal: &Principal,
        id: Uuid,
        mode: RetentionMode,
    ) -> Result<Resource> {
        self.modify(principal, ResourceClass::Conversation, id, |resource| {
            resource.retention_mode = Some(mode);
            Ok(())
        })
        .await
    }

    /// 删除资源（子资源随之删除）
    pub async fn delete(&self, principal: &Principal, class: ResourceClass, id: Uuid) -> Result<()> {
        let resource = self.load(class, id).await?;
        self.policy
            .require(principal, Action::Delete, &ResourceRef::Loaded(resource.attrs()))
            .await?;

        if !self.resources.delete(id).await? {
            return Err(AppError::NotFound(format!("{} {}", class, id)));
        }

        self.audit
            .record(
                principal,
                AuditEvent::deleted(class, id, resource.org_id, resource.snapshot()),
            )
            .await?;

        tracing::info!(
            principal = %principal.subject(),
            class = %class,
            resource_id = %id,
            "Resource deleted"
        );
        Ok(())
    }

    /// 在父资源下写入子资源（会话下的消息），过期时间按父资源当前保留模式计算
    pub async fn add_child(
        &self,
        principal: &Principal,
        parent_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<ChildOutcome> {
        let parent = self.load(ResourceClass::Conversation, parent_id).await?;
        self.policy
            .require(principal, Action::Write, &ResourceRef::Loaded(parent.attrs()))
            .await?;

        let child_class = parent
            .class
            .child_class()
            .ok_or_else(|| AppError::Internal(format!("{} has no child class", parent.class)))?;

        let expires_at = match self.retention.compute_expiry(&parent) {
            Expiry::Discard => {
                tracing::debug!(parent_id = %parent_id, "Child discarded by retention mode");
                return Ok(ChildOutcome::Discarded);
            }
            expiry => expiry.expires_at(),
        };

        let now = self.clock.now();
        let child = Resource {
            id: Uuid::new_v4(),
            class: child_class,
            owner_id: parent.owner_id,
            org_id: parent.org_id,
            parent_id: Some(parent.id),
            shared_with: parent.shared_with.clone(),
            payload,
            retention_mode: None,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        self.resources.insert(&child).await?;

        self.audit
            .record(
                principal,
                AuditEvent::created(child.class, child.id, child.org_id, child.snapshot()),
            )
            .await?;

        tracing::debug!(
            parent_id = %parent_id,
            child_id = %child.id,
            expires_at = ?child.expires_at,
            "Child resource stored"
        );
        Ok(ChildOutcome::Stored(child))
    }

    async fn load(&self, class: ResourceClass, id: Uuid) -> Result<Resource> {
        self.resources
            .find(id)
            .await?
            .filter(|r| r.class == class)
            .ok_or_else(|| AppError::NotFound(format!("{} {}", class, id)))
    }

    async fn modify<F>(
        &self,
        principal: &Principal,
        class: ResourceClass,
        id: Uuid,
        apply: F,
    ) -> Result<Resource>
    where
        F: FnOnce(&mut Resource) -> Result<()>,
    {
        let prior = self.load(class, id).await?;
        self.policy
            .require(principal, Action::Write, &ResourceRef::Loaded(prior.attrs()))
            .await?;

        let mut updated = prior.clone();
        apply(&mut updated)?;
        updated.updated_at = self.clock.now();

        if !self.resources.update(&updated).await? {
            return Err(AppError::NotFound(format!("{} {}", class, id)));
        }

        self.audit
            .record(
                principal,
                AuditEvent::updated(class, id, updated.org_id, prior.snapshot(), updated.snapshot()),
            )
            .await?;

        tracing::info!(
            principal = %principal.subject(),
            class = %class,
            resource_id = %id,
            "Resource updated"
        );
        Ok(updated)
    }
}

fn dedup(mut ids: Vec<Uuid>) -> Vec<Uuid> {
    ids.sort();
    ids.dedup();
    ids
}
