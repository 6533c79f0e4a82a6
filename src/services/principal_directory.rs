//! 身份目录
//!
//! 把调用方 ID 解析为 Principal（账号类型、档位、组织成员关系、功能覆盖），
//! 并管理组织成员关系。服务身份只由进程内代码构造。

use crate::{
    clock::Clock,
    error::{AppError, Result},
    models::{
        policy::{Action, DenyReason},
        principal::*,
        resource::{ResourceAttrs, ResourceClass, ResourceRef},
    },
    repository::PrincipalStore,
    services::{
        audit_recorder::{AuditEvent, AuditRecorder},
        policy_engine::PolicyEngine,
    },
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub struct PrincipalDirectory {
    store: Arc<dyn PrincipalStore>,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditRecorder>,
    clock: Arc<dyn Clock>,
}

impl PrincipalDirectory {
    pub fn new(
        store: Arc<dyn PrincipalStore>,
        policy: Arc<PolicyEngine>,
        audit: Arc<AuditRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policy,
            audit,
            clock,
        }
    }

    /// 解析调用方身份；未认证调用方为 Anonymous
    pub async fn resolve(&self, caller: Option<Uuid>) -> Result<Principal> {
        let Some(user_id) = caller else {
            return Ok(Principal::Anonymous);
        };

        let account = self
            .store
            .find_account(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", user_id)))?;

        let memberships = self.store.memberships(user_id).await?;
        let feature_overrides = self.store.feature_overrides(user_id).await?;

        Ok(Principal::User(UserPrincipal {
            id: account.id,
            account_type: account.account_type,
            tier: account.tier,
            memberships,
            feature_overrides,
        }))
    }

    /// 开户（仅服务身份）
    pub async fn provision(
        &self,
        actor: &Principal,
        account_type: &str,
        tier: Option<&str>,
    ) -> Result<Account> {
        require_service(actor)?;
        let request = ProvisionAccount::new(account_type, tier);
        request.validate()?;

        let account = Account {
            id: Uuid::new_v4(),
            account_type: request.account_type,
            tier: request.tier,
            created_at: self.clock.now(),
        };
        self.store.insert_account(&account).await?;

        tracing::info!(
            account_id = %account.id,
            account_type = %account.account_type,
            tier = ?account.tier,
            "Account provisioned"
        );
        Ok(account)
    }

    /// 授予或变更组织角色（组织管理员/所有者或服务身份）
    ///
    /// 用户不能授予高于自身的角色。
    pub async fn grant_membership(
        &self,
        actor: &Principal,
        org_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<Membership> {
        self.policy
            .require(actor, Action::Write, &membership_ref(org_id, user_id))
            .await?;

        if let Some(granter) = actor.as_user() {
            if granter.role_in(org_id).is_some_and(|own| role > own) {
                tracing::warn!(
                    actor = %granter.id,
                    org_id = %org_id,
                    role = role.as_str(),
                    "Role escalation rejected"
                );
                return Err(AppError::Denied(DenyReason::NoMatchingRule));
            }
        }

        if self.store.find_account(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("account {}", user_id)));
        }

        let prior = self
            .store
            .memberships(user_id)
            .await?
            .into_iter()
            .find(|m| m.org_id == org_id);

        let membership = Membership { org_id, role };
        self.store.upsert_membership(user_id, &membership).await?;

        let new_state = membership_snapshot(user_id, &membership);
        let event = match &prior {
            Some(prior) => AuditEvent::updated(
                ResourceClass::Membership,
                user_id,
                Some(org_id),
                membership_snapshot(user_id, prior),
                new_state,
            ),
            None => AuditEvent::created(ResourceClass::Membership, user_id, Some(org_id), new_state),
        };
        self.audit.record(actor, event).await?;

        tracing::info!(
            org_id = %org_id,
            user_id = %user_id,
            role = role.as_str(),
            "Membership granted"
        );
        Ok(membership)
    }

    /// 移除组织成员
    pub async fn revoke_membership(&self, actor: &Principal, org_id: Uuid, user_id: Uuid) -> Result<()> {
        self.policy
            .require(actor, Action::Delete, &membership_ref(org_id, user_id))
            .await?;

        let prior = self
            .store
            .memberships(user_id)
            .await?
            .into_iter()
            .find(|m| m.org_id == org_id)
            .ok_or_else(|| AppError::NotFound(format!("membership {} in {}", user_id, org_id)))?;

        if !self.store.remove_membership(user_id, org_id).await? {
            return Err(AppError::NotFound(format!(
                "membership {} in {}",
                user_id, org_id
            )));
        }

        self.audit
            .record(
                actor,
                AuditEvent::deleted(
                    ResourceClass::Membership,
                    user_id,
                    Some(org_id),
                    membership_snapshot(user_id, &prior),
                ),
            )
            .await?;

        tracing::info!(org_id = %org_id, user_id = %user_id, "Membership revoked");
        Ok(())
    }

    /// 设置个人功能覆盖（仅服务身份）
    pub async fn set_feature_override(
        &self,
        actor: &Principal,
        user_id: Uuid,
        key: &str,
        enabled: bool,
    ) -> Result<()> {
        require_service(actor)?;
        let request = FeatureOverride::new(user_id, key, enabled);
        request.validate()?;
        if self.store.find_account(user_id).await?.is_none() {
            return Err(AppError::NotFound(format!("account {}", user_id)));
        }

        self.store
            .set_feature_override(user_id, &request.key, request.enabled)
            .await?;

        tracing::info!(user_id = %user_id, key = %request.key, enabled, "Feature override set");
        Ok(())
    }
}

fn require_service(actor: &Principal) -> Result<()> {
    if actor.is_service() {
        Ok(())
    } else {
        tracing::warn!(actor = %actor.subject(), "Service-only operation denied");
        Err(AppError::Denied(DenyReason::NoMatchingRule))
    }
}

fn membership_ref(org_id: Uuid, user_id: Uuid) -> ResourceRef {
    ResourceRef::Loaded(ResourceAttrs {
        class: ResourceClass::Membership,
        id: None,
        owner_id: Some(user_id),
        org_id: Some(org_id),
        shared_with: Vec::new(),
    })
}

fn membership_snapshot(user_id: Uuid, membership: &Membership) -> serde_json::Value {
    serde_json::json!({
        "user_id": user_id,
        "org_id": membership.org_id,
        "role": membership.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::policy::RuleSet;
    use crate::repository::MemoryStore;
    use crate::retry::RetryPolicy;

    fn directory(store: Arc<MemoryStore>) -> PrincipalDirectory {
        let policy = Arc::new(PolicyEngine::new(RuleSet::builtin(), store.clone()));
        let audit = Arc::new(AuditRecorder::new(
            store.clone(),
            policy.clone(),
            Arc::new(SystemClock),
            RetryPolicy::none(),
        ));
        PrincipalDirectory::new(store, policy, audit, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_resolve_anonymous_and_unknown() {
        let directory = directory(Arc::new(MemoryStore::new()));
        assert!(directory.resolve(None).await.unwrap().is_anonymous());
        assert!(matches!(
            directory.resolve(Some(Uuid::new_v4())).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_provision_requires_service() {
        let directory = directory(Arc::new(MemoryStore::new()));
        let user = Principal::User(UserPrincipal::new(Uuid::new_v4(), "standard"));

        assert!(matches!(
            directory.provision(&user, "standard", None).await,
            Err(AppError::Denied(_))
        ));

        let service = Principal::service("onboarding");
        let account = directory
            .provision(&service, "vaultchat_only", Some("free"))
            .await
            .unwrap();
        let resolved = directory.resolve(Some(account.id)).await.unwrap();
        let resolved = resolved.as_user().unwrap();
        assert_eq!(resolved.account_type, "vaultchat_only");
        assert_eq!(resolved.tier.as_deref(), Some("free"));
    }

    #[tokio::test]
    async fn test_admin_cannot_grant_owner() {
        let store = Arc::new(MemoryStore::new());
        let directory = directory(store.clone());
        let service = Principal::service("onboarding");
        let org = Uuid::new_v4();

        let admin = directory.provision(&service, "standard", None).await.unwrap();
        let target = directory.provision(&service, "standard", None).await.unwrap();
        directory
            .grant_membership(&service, org, admin.id, OrgRole::Admin)
            .await
            .unwrap();

        let admin = directory.resolve(Some(admin.id)).await.unwrap();
        directory
            .grant_membership(&admin, org, target.id, OrgRole::Member)
            .await
            .unwrap();
        assert!(matches!(
            directory
                .grant_membership(&admin, org, target.id, OrgRole::Owner)
                .await,
            Err(AppError::Denied(_))
        ));

        // 两次成功授予各一条审计
        assert_eq!(store.audit_len(), 2);
    }
}
