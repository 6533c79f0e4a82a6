//! 策略引擎
//!
//! 每次读写前评估 (principal, action, resource)。判定是纯函数：
//! 显式拒绝优先，其次匿名默认拒绝，最后按顺序匹配授权规则。

use crate::{
    config::PolicyConfig,
    error::{AppError, Result},
    models::{
        policy::*,
        principal::Principal,
        resource::{ResourceAttrs, ResourceRef},
    },
    repository::ResourceStore,
};
use std::sync::{Arc, RwLock};

pub struct PolicyEngine {
    rules: RwLock<Arc<RuleSet>>,
    resources: Arc<dyn ResourceStore>,
}

impl PolicyEngine {
    pub fn new(rules: RuleSet, resources: Arc<dyn ResourceStore>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            resources,
        }
    }

    /// 启动时加载规则集：配置了文件则读文件，否则使用内置规则
    pub fn load_rules(config: &PolicyConfig) -> Result<RuleSet> {
        let Some(path) = config.rules_path.as_deref() else {
            return Ok(RuleSet::builtin());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read policy rules {}: {}", path, e)))?;
        let rules = RuleSet::from_json(&text).map_err(AppError::Config)?;

        tracing::info!(path = %path, rules = rules.rules.len(), "Policy rules loaded");
        Ok(rules)
    }

    /// 当前规则快照
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 整体替换规则快照；进行中的评估继续使用旧快照
    pub fn replace_rules(&self, rules: RuleSet) -> Result<()> {
        rules.validate().map_err(AppError::Config)?;
        let count = rules.rules.len();
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rules);
        tracing::info!(rules = count, "Policy rules replaced");
        Ok(())
    }

    /// 纯判定
    pub fn evaluate(&self, principal: &Principal, action: Action, attrs: &ResourceAttrs) -> Decision {
        let rules = self.rules();
        let decision = decide(&rules, principal, action, attrs);
        record_decision(principal, action, attrs, &decision);
        decision
    }

    /// 批量过滤用，不计指标不写日志
    pub fn is_permitted(&self, principal: &Principal, action: Action, attrs: &ResourceAttrs) -> bool {
        decide(&self.rules(), principal, action, attrs).is_allowed()
    }

    /// 授权：已存在的资源先从存储加载属性
    pub async fn authorize(
        &self,
        principal: &Principal,
        action: Action,
        resource: &ResourceRef,
    ) -> Result<Decision> {
        let attrs = match resource {
            ResourceRef::Draft(attrs) | ResourceRef::Loaded(attrs) => attrs.clone(),
            ResourceRef::Existing { class, id } => {
                let stored = self
                    .resources
                    .find(*id)
                    .await?
                    .filter(|r| r.class == *class)
                    .ok_or_else(|| AppError::NotFound(format!("{} {}", class, id)))?;
                stored.attrs()
            }
        };

        Ok(self.evaluate(principal, action, &attrs))
    }

    /// 授权，拒绝时返回 `AppError::Denied`；允许时返回命中的规则 ID
    pub async fn require(
        &self,
        principal: &Principal,
        action: Action,
        resource: &ResourceRef,
    ) -> Result<String> {
        match self.authorize(principal, action, resource).await? {
            Decision::Allow { rule_id } => Ok(rule_id),
            Decision::Deny(reason) => Err(AppError::Denied(reason)),
        }
    }
}

fn decide(rules: &RuleSet, principal: &Principal, action: Action, attrs: &ResourceAttrs) -> Decision {
    let class = attrs.class;

    // 1. 显式拒绝
    if let Some(rule) = rules
        .matching(class, action)
        .filter(|r| r.effect == Effect::Deny)
        .find(|r| predicate_matches(&r.predicate, principal, attrs))
    {
        return Decision::Deny(DenyReason::ExplicitDeny {
            rule_id: rule.id.clone(),
        });
    }

    // 2. 匿名默认拒绝
    if principal.is_anonymous() && !rules.has_public_grant(class, action) {
        return Decision::Deny(DenyReason::AnonymousDefault);
    }

    // 3. 授权规则，首个匹配生效
    rules
        .matching(class, action)
        .filter(|r| r.effect == Effect::Grant)
        .find(|r| predicate_matches(&r.predicate, principal, attrs))
        .map(|r| Decision::Allow {
            rule_id: r.id.clone(),
        })
        .unwrap_or(Decision::Deny(DenyReason::NoMatchingRule))
}

fn predicate_matches(predicate: &Predicate, principal: &Principal, attrs: &ResourceAttrs) -> bool {
    match predicate {
        Predicate::Owner => principal
            .user_id()
            .is_some_and(|id| attrs.owner_id == Some(id)),
        Predicate::SharedWith => principal
            .user_id()
            .is_some_and(|id| attrs.shared_with.contains(&id)),
        Predicate::OrgRole { roles } => match (principal.as_user(), attrs.org_id) {
            (Some(user), Some(org_id)) => user
                .role_in(org_id)
                .is_some_and(|role| roles.contains(&role)),
            _ => false,
        },
        Predicate::Service => principal.is_service(),
        Predicate::Anonymous => principal.is_anonymous(),
        Predicate::Authenticated => principal.as_user().is_some(),
        Predicate::Public => true,
    }
}

fn record_decision(principal: &Principal, action: Action, attrs: &ResourceAttrs, decision: &Decision) {
    match decision {
        Decision::Allow { rule_id } => {
            metrics::counter!(
                "policy.decisions",
                "outcome" => "allow",
                "class" => attrs.class.as_str()
            )
            .increment(1);
            tracing::debug!(
                principal = %principal.subject(),
                action = %action,
                class = %attrs.class,
                resource_id = ?attrs.id,
                rule_id = %rule_id,
                "Access allowed"
            );
        }
        Decision::Deny(reason) => {
            metrics::counter!(
                "policy.decisions",
                "outcome" => "deny",
                "class" => attrs.class.as_str()
            )
            .increment(1);
            tracing::warn!(
                principal = %principal.subject(),
                action = %action,
                class = %attrs.class,
                resource_id = ?attrs.id,
                reason = reason.code(),
                "Access denied"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        principal::{OrgRole, UserPrincipal},
        resource::ResourceClass,
    };
    use crate::repository::MemoryStore;
    use uuid::Uuid;

    fn engine(rules: RuleSet) -> PolicyEngine {
        PolicyEngine::new(rules, Arc::new(MemoryStore::new()))
    }

    fn user(id: Uuid) -> Principal {
        Principal::User(UserPrincipal::new(id, "standard"))
    }

    fn dataset(owner: Uuid, org: Option<Uuid>) -> ResourceAttrs {
        ResourceAttrs {
            class: ResourceClass::Dataset,
            id: Some(Uuid::new_v4()),
            owner_id: Some(owner),
            org_id: org,
            shared_with: Vec::new(),
        }
    }

    #[test]
    fn test_owner_allowed() {
        let engine = engine(RuleSet::builtin());
        let owner = Uuid::new_v4();
        let decision = engine.evaluate(&user(owner), Action::Write, &dataset(owner, None));
        assert_eq!(
            decision,
            Decision::Allow {
                rule_id: "dataset-owner".to_string()
            }
        );
    }

    #[test]
    fn test_stranger_denied() {
        let engine = engine(RuleSet::builtin());
        let decision = engine.evaluate(
            &user(Uuid::new_v4()),
            Action::Write,
            &dataset(Uuid::new_v4(), None),
        );
        assert_eq!(decision, Decision::Deny(DenyReason::NoMatchingRule));
    }

    #[test]
    fn test_shared_read_only() {
        let engine = engine(RuleSet::builtin());
        let reader = Uuid::new_v4();
        let mut attrs = dataset(Uuid::new_v4(), None);
        attrs.shared_with.push(reader);

        assert!(engine.evaluate(&user(reader), Action::Read, &attrs).is_allowed());
        assert!(engine.evaluate(&user(reader), Action::Write, &attrs).is_denied());
    }

    #[test]
    fn test_org_admin_but_not_member() {
        let engine = engine(RuleSet::builtin());
        let org = Uuid::new_v4();
        let attrs = dataset(Uuid::new_v4(), Some(org));

        let admin = Principal::User(
            UserPrincipal::new(Uuid::new_v4(), "standard").with_membership(org, OrgRole::Admin),
        );
        let member = Principal::User(
            UserPrincipal::new(Uuid::new_v4(), "standard").with_membership(org, OrgRole::Member),
        );

        assert!(engine.evaluate(&admin, Action::Delete, &attrs).is_allowed());
        assert!(engine.evaluate(&member, Action::Read, &attrs).is_denied());
    }

    #[test]
    fn test_anonymous_default_deny() {
        let engine = engine(RuleSet::new(vec![PolicyRule::grant(
            "dataset-owner",
            ResourceClass::Dataset,
            ActionMatch::All,
            Predicate::Owner,
        )]));
        let decision = engine.evaluate(
            &Principal::Anonymous,
            Action::Read,
            &dataset(Uuid::new_v4(), None),
        );
        assert_eq!(decision, Decision::Deny(DenyReason::AnonymousDefault));
    }

    #[test]
    fn test_public_grant_admits_anonymous() {
        let engine = engine(RuleSet::new(vec![PolicyRule::grant(
            "dataset-public-read",
            ResourceClass::Dataset,
            ActionMatch::Read,
            Predicate::Public,
        )]));
        let attrs = dataset(Uuid::new_v4(), None);

        assert!(engine.evaluate(&Principal::Anonymous, Action::Read, &attrs).is_allowed());
        assert_eq!(
            engine.evaluate(&Principal::Anonymous, Action::Write, &attrs),
            Decision::Deny(DenyReason::AnonymousDefault)
        );
    }

    #[test]
    fn test_deny_overrides_grant() {
        let engine = engine(RuleSet::new(vec![
            PolicyRule::grant(
                "dataset-owner",
                ResourceClass::Dataset,
                ActionMatch::All,
                Predicate::Owner,
            ),
            PolicyRule::deny(
                "dataset-freeze",
                ResourceClass::Dataset,
                ActionMatch::Delete,
                Predicate::Authenticated,
            ),
        ]));
        let owner = Uuid::new_v4();
        let attrs = dataset(owner, None);

        assert!(engine.evaluate(&user(owner), Action::Read, &attrs).is_allowed());
        assert_eq!(
            engine.evaluate(&user(owner), Action::Delete, &attrs),
            Decision::Deny(DenyReason::ExplicitDeny {
                rule_id: "dataset-freeze".to_string()
            })
        );
    }

    #[test]
    fn test_service_allowed() {
        let engine = engine(RuleSet::builtin());
        let decision = engine.evaluate(
            &Principal::service("retention"),
            Action::Delete,
            &dataset(Uuid::new_v4(), None),
        );
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_authorize_missing_resource() {
        let engine = engine(RuleSet::builtin());
        let result = engine
            .authorize(
                &user(Uuid::new_v4()),
                Action::Read,
                &ResourceRef::existing(ResourceClass::Dataset, Uuid::new_v4()),
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_require_converts_deny() {
        let engine = engine(RuleSet::builtin());
        let draft = ResourceAttrs::draft(ResourceClass::Dataset, None, None);
        let result = engine
            .require(&Principal::Anonymous, Action::Write, &ResourceRef::Draft(draft))
            .await;
        assert!(matches!(
            result,
            Err(AppError::Denied(DenyReason::ExplicitDeny { .. }))
        ));
    }

    #[test]
    fn test_replace_rules_rejects_invalid() {
        let engine = engine(RuleSet::builtin());
        let bad = RuleSet::new(vec![
            PolicyRule::grant("dup", ResourceClass::Job, ActionMatch::All, Predicate::Owner),
            PolicyRule::grant("dup", ResourceClass::Job, ActionMatch::All, Predicate::Service),
        ]);
        assert!(matches!(engine.replace_rules(bad), Err(AppError::Config(_))));
        assert_eq!(engine.rules().rules.len(), RuleSet::builtin().rules.len());
    }

    #[test]
    fn test_load_rules_default_builtin() {
        let rules = PolicyEngine::load_rules(&PolicyConfig { rules_path: None }).unwrap();
        assert!(rules.validate().is_ok());
        assert!(!rules.rules.is_empty());
    }
}
