//! Policy domain models
//!
//! 规则是封闭资源类别上的带标签谓词：授权规则叠加生效，显式拒绝规则优先于一切授权。

use super::principal::OrgRole;
use super::resource::ResourceClass;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// 请求动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规则适用的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionMatch {
    Read,
    Write,
    Delete,
    All,
}

impl ActionMatch {
    pub fn matches(&self, action: Action) -> bool {
        matches!(
            (self, action),
            (ActionMatch::All, _)
                | (ActionMatch::Read, Action::Read)
                | (ActionMatch::Write, Action::Write)
                | (ActionMatch::Delete, Action::Delete)
        )
    }
}

/// 规则效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Grant,
    Deny,
}

/// 规则谓词（纯函数，无外部 IO）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// principal.id == resource.owner_id
    Owner,
    /// principal.id ∈ resource.shared_with
    SharedWith,
    /// 在 resource.org_id 中拥有指定角色之一
    OrgRole { roles: Vec<OrgRole> },
    /// 内部可信服务
    Service,
    /// 未认证调用方
    Anonymous,
    /// 任意已认证用户
    Authenticated,
    /// 任何调用方（公开访问）
    Public,
}

/// 策略规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub resource_class: ResourceClass,
    pub action: ActionMatch,
    pub effect: Effect,
    pub predicate: Predicate,
}

impl PolicyRule {
    pub fn grant(id: &str, class: ResourceClass, action: ActionMatch, predicate: Predicate) -> Self {
        Self {
            id: id.to_string(),
            resource_class: class,
            action,
            effect: Effect::Grant,
            predicate,
        }
    }

    pub fn deny(id: &str, class: ResourceClass, action: ActionMatch, predicate: Predicate) -> Self {
        Self {
            id: id.to_string(),
            resource_class: class,
            action,
            effect: Effect::Deny,
            predicate,
        }
    }

    pub fn applies_to(&self, class: ResourceClass, action: Action) -> bool {
        self.resource_class == class && self.action.matches(action)
    }
}

/// 不可变规则集快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<PolicyRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// 从 JSON 文本加载并校验
    pub fn from_json(text: &str) -> Result<Self, String> {
        let set: RuleSet =
            serde_json::from_str(text).map_err(|e| format!("malformed rule set: {}", e))?;
        set.validate()?;
        Ok(set)
    }

    /// 校验：规则 ID 唯一、非空，角色集合非空
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if rule.id.trim().is_empty() {
                return Err("rule id must not be empty".to_string());
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(format!("duplicate rule id: {}", rule.id));
            }
            if let Predicate::OrgRole { roles } = &rule.predicate {
                if roles.is_empty() {
                    return Err(format!("rule {} has an empty role set", rule.id));
                }
            }
        }
        Ok(())
    }

    pub fn matching(&self, class: ResourceClass, action: Action) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().filter(move |r| r.applies_to(class, action))
    }

    /// 是否存在对 (class, action) 的公开授权规则
    pub fn has_public_grant(&self, class: ResourceClass, action: Action) -> bool {
        self.matching(class, action)
            .any(|r| r.effect == Effect::Grant && r.predicate == Predicate::Public)
    }

    /// 内置默认规则集
    pub fn builtin() -> Self {
        use ActionMatch::*;
        use ResourceClass as C;

        let admins = || Predicate::OrgRole {
            roles: vec![OrgRole::Admin, OrgRole::Owner],
        };
        let mut rules = Vec::new();

        for class in [
            C::Dataset,
            C::Model,
            C::Job,
            C::Conversation,
            C::Message,
            C::Document,
        ] {
            let name = class.as_str();
            rules.push(PolicyRule::grant(&format!("{name}-owner"), class, All, Predicate::Owner));
            rules.push(PolicyRule::grant(
                &format!("{name}-shared-read"),
                class,
                Read,
                Predicate::SharedWith,
            ));
            rules.push(PolicyRule::grant(&format!("{name}-org-admin"), class, All, admins()));
            rules.push(PolicyRule::grant(&format!("{name}-service"), class, All, Predicate::Service));
            rules.push(PolicyRule::deny(
                &format!("{name}-anonymous-deny"),
                class,
                All,
                Predicate::Anonymous,
            ));
        }

        rules.push(PolicyRule::grant("credential-owner", C::Credential, All, Predicate::Owner));
        rules.push(PolicyRule::grant("credential-service", C::Credential, All, Predicate::Service));
        rules.push(PolicyRule::deny(
            "credential-anonymous-deny",
            C::Credential,
            All,
            Predicate::Anonymous,
        ));

        rules.push(PolicyRule::grant("membership-self-read", C::Membership, Read, Predicate::Owner));
        rules.push(PolicyRule::grant("membership-org-admin", C::Membership, All, admins()));
        rules.push(PolicyRule::grant("membership-service", C::Membership, All, Predicate::Service));
        rules.push(PolicyRule::deny(
            "membership-anonymous-deny",
            C::Membership,
            All,
            Predicate::Anonymous,
        ));

        // 审计条目：owner 即 actor；无写入/删除授权
        rules.push(PolicyRule::grant("audit-actor-read", C::AuditEntry, Read, Predicate::Owner));
        rules.push(PolicyRule::grant("audit-org-admin-read", C::AuditEntry, Read, admins()));
        rules.push(PolicyRule::grant("audit-service-read", C::AuditEntry, Read, Predicate::Service));
        rules.push(PolicyRule::grant(
            "audit-service-purge",
            C::AuditEntry,
            Delete,
            Predicate::Service,
        ));
        rules.push(PolicyRule::deny(
            "audit-anonymous-deny",
            C::AuditEntry,
            All,
            Predicate::Anonymous,
        ));

        Self { rules }
    }
}

/// 拒绝原因（机器可读，不直接暴露给不可信调用方）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenyReason {
    ExplicitDeny { rule_id: String },
    AnonymousDefault,
    NoMatchingRule,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::ExplicitDeny { .. } => "explicit_deny",
            DenyReason::AnonymousDefault => "anonymous_default_deny",
            DenyReason::NoMatchingRule => "no_matching_rule",
        }
    }
}

/// 授权判定
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow { rule_id: String },
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn is_denied(&self) -> bool {
        !self.is_allowed()
    }
}
