//! Principal domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// 组织内角色，按权限从低到高排序
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "org_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Member,
    Admin,
    Owner,
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Member => "member",
            OrgRole::Admin => "admin",
            OrgRole::Owner => "owner",
        }
    }
}

/// 组织成员关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub org_id: Uuid,
    pub role: OrgRole,
}

/// 账号记录（开户时创建）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    /// 账号类型，决定默认功能档案，例如 standard / vaultchat_only
    pub account_type: String,
    /// 配额档位名称，例如 free / beta / paid
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 开户请求；首尾空白在校验前去除
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProvisionAccount {
    #[validate(length(min = 1, max = 64, message = "account type must not be empty"))]
    pub account_type: String,
    #[validate(length(min = 1, max = 64))]
    pub tier: Option<String>,
}

impl ProvisionAccount {
    pub fn new(account_type: &str, tier: Option<&str>) -> Self {
        Self {
            account_type: account_type.trim().to_string(),
            tier: tier.map(|t| t.trim().to_string()),
        }
    }
}

/// 个人功能覆盖请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FeatureOverride {
    pub user_id: Uuid,
    #[validate(length(min = 1, max = 128, message = "feature key must not be empty"))]
    pub key: String,
    pub enabled: bool,
}

impl FeatureOverride {
    pub fn new(user_id: Uuid, key: &str, enabled: bool) -> Self {
        Self {
            user_id,
            key: key.trim().to_string(),
            enabled,
        }
    }
}

/// 已认证用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrincipal {
    pub id: Uuid,
    pub account_type: String,
    pub tier: Option<String>,
    pub memberships: Vec<Membership>,
    /// 功能开关的个人覆盖
    pub feature_overrides: HashMap<String, bool>,
}

impl UserPrincipal {
    /// 仅有身份的用户（无组织、无覆盖）
    pub fn new(id: Uuid, account_type: &str) -> Self {
        Self {
            id,
            account_type: account_type.to_string(),
            tier: None,
            memberships: Vec::new(),
            feature_overrides: HashMap::new(),
        }
    }

    pub fn with_membership(mut self, org_id: Uuid, role: OrgRole) -> Self {
        self.memberships.retain(|m| m.org_id != org_id);
        self.memberships.push(Membership { org_id, role });
        self
    }

    pub fn with_tier(mut self, tier: &str) -> Self {
        self.tier = Some(tier.to_string());
        self
    }

    pub fn with_override(mut self, key: &str, enabled: bool) -> Self {
        self.feature_overrides.insert(key.to_string(), enabled);
        self
    }

    /// 在指定组织中的角色
    pub fn role_in(&self, org_id: Uuid) -> Option<OrgRole> {
        self.memberships
            .iter()
            .find(|m| m.org_id == org_id)
            .map(|m| m.role)
    }
}

/// 内部可信服务身份，仅由进程内代码构造，不会从调用方输入解析得到
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
}

/// 调用方身份
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    Anonymous,
    User(UserPrincipal),
    Service(ServiceIdentity),
}

impl Principal {
    pub fn service(name: &str) -> Self {
        Principal::Service(ServiceIdentity {
            name: name.to_string(),
        })
    }

    /// 用户 ID（匿名和服务身份没有）
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::User(user) => Some(user.id),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserPrincipal> {
        match self {
            Principal::User(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn is_service(&self) -> bool {
        matches!(self, Principal::Service(_))
    }

    /// 审计中使用的主体标识
    pub fn subject(&self) -> String {
        match self {
            Principal::Anonymous => "anonymous".to_string(),
            Principal::User(user) => user.id.to_string(),
            Principal::Service(svc) => format!("service:{}", svc.name),
        }
    }
}

impl From<UserPrincipal> for Principal {
    fn from(user: UserPrincipal) -> Self {
        Principal::User(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(OrgRole::Member < OrgRole::Admin);
        assert!(OrgRole::Admin < OrgRole::Owner);
    }

    #[test]
    fn test_membership_replaced_not_duplicated() {
        let org = Uuid::new_v4();
        let user = UserPrincipal::new(Uuid::new_v4(), "standard")
            .with_membership(org, OrgRole::Member)
            .with_membership(org, OrgRole::Admin);

        assert_eq!(user.memberships.len(), 1);
        assert_eq!(user.role_in(org), Some(OrgRole::Admin));
        assert_eq!(user.role_in(Uuid::new_v4()), None);
    }

    #[test]
    fn test_provision_request_validation() {
        assert!(ProvisionAccount::new("standard", Some("free")).validate().is_ok());
        assert!(ProvisionAccount::new("vaultchat_only", None).validate().is_ok());

        let blank = ProvisionAccount::new("   ", None);
        assert!(blank.account_type.is_empty());
        assert!(blank.validate().is_err());

        assert!(ProvisionAccount::new("standard", Some(" ")).validate().is_err());
        assert!(ProvisionAccount::new(&"x".repeat(65), None).validate().is_err());
    }

    #[test]
    fn test_feature_override_validation() {
        let user = Uuid::new_v4();
        assert!(FeatureOverride::new(user, "fine_tuning", true).validate().is_ok());
        assert!(FeatureOverride::new(user, " \t", true).validate().is_err());
    }

    #[test]
    fn test_subject() {
        assert_eq!(Principal::Anonymous.subject(), "anonymous");
        assert_eq!(Principal::service("retention").subject(), "service:retention");
    }
}
