//! Resource domain models

use super::retention::RetentionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 受控资源类别（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "resource_class", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Dataset,
    Model,
    Job,
    Conversation,
    Message,
    Document,
    Credential,
    Membership,
    AuditEntry,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 9] = [
        ResourceClass::Dataset,
        ResourceClass::Model,
        ResourceClass::Job,
        ResourceClass::Conversation,
        ResourceClass::Message,
        ResourceClass::Document,
        ResourceClass::Credential,
        ResourceClass::Membership,
        ResourceClass::AuditEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Dataset => "dataset",
            ResourceClass::Model => "model",
            ResourceClass::Job => "job",
            ResourceClass::Conversation => "conversation",
            ResourceClass::Message => "message",
            ResourceClass::Document => "document",
            ResourceClass::Credential => "credential",
            ResourceClass::Membership => "membership",
            ResourceClass::AuditEntry => "audit_entry",
        }
    }

    /// 可作为保留策略父资源的类别
    pub fn is_retention_parent(&self) -> bool {
        matches!(self, ResourceClass::Conversation)
    }

    /// 父资源对应的子资源类别
    pub fn child_class(&self) -> Option<ResourceClass> {
        match self {
            ResourceClass::Conversation => Some(ResourceClass::Message),
            _ => None,
        }
    }

    /// 存放在通用资源表中的类别（凭据、成员关系、审计条目各有专表）
    pub fn is_generic(&self) -> bool {
        !matches!(
            self,
            ResourceClass::Credential | ResourceClass::Membership | ResourceClass::AuditEntry
        )
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceClass::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown resource class: {}", s))
    }
}

/// 持久化的资源记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Resource {
    pub id: Uuid,
    pub class: ResourceClass,
    /// 系统资源没有所有者；创建后不可修改
    pub owner_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    pub shared_with: Vec<Uuid>,
    pub payload: serde_json::Value,
    /// 仅保留策略父资源（会话）使用
    pub retention_mode: Option<RetentionMode>,
    /// 仅子资源（消息）使用，写入时计算
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn attrs(&self) -> ResourceAttrs {
        ResourceAttrs {
            class: self.class,
            id: Some(self.id),
            owner_id: self.owner_id,
            org_id: self.org_id,
            shared_with: self.shared_with.clone(),
        }
    }

    /// 审计快照
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "class": self.class,
            "owner_id": self.owner_id,
            "org_id": self.org_id,
            "parent_id": self.parent_id,
            "shared_with": self.shared_with,
            "payload": self.payload,
            "retention_mode": self.retention_mode,
            "expires_at": self.expires_at,
        })
    }
}

/// 策略谓词可见的资源属性
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttrs {
    pub class: ResourceClass,
    pub id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub org_id: Option<Uuid>,
    pub shared_with: Vec<Uuid>,
}

impl ResourceAttrs {
    /// 创建前的资源草稿属性
    pub fn draft(class: ResourceClass, owner_id: Option<Uuid>, org_id: Option<Uuid>) -> Self {
        Self {
            class,
            id: None,
            owner_id,
            org_id,
            shared_with: Vec::new(),
        }
    }
}

/// 授权目标
#[derive(Debug, Clone)]
pub enum ResourceRef {
    /// 已存在的实例，属性从存储加载
    Existing { class: ResourceClass, id: Uuid },
    /// 尚未创建的实例
    Draft(ResourceAttrs),
    /// 调用方已持有属性（审计条目、凭据等专表记录）
    Loaded(ResourceAttrs),
}

impl ResourceRef {
    pub fn existing(class: ResourceClass, id: Uuid) -> Self {
        ResourceRef::Existing { class, id }
    }

    pub fn class(&self) -> ResourceClass {
        match self {
            ResourceRef::Existing { class, .. } => *class,
            ResourceRef::Draft(attrs) | ResourceRef::Loaded(attrs) => attrs.class,
        }
    }
}

/// 创建资源请求（所有者始终为调用方）
#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    pub class: ResourceClass,
    pub org_id: Option<Uuid>,
    #[serde(default)]
    pub shared_with: Vec<Uuid>,
    pub payload: serde_json::Value,
    pub retention_mode: Option<RetentionMode>,
}

impl NewResource {
    pub fn new(class: ResourceClass, payload: serde_json::Value) -> Self {
        Self {
            class,
            org_id: None,
            shared_with: Vec::new(),
            payload,
            retention_mode: None,
        }
    }

    pub fn in_org(mut self, org_id: Uuid) -> Self {
        self.org_id = Some(org_id);
        self
    }

    pub fn with_retention(mut self, mode: RetentionMode) -> Self {
        self.retention_mode = Some(mode);
        self
    }
}
