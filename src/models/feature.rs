//! Feature gate and quota tier models

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const DASHBOARD: &str = "dashboard";
pub const DATASETS: &str = "datasets";
pub const MODELS: &str = "models";
pub const FINE_TUNING: &str = "fine_tuning";
pub const VAULT_CHAT: &str = "vault_chat";
pub const CONNECTORS: &str = "connectors";

/// 配额档位（只读参考数据）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaTier {
    pub name: String,
    /// 每月操作次数上限，`None` 表示不限
    pub monthly_operation_limit: Option<u64>,
    /// 允许使用的模型；空表示不限
    #[serde(default)]
    pub allowed_models: Vec<String>,
    /// 档位级别的功能开关
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

impl QuotaTier {
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }

    pub fn within_limit(&self, used: u64) -> bool {
        self.monthly_operation_limit.map_or(true, |limit| used < limit)
    }
}

/// 功能目录：已知功能键、各账号类型的默认档案、配额档位
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureCatalog {
    pub keys: Vec<String>,
    pub account_types: HashMap<String, HashMap<String, bool>>,
    #[serde(default)]
    pub tiers: HashMap<String, QuotaTier>,
}

impl FeatureCatalog {
    pub fn from_json(text: &str) -> Result<Self, String> {
        let catalog: FeatureCatalog =
            serde_json::from_str(text).map_err(|e| format!("malformed feature catalog: {}", e))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// 每个账号类型必须为每个已知功能键给出显式默认值
    pub fn validate(&self) -> Result<(), String> {
        if self.account_types.is_empty() {
            return Err("feature catalog defines no account types".to_string());
        }
        for (account_type, profile) in &self.account_types {
            for key in &self.keys {
                if !profile.contains_key(key) {
                    return Err(format!(
                        "account type {} has no explicit default for feature {}",
                        account_type, key
                    ));
                }
            }
            if let Some(extra) = profile.keys().find(|k| !self.keys.contains(k)) {
                return Err(format!(
                    "account type {} references unknown feature {}",
                    account_type, extra
                ));
            }
        }
        for (name, tier) in &self.tiers {
            if name != &tier.name {
                return Err(format!("tier key {} does not match tier name {}", name, tier.name));
            }
        }
        Ok(())
    }

    pub fn is_known(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// 内置目录
    pub fn builtin() -> Self {
        let keys: Vec<String> = [DASHBOARD, DATASETS, MODELS, FINE_TUNING, VAULT_CHAT, CONNECTORS]
            .iter()
            .map(|k| k.to_string())
            .collect();

        let standard: HashMap<String, bool> = keys.iter().map(|k| (k.clone(), true)).collect();
        let vaultchat_only: HashMap<String, bool> = keys
            .iter()
            .map(|k| (k.clone(), k == VAULT_CHAT || k == CONNECTORS))
            .collect();

        let mut account_types = HashMap::new();
        account_types.insert("standard".to_string(), standard);
        account_types.insert("vaultchat_only".to_string(), vaultchat_only);

        let mut tiers = HashMap::new();
        tiers.insert(
            "free".to_string(),
            QuotaTier {
                name: "free".to_string(),
                monthly_operation_limit: Some(100),
                allowed_models: vec!["base-small".to_string()],
                features: HashMap::from([(FINE_TUNING.to_string(), false)]),
            },
        );
        tiers.insert(
            "beta".to_string(),
            QuotaTier {
                name: "beta".to_string(),
                monthly_operation_limit: Some(1_000),
                allowed_models: vec!["base-small".to_string(), "base-large".to_string()],
                features: HashMap::new(),
            },
        );
        tiers.insert(
            "paid".to_string(),
            QuotaTier {
                name: "paid".to_string(),
                monthly_operation_limit: None,
                allowed_models: Vec::new(),
                features: HashMap::new(),
            },
        );

        Self {
            keys,
            account_types,
            tiers,
        }
    }
}

/// 某个调用方的功能档案（物化结果）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureAccessProfile {
    pub features: BTreeMap<String, bool>,
}

impl FeatureAccessProfile {
    pub fn is_enabled(&self, key: &str) -> bool {
        self.features.get(key).copied().unwrap_or(false)
    }
}
