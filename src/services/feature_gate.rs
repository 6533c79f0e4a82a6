//! 功能开关
//!
//! 判定顺序：个人覆盖 > 账号类型默认值（配额档位可再关闭）> 档位开关 > 未知键兜底。
//! 目录是只读快照，整体替换。

use crate::{
    config::FeatureConfig,
    error::{AppError, Result},
    models::{
        feature::{FeatureAccessProfile, FeatureCatalog, QuotaTier},
        principal::{Principal, UserPrincipal},
    },
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub struct FeatureGate {
    catalog: RwLock<Arc<FeatureCatalog>>,
    unknown_key_enabled: bool,
}

impl FeatureGate {
    pub fn new(catalog: FeatureCatalog, unknown_key_enabled: bool) -> Result<Self> {
        catalog.validate().map_err(AppError::Config)?;
        Ok(Self {
            catalog: RwLock::new(Arc::new(catalog)),
            unknown_key_enabled,
        })
    }

    /// 启动时加载目录：配置了文件则读文件，否则使用内置目录
    pub fn load_catalog(config: &FeatureConfig) -> Result<FeatureCatalog> {
        let Some(path) = config.catalog_path.as_deref() else {
            return Ok(FeatureCatalog::builtin());
        };

        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read feature catalog {}: {}", path, e)))?;
        let catalog = FeatureCatalog::from_json(&text).map_err(AppError::Config)?;

        tracing::info!(path = %path, keys = catalog.keys.len(), "Feature catalog loaded");
        Ok(catalog)
    }

    pub fn catalog(&self) -> Arc<FeatureCatalog> {
        self.catalog
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn replace_catalog(&self, catalog: FeatureCatalog) -> Result<()> {
        catalog.validate().map_err(AppError::Config)?;
        let keys = catalog.keys.len();
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(catalog);
        tracing::info!(keys, "Feature catalog replaced");
        Ok(())
    }

    pub fn is_enabled(&self, principal: &Principal, key: &str) -> bool {
        match principal {
            Principal::Anonymous => false,
            Principal::Service(_) => true,
            Principal::User(user) => self.resolve_for_user(&self.catalog(), user, key),
        }
    }

    /// 物化调用方的完整功能档案（目录键加个人覆盖键）
    pub fn profile_for(&self, principal: &Principal) -> FeatureAccessProfile {
        let catalog = self.catalog();
        let mut features = BTreeMap::new();

        for key in &catalog.keys {
            let enabled = match principal {
                Principal::Anonymous => false,
                Principal::Service(_) => true,
                Principal::User(user) => self.resolve_for_user(&catalog, user, key),
            };
            features.insert(key.clone(), enabled);
        }
        if let Principal::User(user) = principal {
            for (key, enabled) in &user.feature_overrides {
                features.insert(key.clone(), *enabled);
            }
        }

        FeatureAccessProfile { features }
    }

    /// 调用方的配额档位；未分配或档位不存在时为 None
    pub fn tier_for(&self, principal: &Principal) -> Option<QuotaTier> {
        let user = principal.as_user()?;
        let name = user.tier.as_deref()?;
        let tier = self.catalog().tiers.get(name).cloned();
        if tier.is_none() {
            tracing::warn!(user_id = %user.id, tier = %name, "Unknown quota tier");
        }
        tier
    }

    /// 档位是否允许使用该模型；无档位的用户不受限
    pub fn model_allowed(&self, principal: &Principal, model: &str) -> bool {
        match principal {
            Principal::Anonymous => false,
            Principal::Service(_) => true,
            Principal::User(_) => self
                .tier_for(principal)
                .map_or(true, |tier| tier.allows_model(model)),
        }
    }

    /// 本月已用 `used` 次后是否仍在额度内
    pub fn within_quota(&self, principal: &Principal, used: u64) -> bool {
        match principal {
            Principal::Anonymous => false,
            Principal::Service(_) => true,
            Principal::User(_) => self
                .tier_for(principal)
                .map_or(true, |tier| tier.within_limit(used)),
        }
    }

    fn resolve_for_user(&self, catalog: &FeatureCatalog, user: &UserPrincipal, key: &str) -> bool {
        if let Some(enabled) = user.feature_overrides.get(key) {
            return *enabled;
        }

        let tier_toggle = user
            .tier
            .as_deref()
            .and_then(|name| catalog.tiers.get(name))
            .and_then(|tier| tier.features.get(key).copied());

        if let Some(default) = catalog
            .account_types
            .get(&user.account_type)
            .and_then(|profile| profile.get(key).copied())
        {
            return default && tier_toggle.unwrap_or(true);
        }

        if let Some(enabled) = tier_toggle {
            return enabled;
        }

        tracing::warn!(
            user_id = %user.id,
            account_type = %user.account_type,
            key = %key,
            fallback = self.unknown_key_enabled,
            "Feature key not covered by catalog, using fallback"
        );
        self.unknown_key_enabled
    }
}
