//! 引擎装配
//! 根据配置和存储后端构建全部组件

use crate::{
    clock::Clock,
    config::AppConfig,
    crypto::TokenCipher,
    db,
    error::{AppError, Result},
    models::principal::Principal,
    repository::*,
    retry::RetryPolicy,
    services::*,
};
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 存储后端
#[derive(Clone)]
pub struct Stores {
    pub principals: Arc<dyn PrincipalStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub audit: Arc<dyn AuditStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub states: Arc<dyn OAuthStateStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let credentials = Arc::new(PgCredentialRepository::new(pool.clone()));
        Self {
            principals: Arc::new(PgPrincipalRepository::new(pool.clone())),
            resources: Arc::new(PgResourceRepository::new(pool.clone())),
            audit: Arc::new(PgAuditRepository::new(pool)),
            credentials: credentials.clone(),
            states: credentials,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            principals: store.clone(),
            resources: store.clone(),
            audit: store.clone(),
            credentials: store.clone(),
            states: store,
        }
    }
}

pub struct AccessEngine {
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditRecorder>,
    pub retention: Arc<RetentionScheduler>,
    pub features: Arc<FeatureGate>,
    pub vault: Arc<CredentialVault>,
    pub directory: Arc<PrincipalDirectory>,
    pub data: Arc<DataAccessService>,
    service: Principal,
    request_timeout: Duration,
    sweep_interval: Duration,
}

impl AccessEngine {
    /// 装配全部组件；规则集、功能目录或密钥不合法时启动失败
    pub fn build(config: &AppConfig, stores: Stores, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let service = Principal::service(&config.security.service_name);
        let retry = RetryPolicy::from_config(&config.storage);

        let rules = PolicyEngine::load_rules(&config.policy)?;
        let catalog = FeatureGate::load_catalog(&config.features)?;
        let cipher = TokenCipher::new(&config.security.encryption_key_bytes()?)?;
        let state_ttl = i64::try_from(config.security.oauth_state_ttl_secs)
            .map(chrono::Duration::seconds)
            .map_err(|_| AppError::Config("oauth_state_ttl_secs out of range".to_string()))?;

        let policy = Arc::new(PolicyEngine::new(rules, stores.resources.clone()));
        let audit = Arc::new(AuditRecorder::new(
            stores.audit.clone(),
            policy.clone(),
            clock.clone(),
            retry,
        ));
        let retention = Arc::new(RetentionScheduler::new(
            stores.resources.clone(),
            stores.states.clone(),
            audit.clone(),
            policy.clone(),
            clock.clone(),
            retry,
            config.retention.clone(),
            service.clone(),
        ));
        let features = Arc::new(FeatureGate::new(catalog, config.features.unknown_key_enabled)?);
        let vault = Arc::new(CredentialVault::new(
            stores.credentials.clone(),
            stores.states.clone(),
            policy.clone(),
            audit.clone(),
            cipher,
            clock.clone(),
            state_ttl,
        ));
        let directory = Arc::new(PrincipalDirectory::new(
            stores.principals.clone(),
            policy.clone(),
            audit.clone(),
            clock.clone(),
        ));
        let data = Arc::new(DataAccessService::new(
            stores.resources,
            policy.clone(),
            audit.clone(),
            retention.clone(),
            clock,
        ));

        tracing::info!(
            service = %config.security.service_name,
            rules = policy.rules().rules.len(),
            features = features.catalog().keys.len(),
            "Access engine assembled"
        );

        Ok(Self {
            policy,
            audit,
            retention,
            features,
            vault,
            directory,
            data,
            service,
            request_timeout: config.storage.request_timeout(),
            sweep_interval: Duration::from_secs(config.retention.sweep_interval_secs),
        })
    }

    /// 内存后端
    pub fn in_memory(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<(Self, Arc<MemoryStore>)> {
        let store = Arc::new(MemoryStore::new());
        let engine = Self::build(config, Stores::memory(store.clone()), clock)?;
        Ok((engine, store))
    }

    /// PostgreSQL 后端：建连接池并执行迁移
    pub async fn connect(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<(Self, PgPool)> {
        let retry = RetryPolicy::from_config(&config.storage);
        let pool = db::create_pool(&config.database, retry).await?;
        db::run_migrations(&pool).await?;
        let engine = Self::build(config, Stores::postgres(pool.clone()), clock)?;
        Ok((engine, pool))
    }

    /// 内部服务身份（清理、开户等后台操作使用）
    pub fn service_principal(&self) -> Principal {
        self.service.clone()
    }

    /// 给请求加超时；超时即丢弃 future
    pub async fn with_deadline<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Request deadline exceeded"
                );
                Err(AppError::Timeout(format!(
                    "request exceeded {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// 启动周期清理
    pub fn spawn_sweeper(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.retention.clone().spawn(self.sweep_interval, shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::*;
    use secrecy::Secret;

    fn config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                url: Secret::new("postgresql://localhost/unused".to_string()),
                max_connections: 2,
                min_connections: 1,
                acquire_timeout_secs: 1,
                idle_timeout_secs: 60,
                max_lifetime_secs: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            security: SecurityConfig {
                encryption_key: Secret::new(
                    "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=".to_string(),
                ),
                oauth_state_ttl_secs: 300,
                service_name: "engine-test".to_string(),
            },
            policy: PolicyConfig::default(),
            features: FeatureConfig {
                catalog_path: None,
                unknown_key_enabled: true,
            },
            retention: RetentionConfig {
                sweep_interval_secs: 60,
                batch_size: 10,
                audit_retention_days: None,
            },
            storage: StorageConfig {
                retry_max_attempts: 1,
                retry_base_backoff_ms: 0,
                request_timeout_secs: 1,
            },
        }
    }

    #[test]
    fn test_build_rejects_bad_key() {
        let mut config = config();
        config.security.encryption_key = Secret::new("c2hvcnQ=".to_string());
        assert!(matches!(
            AccessEngine::in_memory(&config, Arc::new(SystemClock)),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_service_principal_from_config() {
        let (engine, _) = AccessEngine::in_memory(&config(), Arc::new(SystemClock)).unwrap();
        assert_eq!(engine.service_principal().subject(), "service:engine-test");
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let (engine, _) = AccessEngine::in_memory(&config(), Arc::new(SystemClock)).unwrap();

        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, AppError>(())
        };
        assert!(matches!(engine.with_deadline(slow).await, Err(AppError::Timeout(_))));

        let fast = async { Ok::<_, AppError>(7) };
        assert_eq!(engine.with_deadline(fast).await.unwrap(), 7);
    }
}
