//! PostgreSQL 连接池与迁移
//!
//! 启动期错误统一映射到 AppError：连不上库属于瞬时存储错误（有界重试），
//! 连接串/凭据/迁移版本问题属于配置错误。

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;
use secrecy::ExposeSecret;
use sqlx::{migrate::MigrateError, postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// 建立连接池；数据库暂时不可达时按 `retry` 退避重连
pub async fn create_pool(config: &DatabaseConfig, retry: RetryPolicy) -> Result<PgPool> {
    let options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true);

    let pool = retry
        .run("db.connect", || {
            let options = options.clone();
            async move {
                options
                    .connect(config.url.expose_secret())
                    .await
                    .map_err(connect_error)
            }
        })
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database pool ready"
    );
    Ok(pool)
}

/// 执行内嵌迁移
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(migrate_error)?;

    tracing::info!("Migrations applied");
    Ok(())
}

/// 启动后的连通性检查
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(|e| {
        tracing::warn!(error = %e, "Database ping failed");
        AppError::from(e)
    })?;
    Ok(())
}

fn connect_error(e: sqlx::Error) -> AppError {
    let err = AppError::from(e);
    if err.is_transient() {
        err
    } else {
        tracing::error!(error = %err, "Database connection rejected");
        AppError::Config(format!("database connection rejected: {}", err))
    }
}

fn migrate_error(e: MigrateError) -> AppError {
    tracing::error!(error = %e, "Migration failed");
    match e {
        MigrateError::Execute(inner) => AppError::from(inner),
        other => AppError::Config(format!("migration failed: {}", other)),
    }
}
