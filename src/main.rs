//! 访问引擎主入口
//! 加载配置、连接数据库、装配组件并运行保留策略清理任务

use access_engine::{
    clock::SystemClock,
    config::AppConfig,
    db, telemetry, AccessEngine,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("access-engine {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(env) = std::env::var("ACCESS_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Access engine starting...");

    // 3. 数据库连接池 + 迁移 + 组件装配
    let (engine, pool) = AccessEngine::connect(&config, Arc::new(SystemClock)).await?;

    db::ping(&pool).await?;

    // 4. 启动时校验审计链
    let verification = engine
        .audit
        .verify_log(&engine.service_principal())
        .await?;
    if !verification.valid {
        tracing::error!(
            index = ?verification.first_invalid_index,
            error = ?verification.error_message,
            "Audit log integrity check failed"
        );
    }

    // 5. 周期清理
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = engine.spawn_sweeper(shutdown_rx);

    // 6. 优雅关闭：通知清理任务在当前批次后退出
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Retention sweeper task failed");
    }

    pool.close().await;
    tracing::info!("Access engine shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }
}

/// 打印帮助信息
fn print_help() {
    println!("access-engine {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: access-engine [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 ACCESS_ 前缀的环境变量完成，例如:");
    println!("  ACCESS_DATABASE__URL            PostgreSQL 连接串");
    println!("  ACCESS_SECURITY__ENCRYPTION_KEY base64 编码的 32 字节密钥");
    println!("  ACCESS_RETENTION__BATCH_SIZE    每批清理行数");
}
