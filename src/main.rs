//! 投诉工单服务主入口

use complaint_desk::{
    config::AppConfig,
    db,
    middleware::AppState,
    repository::{PgAuditStore, PgComplaintStore, PgRoleStore},
    routes, telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if let Some(arg) = args.get(1) {
        match arg.as_str() {
            "--version" => {
                println!("complaint-desk {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            other => {
                eprintln!("未知参数: {}", other);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）；生产环境直接设置环境变量
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    // 1. 加载配置
    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "complaint-desk starting");

    // 3. 数据库连接池 + 迁移
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    // 4. 组装服务
    let state = Arc::new(AppState::assemble(
        Some(pool.clone()),
        Arc::new(PgRoleStore::new(pool.clone())),
        Arc::new(PgComplaintStore::new(pool.clone())),
        Arc::new(PgAuditStore::new(pool.clone())),
        &config.security,
        config.authorization.clone(),
        config.audit.clone(),
    )?);

    // 5. 构建路由
    let app = routes::create_router(state.clone());

    // 6. 启动服务器
    let listener = TcpListener::bind(&config.server.addr).await?;
    tracing::info!(addr = %config.server.addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // 7. 排空审计队列
    state.audit.shutdown().await;
    pool.close().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
    println!("complaint-desk {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: complaint-desk [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 COMPLAINTS_ 前缀的环境变量完成，例如");
    println!("  COMPLAINTS_DATABASE__URL, COMPLAINTS_SECURITY__JWT_SECRET");
}
