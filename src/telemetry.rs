//! 日志与追踪系统
//! 初始化结构化日志和指标收集

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    // 从环境变量构建过滤器
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // 根据配置选择日志格式
    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => {
            // JSON 格式（生产环境）
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .boxed()
        }
        "pretty" => {
            // 美化格式（开发环境）
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(false)
                .boxed()
        }
        _ => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 初始化指标收集器
pub fn init_metrics() {
    // metrics 0.24 的指标在首次使用时创建，这里只登记描述
    metrics::describe_counter!("authz.checks", "Permission checks by outcome");
    metrics::describe_counter!("audit.enqueued", "Audit entries accepted by the recorder");
    metrics::describe_counter!("audit.written", "Audit entries persisted");
    metrics::describe_counter!("audit.failures", "Audit entries that could not be persisted");
    metrics::describe_counter!("workflow.transitions", "Complaint workflow operations applied");
    metrics::describe_counter!("http_requests_total", "HTTP requests by status class");
    metrics::describe_histogram!("http_request_duration_seconds", "HTTP request latency");
    tracing::debug!("Metrics initialized");
}
