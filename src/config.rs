//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// JWT 密钥（使用 Secret 包装，防止日志泄露）
    pub jwt_secret: Secret<String>,
    /// 是否信任 X-Forwarded-For / X-Real-IP 头
    pub trust_proxy: bool,
    /// 访问令牌有效期（秒）
    pub access_token_exp_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    /// 单次权限检查超时（毫秒），超时按拒绝处理
    pub check_timeout_ms: u64,
    /// 被拒绝的权限检查是否写审计日志
    pub audit_denials: bool,
}

impl AuthorizationConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: 2000,
            audit_denials: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// 审计队列容量
    pub queue_capacity: usize,
    /// 队列满时等待入队的条目上限，超出部分上报后丢弃
    pub overflow_limit: usize,
    /// 单条审计写入超时（毫秒）
    pub write_timeout_ms: u64,
    /// 关闭时排空队列的最长等待（秒）
    pub shutdown_timeout_secs: u64,
}

impl AuditConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow_limit: 4096,
            write_timeout_ms: 3000,
            shutdown_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub authorization: AuthorizationConfig,
    pub audit: AuditConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_secret", "change-this-secret-in-production-min-32-chars!")?
            .set_default("security.trust_proxy", true)?
            .set_default("security.access_token_exp_secs", 3600)?
            .set_default("authorization.check_timeout_ms", 2000)?
            .set_default("authorization.audit_denials", true)?
            .set_default("audit.queue_capacity", 1024)?
            .set_default("audit.overflow_limit", 4096)?
            .set_default("audit.write_timeout_ms", 3000)?
            .set_default("audit.shutdown_timeout_secs", 10)?;

        // 从环境变量加载配置（前缀为 COMPLAINTS_）
        settings = settings.add_source(
            Environment::with_prefix("COMPLAINTS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证 JWT 密钥长度（至少 32 字符）
        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        // 权限检查必须有上限，否则慢存储会拖住请求
        if self.authorization.check_timeout_ms == 0 || self.authorization.check_timeout_ms > 60_000 {
            return Err(ConfigError::Message(
                "authorization.check_timeout_ms must be between 1 and 60000".to_string(),
            ));
        }

        if self.audit.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "audit.queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.audit.overflow_limit > 1_000_000 {
            return Err(ConfigError::Message(
                "audit.overflow_limit must not exceed 1000000".to_string(),
            ));
        }

        if self.audit.write_timeout_ms == 0 || self.audit.write_timeout_ms > 60_000 {
            return Err(ConfigError::Message(
                "audit.write_timeout_ms must be between 1 and 60000".to_string(),
            ));
        }

        Ok(())
    }
}
