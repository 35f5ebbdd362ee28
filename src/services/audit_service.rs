//! 审计日志服务
//!
//! `AuditRecorder::record` 同步返回，写入由后台任务完成。任何失败都只会
//! 上报给 `MonitoringSink`，不会传回调用方。

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::{
    sync::{mpsc, oneshot, Notify, Semaphore},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    config::AuditConfig,
    error::{AppError, Result},
    models::audit::*,
    repository::AuditStore,
};

/// 审计操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    // 投诉工作流
    ComplaintAssign,
    ComplaintResolve,
    ComplaintClose,
    ComplaintReopen,
    ComplaintEscalate,
    ComplaintStatusChange,

    // 授权
    AuthorizationDenied,
    UserRoleAssign,
    UserRoleRemove,

    // 角色与权限管理
    RoleCreate,
    RoleUpdate,
    RoleDelete,
    PermissionCreate,
    PermissionDelete,
    PermissionGrant,
    PermissionRevoke,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ComplaintAssign => "complaint.assign",
            AuditAction::ComplaintResolve => "complaint.resolve",
            AuditAction::ComplaintClose => "complaint.close",
            AuditAction::ComplaintReopen => "complaint.reopen",
            AuditAction::ComplaintEscalate => "complaint.escalate",
            AuditAction::ComplaintStatusChange => "complaint.status_change",

            AuditAction::AuthorizationDenied => "authorization.denied",
            AuditAction::UserRoleAssign => "user_role.assign",
            AuditAction::UserRoleRemove => "user_role.remove",

            AuditAction::RoleCreate => "role.create",
            AuditAction::RoleUpdate => "role.update",
            AuditAction::RoleDelete => "role.delete",
            AuditAction::PermissionCreate => "permission.create",
            AuditAction::PermissionDelete => "permission.delete",
            AuditAction::PermissionGrant => "role_permission.grant",
            AuditAction::PermissionRevoke => "role_permission.revoke",
        }
    }
}

/// 审计日志参数结构体
#[derive(Debug, Clone, Copy)]
pub struct AuditParams<'a> {
    pub action: &'a str,
    pub entity: &'a str,
    pub entity_id: &'a str,
    /// 缺省时记为 anonymous
    pub actor: Option<Uuid>,
    pub meta: Option<&'a RequestMeta>,
}

impl<'a> AuditParams<'a> {
    pub fn new(action: AuditAction, entity: &'a str, entity_id: &'a str) -> Self {
        Self {
            action: action.as_str(),
            entity,
            entity_id,
            actor: None,
            meta: None,
        }
    }

    pub fn actor(mut self, actor: Uuid) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn meta(mut self, meta: &'a RequestMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Failures inside the recorder. Never returned to callers of `record`.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit field '{0}' must not be blank")]
    BlankField(&'static str),

    #[error("audit recorder is shut down")]
    Closed,

    #[error("audit queue overloaded")]
    Overloaded,

    #[error("no async runtime to hand the entry to")]
    NoRuntime,

    #[error("audit write timed out")]
    Timeout,

    #[error("audit store error: {0}")]
    Store(#[from] AppError),
}

/// Receives audit failures the recorder swallowed
pub trait MonitoringSink: Send + Sync {
    fn report(&self, action: &str, entity_id: &str, error: &AuditError);
}

/// 默认上报：计数器 + error 日志
pub struct MetricsSink;

impl MonitoringSink for MetricsSink {
    fn report(&self, action: &str, entity_id: &str, error: &AuditError) {
        metrics::counter!("audit.failures").increment(1);
        tracing::error!(
            action = %action,
            entity_id = %entity_id,
            error = %error,
            "Audit entry dropped"
        );
    }
}

/// 敏感字段（比较时忽略大小写与下划线）
const SENSITIVE_KEYS: [&str; 6] = [
    "password",
    "token",
    "secret",
    "key",
    "refreshtoken",
    "accesstoken",
];

pub const REDACTED: &str = "[REDACTED]";

fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.contains(&normalized.as_str())
}

/// 脱敏：仅处理顶层键，嵌套对象原样保留
pub fn sanitize(details: Value) -> Value {
    match details {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive_key(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, value)
                    }
                })
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// 序列化失败时写入占位内容，保证事件不丢失
fn encode_details<T: Serialize + ?Sized>(details: &T) -> Value {
    match serde_json::to_value(details) {
        Ok(value) => sanitize(value),
        Err(e) => json!({ "_audit_serialization_error": e.to_string() }),
    }
}

enum Command {
    Write(Box<AuditLogEntry>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// 审计记录器
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    sink: Arc<dyn MonitoringSink>,
    sender: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    /// 队列满时等待入队的条目，每条占用一个许可
    overflow: Arc<Semaphore>,
    /// 等待入队的条目完成交接时通知
    handed_off: Arc<Notify>,
    config: AuditConfig,
}

impl AuditRecorder {
    /// 创建记录器并启动后台写入任务（需在 tokio 运行时内调用）
    pub fn new(store: Arc<dyn AuditStore>, config: AuditConfig) -> Self {
        Self::with_sink(store, Arc::new(MetricsSink), config)
    }

    pub fn with_sink(
        store: Arc<dyn AuditStore>,
        sink: Arc<dyn MonitoringSink>,
        config: AuditConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let worker = tokio::spawn(run_worker(
            receiver,
            store.clone(),
            sink.clone(),
            config.clone(),
        ));

        Self {
            store,
            sink,
            sender,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            overflow: Arc::new(Semaphore::new(config.overflow_limit)),
            handed_off: Arc::new(Notify::new()),
            config,
        }
    }

    /// 记录一条审计日志。永不失败，也不等待写入完成。
    pub fn record<T: Serialize + ?Sized>(&self, params: AuditParams<'_>, details: &T) {
        if let Err(e) = self.try_record(params, details) {
            self.sink.report(params.action, params.entity_id, &e);
        }
    }

    fn try_record<T: Serialize + ?Sized>(
        &self,
        params: AuditParams<'_>,
        details: &T,
    ) -> std::result::Result<(), AuditError> {
        for (field, value) in [
            ("action", params.action),
            ("entity", params.entity),
            ("entity_id", params.entity_id),
        ] {
            if value.trim().is_empty() {
                // 空字段直接忽略，不视为故障
                tracing::debug!(field, "Skipping audit entry with blank field");
                return Ok(());
            }
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(AuditError::Closed);
        }

        let meta = params.meta.cloned().unwrap_or_default();
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            user_id: params
                .actor
                .map(|id| id.to_string())
                .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string()),
            action: params.action.to_string(),
            entity: params.entity.to_string(),
            entity_id: params.entity_id.to_string(),
            details: encode_details(details),
            ip_address: meta.ip_address,
            user_agent: meta.user_agent,
            created_at: chrono::Utc::now(),
        };

        match self.sender.try_send(Command::Write(Box::new(entry))) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                // 队列已满：交给独立任务等待空位，不阻塞调用方
                let handle =
                    tokio::runtime::Handle::try_current().map_err(|_| AuditError::NoRuntime)?;
                let permit = self
                    .overflow
                    .clone()
                    .try_acquire_owned()
                    .map_err(|_| AuditError::Overloaded)?;
                let sender = self.sender.clone();
                let sink = self.sink.clone();
                let handed_off = self.handed_off.clone();
                let action = params.action.to_string();
                let entity_id = params.entity_id.to_string();
                handle.spawn(async move {
                    if sender.send(command).await.is_err() {
                        sink.report(&action, &entity_id, &AuditError::Closed);
                    }
                    drop(permit);
                    handed_off.notify_waiters();
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(AuditError::Closed),
        }

        metrics::counter!("audit.enqueued").increment(1);
        Ok(())
    }

    /// 等待所有队列满时交出的条目进入队列
    async fn wait_for_handoffs(&self) {
        loop {
            // 先注册再检查，避免错过通知
            let notified = self.handed_off.notified();
            if self.overflow.available_permits() == self.config.overflow_limit {
                return;
            }
            notified.await;
        }
    }

    /// 等待此前入队的条目全部处理完毕
    pub async fn flush(&self) {
        self.wait_for_handoffs().await;

        let (tx, rx) = oneshot::channel();
        if self.sender.send(Command::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// 排空队列并停止后台任务
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker = self.worker.lock().ok().and_then(|mut guard| guard.take());
        let drain = async {
            // 关闭信号必须排在所有已交出的条目之后
            self.wait_for_handoffs().await;
            if self.sender.send(Command::Shutdown).await.is_err() {
                return;
            }
            if let Some(worker) = worker {
                let _ = worker.await;
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout(), drain).await {
            Ok(()) => tracing::info!("Audit recorder drained"),
            Err(_) => tracing::warn!(
                timeout_secs = self.config.shutdown_timeout_secs,
                "Audit recorder shutdown timed out; pending entries dropped"
            ),
        }
    }

    /// 查询审计日志
    pub async fn query(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        self.store.query(filters, limit, offset).await
    }

    /// 查询审计日志数量
    pub async fn count(&self, filters: &AuditLogFilters) -> Result<i64> {
        self.store.count(filters).await
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<Command>,
    store: Arc<dyn AuditStore>,
    sink: Arc<dyn MonitoringSink>,
    config: AuditConfig,
) {
    tracing::debug!(capacity = config.queue_capacity, "Audit worker started");

    while let Some(command) = receiver.recv().await {
        match command {
            Command::Write(entry) => write_entry(&*store, &*sink, &config, &entry).await,
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => {
                // 处理关闭信号之前已经排队的条目
                receiver.close();
                while let Some(command) = receiver.recv().await {
                    match command {
                        Command::Write(entry) => {
                            write_entry(&*store, &*sink, &config, &entry).await
                        }
                        Command::Flush(done) => {
                            let _ = done.send(());
                        }
                        Command::Shutdown => {}
                    }
                }
                break;
            }
        }
    }

    tracing::debug!("Audit worker stopped");
}

async fn write_entry(
    store: &dyn AuditStore,
    sink: &dyn MonitoringSink,
    config: &AuditConfig,
    entry: &AuditLogEntry,
) {
    match tokio::time::timeout(config.write_timeout(), store.insert(entry)).await {
        Ok(Ok(())) => {
            metrics::counter!("audit.written").increment(1);
        }
        Ok(Err(e)) => sink.report(&entry.action, &entry.entity_id, &AuditError::Store(e)),
        Err(_) => sink.report(&entry.action, &entry.entity_id, &AuditError::Timeout),
    }
}
