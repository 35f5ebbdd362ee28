//! 投诉工作流服务
//!
//! 每个操作依次执行：加载 -> 鉴权 -> 校验 -> 变更 -> 通知（尽力而为）-> 审计。
//! 鉴权失败或校验失败时工单保持不变。

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, Result},
    models::{
        access::{Actor, Environment},
        audit::{AuditLogFilters, AuditLogPage},
        complaint::*,
        lifecycle::{is_final, validate_transition, TransitionRequest},
    },
    realtime::{ComplaintEvent, EventBus},
    repository::ComplaintStore,
    services::{
        audit_service::{AuditAction, AuditParams, AuditRecorder},
        authorization_service::AuthorizationService,
    },
};

/// 工作流所需的权限名
pub mod permissions {
    pub const ASSIGN: &str = "complaint.assign";
    pub const RESOLVE: &str = "complaint.resolve";
    pub const CLOSE: &str = "complaint.close";
    pub const REOPEN: &str = "complaint.reopen";
    pub const ESCALATE: &str = "complaint.escalate";
    pub const UPDATE: &str = "complaint.update";
    pub const READ: &str = "complaint.read";
    pub const AUDIT_READ: &str = "audit.read";
}

const ENTITY: &str = "complaint";

pub struct ComplaintWorkflowService {
    complaints: Arc<dyn ComplaintStore>,
    authz: Arc<AuthorizationService>,
    audit: Arc<AuditRecorder>,
    events: EventBus,
}

impl ComplaintWorkflowService {
    pub fn new(
        complaints: Arc<dyn ComplaintStore>,
        authz: Arc<AuthorizationService>,
        audit: Arc<AuditRecorder>,
        events: EventBus,
    ) -> Self {
        Self {
            complaints,
            authz,
            audit,
            events,
        }
    }

    /// 查看工单
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn get_complaint(&self, actor: &Actor, complaint_id: Uuid) -> Result<Complaint> {
        self.load_authorized(actor, complaint_id, permissions::READ).await
    }

    /// 工单审计历史（最新在前）
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub async fn history(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<AuditLogPage> {
        self.load_authorized(actor, complaint_id, permissions::AUDIT_READ)
            .await?;

        // 先让已入队的条目落库
        self.audit.flush().await;

        let filters = AuditLogFilters::for_entity(ENTITY, &complaint_id.to_string());
        let items = self.audit.query(&filters, limit, offset).await?;
        let total = self.audit.count(&filters).await?;

        Ok(AuditLogPage { items, total })
    }

    /// 分配处理人；未在处理中的工单同时进入 in_progress
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn assign(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        request: AssignComplaintRequest,
    ) -> Result<Complaint> {
        let complaint = self
            .load_authorized(actor, complaint_id, permissions::ASSIGN)
            .await?;
        request.validate()?;
        check_version(&complaint, request.expected_version)?;

        if is_final(complaint.status) {
            return Err(AppError::validation(format!(
                "cannot assign a complaint in final state {}",
                complaint.status
            )));
        }

        let now = Utc::now();
        let mut updated = complaint.clone();
        if complaint.status != ComplaintStatus::InProgress {
            let transition = TransitionRequest::to(ComplaintStatus::InProgress);
            validate_transition(complaint.status, &transition, now)?;
            apply_transition(&mut updated, &transition, actor.user_id, now);
        }
        updated.assigned_to = Some(request.assigned_to);
        updated.touch(now);

        let saved = self.persist(&updated, complaint.version, "assign").await?;

        self.notify(ComplaintEvent::Assigned {
            complaint_id,
            assigned_to: request.assigned_to,
            assigned_by: actor.user_id,
        });
        self.notify_status_change(&complaint, &saved, actor.user_id);
        self.record(
            actor,
            AuditAction::ComplaintAssign,
            complaint_id,
            json!({
                "assigned_to": request.assigned_to,
                "previous_assignee": complaint.assigned_to,
                "old_status": complaint.status,
                "new_status": saved.status,
            }),
        );

        Ok(saved)
    }

    /// 标记为已解决
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn resolve(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        request: ResolveComplaintRequest,
    ) -> Result<Complaint> {
        let transition = TransitionRequest::to(ComplaintStatus::Resolved)
            .with_resolution_notes(&request.resolution_notes);

        self.transition(
            actor,
            complaint_id,
            permissions::RESOLVE,
            request.validate().map_err(AppError::from),
            AuditAction::ComplaintResolve,
            &transition,
            request.expected_version,
            json!({ "resolution_notes": request.resolution_notes }),
        )
        .await
    }

    /// 关闭工单
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn close(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        request: CloseComplaintRequest,
    ) -> Result<Complaint> {
        self.transition(
            actor,
            complaint_id,
            permissions::CLOSE,
            Ok(()),
            AuditAction::ComplaintClose,
            &TransitionRequest::to(ComplaintStatus::Closed),
            request.expected_version,
            json!({}),
        )
        .await
    }

    /// 重新打开工单，reopen_count 加一
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn reopen(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        request: ReopenComplaintRequest,
    ) -> Result<Complaint> {
        let transition =
            TransitionRequest::to(ComplaintStatus::Reopened).with_reopen_reason(&request.reason);

        self.transition(
            actor,
            complaint_id,
            permissions::REOPEN,
            request.validate().map_err(AppError::from),
            AuditAction::ComplaintReopen,
            &transition,
            request.expected_version,
            json!({ "reopen_reason": request.reason }),
        )
        .await
    }

    /// 升级工单；级别必须高于当前级别且不超过上限
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id))]
    pub async fn escalate(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        request: EscalateComplaintRequest,
    ) -> Result<Complaint> {
        let complaint = self
            .load_authorized(actor, complaint_id, permissions::ESCALATE)
            .await?;
        request.validate()?;
        check_version(&complaint, request.expected_version)?;

        if request.level <= complaint.escalation_level {
            return Err(AppError::validation(format!(
                "escalation level must be above the current level {}",
                complaint.escalation_level
            )));
        }
        if request.level > MAX_ESCALATION_LEVEL {
            return Err(AppError::validation(format!(
                "escalation level must not exceed {}",
                MAX_ESCALATION_LEVEL
            )));
        }

        let now = Utc::now();
        let mut updated = complaint.clone();
        // 已升级的工单只提高级别，不发生状态转移
        if complaint.status != ComplaintStatus::Escalated {
            let transition = TransitionRequest::to(ComplaintStatus::Escalated);
            validate_transition(complaint.status, &transition, now)?;
            apply_transition(&mut updated, &transition, actor.user_id, now);
        }
        updated.escalation_level = request.level;
        updated.touch(now);

        let saved = self.persist(&updated, complaint.version, "escalate").await?;

        self.notify(ComplaintEvent::Escalated {
            complaint_id,
            level: saved.escalation_level,
            escalated_by: actor.user_id,
        });
        self.notify_status_change(&complaint, &saved, actor.user_id);
        self.record(
            actor,
            AuditAction::ComplaintEscalate,
            complaint_id,
            json!({
                "previous_level": complaint.escalation_level,
                "level": saved.escalation_level,
                "old_status": complaint.status,
                "new_status": saved.status,
            }),
        );

        Ok(saved)
    }

    /// 通用状态变更（例如挂起、恢复处理）
    ///
    /// 解决、关闭、重开、升级有各自的权限和规则，不能经由此入口完成。
    #[instrument(skip(self, actor, request), fields(actor = %actor.user_id, target = %request.status))]
    pub async fn change_status(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        request: ChangeStatusRequest,
    ) -> Result<Complaint> {
        let request_check = request
            .validate()
            .map_err(AppError::from)
            .and_then(|_| reject_dedicated_target(request.status));

        let mut transition = TransitionRequest::to(request.status)
            .with_expected_resolution_at(request.expected_resolution_at);
        if let Some(notes) = request.resolution_notes.as_deref() {
            transition = transition.with_resolution_notes(notes);
        }
        if let Some(reason) = request.reopen_reason.as_deref() {
            transition = transition.with_reopen_reason(reason);
        }

        self.transition(
            actor,
            complaint_id,
            permissions::UPDATE,
            request_check,
            AuditAction::ComplaintStatusChange,
            &transition,
            request.expected_version,
            json!({
                "resolution_notes": request.resolution_notes,
                "reopen_reason": request.reopen_reason,
                "expected_resolution_at": request.expected_resolution_at,
            }),
        )
        .await
    }

    /// 纯状态转移类操作的公共流程
    #[allow(clippy::too_many_arguments)]
    async fn transition(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        permission: &str,
        request_check: Result<()>,
        action: AuditAction,
        transition: &TransitionRequest<'_>,
        expected_version: Option<i64>,
        mut details: Value,
    ) -> Result<Complaint> {
        let complaint = self.load_authorized(actor, complaint_id, permission).await?;
        request_check?;
        check_version(&complaint, expected_version)?;

        let now = Utc::now();
        validate_transition(complaint.status, transition, now)?;

        let mut updated = complaint.clone();
        apply_transition(&mut updated, transition, actor.user_id, now);
        updated.touch(now);

        let operation = action.as_str().trim_start_matches("complaint.");
        let saved = self.persist(&updated, complaint.version, operation).await?;

        self.notify_status_change(&complaint, &saved, actor.user_id);

        if let Value::Object(map) = &mut details {
            map.insert("old_status".into(), json!(complaint.status));
            map.insert("new_status".into(), json!(saved.status));
        }
        self.record(actor, action, complaint_id, details);

        Ok(saved)
    }

    /// 加载并鉴权。工单不存在时按调用方自身环境鉴权，未授权者得到 Forbidden 而非 NotFound
    async fn load_authorized(
        &self,
        actor: &Actor,
        complaint_id: Uuid,
        permission: &str,
    ) -> Result<Complaint> {
        match self.complaints.find_by_id(complaint_id).await? {
            Some(complaint) => {
                self.authorize(actor, &complaint, permission).await?;
                Ok(complaint)
            }
            None => {
                self.authz.require_permission(actor, permission).await?;
                Err(AppError::not_found(format!("complaint {}", complaint_id)))
            }
        }
    }

    /// 以工单属性补充调用方环境后鉴权，工单属性优先
    async fn authorize(&self, actor: &Actor, complaint: &Complaint, permission: &str) -> Result<()> {
        let scoped = Actor {
            user_id: actor.user_id,
            meta: actor.meta.clone(),
            environment: complaint_environment(&actor.environment, complaint, actor.user_id),
        };
        self.authz.require_permission(&scoped, permission).await
    }

    async fn persist(
        &self,
        updated: &Complaint,
        expected_version: i64,
        operation: &str,
    ) -> Result<Complaint> {
        let saved = self.complaints.update(updated, expected_version).await?;

        metrics::counter!("workflow.transitions", "operation" => operation.to_string())
            .increment(1);
        tracing::info!(
            complaint_id = %saved.id,
            operation,
            status = %saved.status,
            version = saved.version,
            "Complaint updated"
        );

        Ok(saved)
    }

    fn notify_status_change(&self, before: &Complaint, after: &Complaint, changed_by: Uuid) {
        if before.status != after.status {
            self.notify(ComplaintEvent::StatusChanged {
                complaint_id: after.id,
                old_status: before.status,
                new_status: after.status,
                changed_by,
            });
        }
    }

    /// 通知失败只记录日志
    fn notify(&self, event: ComplaintEvent) {
        let event_type = event.event_type();
        let complaint_id = event.complaint_id();
        if let Err(e) = self.events.publish(event) {
            tracing::debug!(
                complaint_id = %complaint_id,
                event_type,
                error = %e,
                "Complaint notification not delivered"
            );
        }
    }

    fn record(&self, actor: &Actor, action: AuditAction, complaint_id: Uuid, details: Value) {
        let entity_id = complaint_id.to_string();
        self.audit.record(
            AuditParams::new(action, ENTITY, &entity_id)
                .actor(actor.user_id)
                .meta(&actor.meta),
            &details,
        );
    }
}

fn check_version(complaint: &Complaint, expected_version: Option<i64>) -> Result<()> {
    match expected_version {
        Some(expected) if expected != complaint.version => Err(AppError::conflict(format!(
            "complaint {} is at version {}, expected {}",
            complaint.id, complaint.version, expected
        ))),
        _ => Ok(()),
    }
}

/// 有专属操作的目标状态
fn reject_dedicated_target(target: ComplaintStatus) -> Result<()> {
    let operation = match target {
        ComplaintStatus::Resolved => "resolve",
        ComplaintStatus::Closed => "close",
        ComplaintStatus::Reopened => "reopen",
        ComplaintStatus::Escalated => "escalate",
        _ => return Ok(()),
    };
    Err(AppError::validation(format!(
        "status {} must be set through the {} operation",
        target, operation
    )))
}

/// 调用方环境 + 工单属性
pub fn complaint_environment(
    base: &Environment,
    complaint: &Complaint,
    user_id: Uuid,
) -> Environment {
    let mut environment = base.clone();
    environment.insert("complaint.category".into(), json!(complaint.category));
    environment.insert("complaint.priority".into(), json!(complaint.priority.as_str()));
    environment.insert("complaint.status".into(), json!(complaint.status.as_str()));
    environment.insert(
        "complaint.is_assignee".into(),
        json!(complaint.assigned_to == Some(user_id)),
    );
    environment
}

/// 写入目标状态及其附带字段（调用前已通过校验）
fn apply_transition(
    complaint: &mut Complaint,
    transition: &TransitionRequest<'_>,
    actor: Uuid,
    now: DateTime<Utc>,
) {
    complaint.status = transition.target;

    match transition.target {
        ComplaintStatus::Resolved => {
            complaint.resolution_notes = transition.resolution_notes.map(str::to_string);
            complaint.resolved_at = Some(now);
            complaint.resolved_by = Some(actor);
        }
        ComplaintStatus::Closed | ComplaintStatus::Unresolved => {
            complaint.closed_at = Some(now);
            complaint.closed_by = Some(actor);
        }
        ComplaintStatus::Reopened => {
            complaint.reopen_count += 1;
            complaint.reopen_reason = transition.reopen_reason.map(str::to_string);
            complaint.resolved_at = None;
            complaint.resolved_by = None;
            complaint.closed_at = None;
            complaint.closed_by = None;
        }
        _ => {}
    }

    if transition.expected_resolution_at.is_some() {
        complaint.expected_resolution_at = transition.expected_resolution_at;
    }
}
