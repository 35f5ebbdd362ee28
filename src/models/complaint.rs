//! 投诉工单模型
//! 状态只能通过工作流操作按转移表变更

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// 最高升级级别
pub const MAX_ESCALATION_LEVEL: i32 = 3;

/// 投诉状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    /// 新建（初始状态）
    Open,
    /// 处理中
    InProgress,
    /// 已解决
    Resolved,
    /// 已关闭
    Closed,
    /// 未解决（结案但问题未处理）
    Unresolved,
    /// 已升级
    Escalated,
    /// 挂起
    OnHold,
    /// 重新打开
    Reopened,
}

impl ComplaintStatus {
    pub const ALL: [ComplaintStatus; 8] = [
        ComplaintStatus::Open,
        ComplaintStatus::InProgress,
        ComplaintStatus::Resolved,
        ComplaintStatus::Closed,
        ComplaintStatus::Unresolved,
        ComplaintStatus::Escalated,
        ComplaintStatus::OnHold,
        ComplaintStatus::Reopened,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintStatus::Open => "open",
            ComplaintStatus::InProgress => "in_progress",
            ComplaintStatus::Resolved => "resolved",
            ComplaintStatus::Closed => "closed",
            ComplaintStatus::Unresolved => "unresolved",
            ComplaintStatus::Escalated => "escalated",
            ComplaintStatus::OnHold => "on_hold",
            ComplaintStatus::Reopened => "reopened",
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComplaintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComplaintStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid complaint status: {}", s))
    }
}

/// 投诉优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "complaint_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ComplaintPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ComplaintPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplaintPriority::Low => "low",
            ComplaintPriority::Medium => "medium",
            ComplaintPriority::High => "high",
            ComplaintPriority::Critical => "critical",
        }
    }
}

/// 投诉工单
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Complaint {
    pub id: Uuid,
    pub title: String,
    pub status: ComplaintStatus,
    pub priority: ComplaintPriority,
    pub category: String,
    pub assigned_to: Option<Uuid>,
    pub escalation_level: i32,
    pub expected_resolution_at: Option<DateTime<Utc>>,

    // 结案信息
    pub resolution_notes: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,

    // 重开信息
    pub reopen_count: i32,
    pub reopen_reason: Option<String>,

    /// 归档是独立标记，不是状态
    pub is_archived: bool,

    // 审计字段
    pub submitted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,

    /// 乐观锁版本号，每次变更 +1
    pub version: i64,
}

impl Complaint {
    /// 新建一条 open 状态的投诉（提交流程本身不在本模块内）
    pub fn new(title: &str, category: &str, priority: ComplaintPriority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            status: ComplaintStatus::Open,
            priority,
            category: category.to_string(),
            assigned_to: None,
            escalation_level: 0,
            expected_resolution_at: None,
            resolution_notes: None,
            resolved_at: None,
            resolved_by: None,
            closed_at: None,
            closed_by: None,
            reopen_count: 0,
            reopen_reason: None,
            is_archived: false,
            submitted_by: None,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
            version: 1,
        }
    }

    /// 标记一次活动
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
        self.last_activity_at = now;
    }
}

/// 分配请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignComplaintRequest {
    pub assigned_to: Uuid,
    pub expected_version: Option<i64>,
}

/// 解决请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResolveComplaintRequest {
    #[validate(length(max = 5000))]
    pub resolution_notes: String,
    pub expected_version: Option<i64>,
}

/// 关闭请求
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CloseComplaintRequest {
    pub expected_version: Option<i64>,
}

/// 重开请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReopenComplaintRequest {
    #[validate(length(max = 2000))]
    pub reason: String,
    pub expected_version: Option<i64>,
}

/// 升级请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EscalateComplaintRequest {
    #[validate(range(min = 1, max = 3, message = "escalation level must be between 1 and 3"))]
    pub level: i32,
    pub expected_version: Option<i64>,
}

/// 通用状态变更请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangeStatusRequest {
    pub status: ComplaintStatus,
    #[validate(length(max = 5000))]
    pub resolution_notes: Option<String>,
    #[validate(length(max = 2000))]
    pub reopen_reason: Option<String>,
    pub expected_resolution_at: Option<DateTime<Utc>>,
    pub expected_version: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in ComplaintStatus::ALL {
            let parsed: ComplaintStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("archived".parse::<ComplaintStatus>().is_err());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&ComplaintStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let status: ComplaintStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(status, ComplaintStatus::OnHold);
    }

    #[test]
    fn test_new_complaint_starts_open() {
        let complaint = Complaint::new("Late refund", "billing", ComplaintPriority::High);
        assert_eq!(complaint.status, ComplaintStatus::Open);
        assert_eq!(complaint.reopen_count, 0);
        assert_eq!(complaint.escalation_level, 0);
        assert_eq!(complaint.version, 1);
        assert!(!complaint.is_archived);
    }

    #[test]
    fn test_escalate_request_range() {
        let ok = EscalateComplaintRequest {
            level: 2,
            expected_version: None,
        };
        assert!(ok.validate().is_ok());

        let too_high = EscalateComplaintRequest {
            level: 4,
            expected_version: None,
        };
        assert!(too_high.validate().is_err());
    }
}
