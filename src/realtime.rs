//! 投诉事件通知
//! 通知是尽力而为的：发布失败只记录日志，不影响审计写入

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::complaint::ComplaintStatus,
};

/// 投诉事件类型
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComplaintEvent {
    /// 工单被分配
    Assigned {
        complaint_id: Uuid,
        assigned_to: Uuid,
        assigned_by: Uuid,
    },
    /// 状态变更
    StatusChanged {
        complaint_id: Uuid,
        old_status: ComplaintStatus,
        new_status: ComplaintStatus,
        changed_by: Uuid,
    },
    /// 升级
    Escalated {
        complaint_id: Uuid,
        level: i32,
        escalated_by: Uuid,
    },
}

impl ComplaintEvent {
    pub fn complaint_id(&self) -> Uuid {
        match self {
            ComplaintEvent::Assigned { complaint_id, .. }
            | ComplaintEvent::StatusChanged { complaint_id, .. }
            | ComplaintEvent::Escalated { complaint_id, .. } => *complaint_id,
        }
    }

    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            ComplaintEvent::Assigned { .. } => "assigned",
            ComplaintEvent::StatusChanged { .. } => "status_changed",
            ComplaintEvent::Escalated { .. } => "escalated",
        }
    }
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ComplaintEvent>,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// 发布事件，没有订阅者时返回错误
    pub fn publish(&self, event: ComplaintEvent) -> Result<usize> {
        self.sender
            .send(event)
            .map_err(|e| AppError::internal_error(format!("failed to publish event: {}", e)))
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<ComplaintEvent> {
        self.sender.subscribe()
    }

    /// 只接收指定工单的事件
    pub fn subscribe_to_complaint(&self, complaint_id: Uuid) -> ComplaintEventStream {
        ComplaintEventStream {
            receiver: self.subscribe(),
            complaint_id,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 单个工单的事件流
pub struct ComplaintEventStream {
    receiver: broadcast::Receiver<ComplaintEvent>,
    complaint_id: Uuid,
}

impl ComplaintEventStream {
    /// 下一条相关事件；总线关闭时返回 None
    pub async fn next(&mut self) -> Option<ComplaintEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.complaint_id() == self.complaint_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Complaint event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
