//! Complaint repository (投诉工单数据访问)

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::ComplaintStore;
use crate::{
    error::{AppError, Result},
    models::complaint::Complaint,
};

pub struct PgComplaintStore {
    db: PgPool,
}

impl PgComplaintStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ComplaintStore for PgComplaintStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Complaint>> {
        let complaint = sqlx::query_as::<_, Complaint>("SELECT * FROM complaints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(complaint)
    }

    async fn insert(&self, complaint: &Complaint) -> Result<Complaint> {
        let stored = sqlx::query_as::<_, Complaint>(
            r#"
            INSERT INTO complaints (
                id, title, status, priority, category, assigned_to, escalation_level,
                expected_resolution_at, resolution_notes, resolved_at, resolved_by,
                closed_at, closed_by, reopen_count, reopen_reason, is_archived,
                submitted_by, created_at, updated_at, last_activity_at, version
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11,
                $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21
            ) RETURNING *
            "#,
        )
        .bind(complaint.id)
        .bind(&complaint.title)
        .bind(complaint.status)
        .bind(complaint.priority)
        .bind(&complaint.category)
        .bind(complaint.assigned_to)
        .bind(complaint.escalation_level)
        .bind(complaint.expected_resolution_at)
        .bind(&complaint.resolution_notes)
        .bind(complaint.resolved_at)
        .bind(complaint.resolved_by)
        .bind(complaint.closed_at)
        .bind(complaint.closed_by)
        .bind(complaint.reopen_count)
        .bind(&complaint.reopen_reason)
        .bind(complaint.is_archived)
        .bind(complaint.submitted_by)
        .bind(complaint.created_at)
        .bind(complaint.updated_at)
        .bind(complaint.last_activity_at)
        .bind(complaint.version)
        .fetch_one(&self.db)
        .await?;

        Ok(stored)
    }

    /// 乐观锁更新：版本号不匹配时拒绝第二个写入者
    async fn update(&self, complaint: &Complaint, expected_version: i64) -> Result<Complaint> {
        let updated = sqlx::query_as::<_, Complaint>(
            r#"
            UPDATE complaints
            SET
                status = $3,
                assigned_to = $4,
                escalation_level = $5,
                expected_resolution_at = $6,
                resolution_notes = $7,
                resolved_at = $8,
                resolved_by = $9,
                closed_at = $10,
                closed_by = $11,
                reopen_count = $12,
                reopen_reason = $13,
                updated_at = $14,
                last_activity_at = $15,
                version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(complaint.id)
        .bind(expected_version)
        .bind(complaint.status)
        .bind(complaint.assigned_to)
        .bind(complaint.escalation_level)
        .bind(complaint.expected_resolution_at)
        .bind(&complaint.resolution_notes)
        .bind(complaint.resolved_at)
        .bind(complaint.resolved_by)
        .bind(complaint.closed_at)
        .bind(complaint.closed_by)
        .bind(complaint.reopen_count)
        .bind(&complaint.reopen_reason)
        .bind(complaint.updated_at)
        .bind(complaint.last_activity_at)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                AppError::not_found(format!(
                    "user {}",
                    complaint.assigned_to.map(|id| id.to_string()).unwrap_or_default()
                ))
            }
            _ => AppError::Database(e),
        })?;

        updated.ok_or_else(|| {
            tracing::warn!(
                complaint_id = %complaint.id,
                expected_version,
                "Stale complaint write rejected"
            );
            AppError::conflict(format!(
                "complaint {} was modified concurrently; reload and retry",
                complaint.id
            ))
        })
    }
}
