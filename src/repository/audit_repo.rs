//! Audit repository (审计数据访问)
//! 仅追加写入，不提供更新与删除

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::AuditStore;
use crate::{error::Result, models::audit::*};

pub struct PgAuditStore {
    db: PgPool,
}

impl PgAuditStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// 拼接 WHERE 子句，返回下一个占位符序号
fn push_filter_clauses(query: &mut String, filters: &AuditLogFilters) -> usize {
    let mut index = 0;

    if filters.user_id.is_some() {
        index += 1;
        query.push_str(&format!(" AND user_id = ${}", index));
    }
    if filters.action.is_some() {
        index += 1;
        query.push_str(&format!(" AND action = ${}", index));
    }
    if filters.entity.is_some() {
        index += 1;
        query.push_str(&format!(" AND entity = ${}", index));
    }
    if filters.entity_id.is_some() {
        index += 1;
        query.push_str(&format!(" AND entity_id = ${}", index));
    }
    if filters.start_time.is_some() {
        index += 1;
        query.push_str(&format!(" AND created_at >= ${}", index));
    }
    if filters.end_time.is_some() {
        index += 1;
        query.push_str(&format!(" AND created_at <= ${}", index));
    }

    index
}

/// 按 push_filter_clauses 的顺序绑定参数
macro_rules! bind_filters {
    ($builder:expr, $filters:expr) => {{
        let mut builder = $builder;
        if let Some(user_id) = &$filters.user_id {
            builder = builder.bind(user_id);
        }
        if let Some(action) = &$filters.action {
            builder = builder.bind(action);
        }
        if let Some(entity) = &$filters.entity {
            builder = builder.bind(entity);
        }
        if let Some(entity_id) = &$filters.entity_id {
            builder = builder.bind(entity_id);
        }
        if let Some(start_time) = $filters.start_time {
            builder = builder.bind(start_time);
        }
        if let Some(end_time) = $filters.end_time {
            builder = builder.bind(end_time);
        }
        builder
    }};
}

#[async_trait]
impl AuditStore for PgAuditStore {
    /// 插入审计日志
    async fn insert(&self, entry: &AuditLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, user_id, action, entity, entity_id, details, ip_address, user_agent, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.user_id)
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(&entry.entity_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 查询审计日志
    async fn query(
        &self,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut query = String::from("SELECT * FROM audit_logs WHERE 1=1");
        let index = push_filter_clauses(&mut query, filters);
        query.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            index + 1,
            index + 2
        ));

        let builder = bind_filters!(sqlx::query_as::<_, AuditLogEntry>(&query), filters);
        let logs = builder.bind(limit).bind(offset).fetch_all(&self.db).await?;

        Ok(logs)
    }

    /// 统计审计日志数量
    async fn count(&self, filters: &AuditLogFilters) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) FROM audit_logs WHERE 1=1");
        push_filter_clauses(&mut query, filters);

        let builder = bind_filters!(sqlx::query(&query), filters);
        let count: i64 = builder.fetch_one(&self.db).await?.get(0);

        Ok(count)
    }
}
