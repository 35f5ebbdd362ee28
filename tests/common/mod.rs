//! 测试公共模块
//! 基于内存存储组装服务，不依赖外部数据库

#![allow(dead_code)]

use complaint_desk::{
    config::{AuditConfig, AuthorizationConfig, SecurityConfig},
    middleware::AppState,
    models::{
        access::Actor,
        audit::AuditLogEntry,
        complaint::{Complaint, ComplaintPriority, ComplaintStatus},
        role::{parse_conditions, Conditions, NewPermission},
    },
    realtime::EventBus,
    repository::{ComplaintStore, InMemoryStore, RoleStore},
    services::{
        audit_service::{AuditError, MonitoringSink},
        AuditRecorder, AuthorizationService, ComplaintWorkflowService, RoleService,
    },
};
use secrecy::Secret;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-testing-only-min-32-chars";

/// 创建测试安全配置
pub fn test_security_config() -> SecurityConfig {
    SecurityConfig {
        jwt_secret: Secret::new(TEST_JWT_SECRET.to_string()),
        trust_proxy: true,
        access_token_exp_secs: 300,
    }
}

/// 收集审计失败，替代默认的指标上报
#[derive(Default)]
pub struct CollectingSink {
    failures: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl MonitoringSink for CollectingSink {
    fn report(&self, action: &str, _entity_id: &str, error: &AuditError) {
        self.failures
            .lock()
            .unwrap()
            .push(format!("{}: {}", action, error));
    }
}

/// 服务层测试夹具
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub sink: Arc<CollectingSink>,
    pub audit: Arc<AuditRecorder>,
    pub authz: Arc<AuthorizationService>,
    pub roles: Arc<RoleService>,
    pub workflow: Arc<ComplaintWorkflowService>,
    pub events: EventBus,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(AuthorizationConfig::default(), AuditConfig::default())
    }

    pub fn with_config(authorization: AuthorizationConfig, audit: AuditConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(CollectingSink::default());
        let events = EventBus::default();

        let audit = Arc::new(AuditRecorder::with_sink(store.clone(), sink.clone(), audit));
        let authz = Arc::new(AuthorizationService::new(
            store.clone(),
            audit.clone(),
            authorization,
        ));
        let roles = Arc::new(RoleService::new(store.clone(), audit.clone()));
        let workflow = Arc::new(ComplaintWorkflowService::new(
            store.clone(),
            authz.clone(),
            audit.clone(),
            events.clone(),
        ));

        Self {
            store,
            sink,
            audit,
            authz,
            roles,
            workflow,
            events,
        }
    }

    /// 通过一个专属角色授予权限（权限不存在时创建）
    pub async fn grant(&self, user_id: Uuid, permission_name: &str) {
        self.grant_with_conditions(user_id, permission_name, None).await;
    }

    pub async fn grant_with_conditions(
        &self,
        user_id: Uuid,
        permission_name: &str,
        conditions: Option<Conditions>,
    ) {
        if conditions.is_none() {
            grant_to(&self.store, user_id, permission_name).await;
            return;
        }

        let (resource, action) = permission_name
            .split_once('.')
            .unwrap_or((permission_name, "*"));
        self.grant_new(
            user_id,
            NewPermission {
                name: permission_name.to_string(),
                resource: resource.to_string(),
                action: action.to_string(),
                description: None,
                conditions,
            },
        )
        .await;
    }

    /// 创建权限并经由新角色授予用户
    pub async fn grant_new(&self, user_id: Uuid, permission: NewPermission) {
        let permission = self.store.insert_permission(&permission).await.unwrap();
        attach_via_new_role(&self.store, user_id, permission.id).await;
    }

    /// 新用户，并授予给定权限
    pub async fn user_with(&self, permission_names: &[&str]) -> Actor {
        let actor = Actor::new(Uuid::new_v4());
        for name in permission_names {
            self.grant(actor.user_id, name).await;
        }
        actor
    }

    /// 插入一条指定状态的投诉
    pub async fn complaint_in(&self, status: ComplaintStatus) -> Complaint {
        self.complaint_with(status, "billing").await
    }

    pub async fn complaint_with(&self, status: ComplaintStatus, category: &str) -> Complaint {
        let mut complaint = Complaint::new("Overcharged on invoice", category, ComplaintPriority::High);
        complaint.status = status;
        ComplaintStore::insert(&*self.store, &complaint).await.unwrap()
    }

    pub async fn reload(&self, complaint_id: Uuid) -> Complaint {
        self.store.find_by_id(complaint_id).await.unwrap().unwrap()
    }

    /// 等待审计队列落库后返回全部条目
    pub async fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit.flush().await;
        self.store.audit_entries().await
    }

    pub async fn audit_actions(&self) -> Vec<String> {
        self.audit_entries()
            .await
            .into_iter()
            .map(|entry| entry.action)
            .collect()
    }
}

/// 授予无条件权限（权限不存在时创建）
pub async fn grant_to(store: &InMemoryStore, user_id: Uuid, permission_name: &str) {
    let permission = match store.find_permission_by_name(permission_name).await.unwrap() {
        Some(existing) => existing,
        None => {
            let (resource, action) = permission_name
                .split_once('.')
                .unwrap_or((permission_name, "*"));
            store
                .insert_permission(&NewPermission {
                    name: permission_name.to_string(),
                    resource: resource.to_string(),
                    action: action.to_string(),
                    description: None,
                    conditions: None,
                })
                .await
                .unwrap()
        }
    };
    attach_via_new_role(store, user_id, permission.id).await;
}

async fn attach_via_new_role(store: &InMemoryStore, user_id: Uuid, permission_id: Uuid) {
    let role = store
        .insert_role(&format!("role-{}", Uuid::new_v4()), None, false)
        .await
        .unwrap();
    store.grant_permission(role.id, permission_id).await.unwrap();
    store.assign_role(user_id, role.id).await.unwrap();
}

/// 由 (属性, 期望值) 列表构造条件
pub fn conditions(pairs: &[(&str, Value)]) -> Conditions {
    let raw: Map<String, Value> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect();
    parse_conditions(&raw).unwrap()
}

/// HTTP 测试用应用状态
pub fn create_test_app_state(store: Arc<InMemoryStore>) -> Arc<AppState> {
    Arc::new(
        AppState::assemble(
            None,
            store.clone(),
            store.clone(),
            store,
            &test_security_config(),
            AuthorizationConfig::default(),
            AuditConfig::default(),
        )
        .expect("Failed to assemble app state"),
    )
}

/// 签发测试访问令牌
pub fn issue_token(state: &AppState, user_id: Uuid) -> String {
    state
        .jwt_service
        .generate_access_token(&user_id, "tester", Default::default())
        .expect("Failed to issue token")
}
