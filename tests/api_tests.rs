//! HTTP API 集成测试

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use complaint_desk::{
    models::complaint::{Complaint, ComplaintPriority, ComplaintStatus},
    repository::{ComplaintStore, InMemoryStore},
    routes::create_router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::{create_test_app_state, grant_to, issue_token};

struct TestApp {
    store: Arc<InMemoryStore>,
    state: Arc<complaint_desk::middleware::AppState>,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let state = create_test_app_state(store.clone());
        let router = create_router(state.clone());
        Self {
            store,
            state,
            router,
        }
    }

    /// 新用户及其令牌
    async fn user(&self, permissions: &[&str]) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        for name in permissions {
            grant_to(&self.store, user_id, name).await;
        }
        (user_id, issue_token(&self.state, user_id))
    }

    async fn complaint(&self, status: ComplaintStatus) -> Complaint {
        let mut complaint = Complaint::new("Water outage", "utilities", ComplaintPriority::Critical);
        complaint.status = status;
        ComplaintStore::insert(&*self.store, &complaint).await.unwrap()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

fn post_json(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new();

    let (status, body) = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "in_memory");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_requests_without_token_rejected() {
    let app = TestApp::new();
    let complaint = app.complaint(ComplaintStatus::Open).await;

    let (status, body) = app
        .send(
            Request::builder()
                .uri(format!("/api/v1/complaints/{}", complaint.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "unauthorized");

    let (status, _) = app
        .send(get(&format!("/api/v1/complaints/{}", complaint.id), "not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_assign_over_http() {
    let app = TestApp::new();
    let (_, token) = app.user(&["complaint.assign", "audit.read"]).await;
    let complaint = app.complaint(ComplaintStatus::Open).await;
    let agent = Uuid::new_v4();

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/complaints/{}/assign", complaint.id))
        .header("authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .header("x-forwarded-for", "198.51.100.4, 10.0.0.2")
        .header("user-agent", "desk-client/1.0")
        .body(Body::from(json!({ "assigned_to": agent }).to_string()))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["assigned_to"], agent.to_string());

    let (status, history) = app
        .send(get(
            &format!("/api/v1/complaints/{}/history", complaint.id),
            &token,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 1);
    let entry = &history["items"][0];
    assert_eq!(entry["action"], "complaint.assign");
    assert_eq!(entry["ip_address"], "198.51.100.4");
    assert_eq!(entry["user_agent"], "desk-client/1.0");
}

#[tokio::test]
async fn test_forbidden_response_names_permission() {
    let app = TestApp::new();
    let (_, token) = app.user(&["complaint.read"]).await;
    let complaint = app.complaint(ComplaintStatus::InProgress).await;

    let (status, body) = app
        .send(post_json(
            &format!("/api/v1/complaints/{}/resolve", complaint.id),
            &token,
            json!({ "resolution_notes": "done" }),
        ))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "forbidden");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("complaint.resolve"));

    let stored = app.store.find_by_id(complaint.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ComplaintStatus::InProgress);
}

#[tokio::test]
async fn test_invalid_transition_is_unprocessable() {
    let app = TestApp::new();
    let (_, token) = app.user(&["complaint.resolve"]).await;
    let complaint = app.complaint(ComplaintStatus::Open).await;

    let (status, body) = app
        .send(post_json(
            &format!("/api/v1/complaints/{}/resolve", complaint.id),
            &token,
            json!({ "resolution_notes": "done" }),
        ))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "validation");
}

#[tokio::test]
async fn test_stale_version_is_conflict() {
    let app = TestApp::new();
    let (_, token) = app.user(&["complaint.escalate"]).await;
    let complaint = app.complaint(ComplaintStatus::Open).await;

    let (status, _) = app
        .send(post_json(
            &format!("/api/v1/complaints/{}/escalate", complaint.id),
            &token,
            json!({ "level": 1, "expected_version": complaint.version + 5 }),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_close_without_body() {
    let app = TestApp::new();
    let (_, token) = app.user(&["complaint.close"]).await;
    let complaint = app.complaint(ComplaintStatus::Resolved).await;

    let (status, body) = app
        .send(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/complaints/{}/close", complaint.id))
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");
}

#[tokio::test]
async fn test_permission_check_endpoint() {
    let app = TestApp::new();
    let (user_id, token) = app.user(&["complaint.read"]).await;

    let (status, body) = app
        .send(post_json(
            "/api/v1/authz/check",
            &token,
            json!({ "permission": "complaint.read" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, body) = app
        .send(post_json(
            "/api/v1/authz/check",
            &token,
            json!({ "resource": "complaint", "action": "close" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert!(body["reason"].is_string());

    // 查询自己的权限无需 role.read
    let (status, body) = app
        .send(get(&format!("/api/v1/users/{}/permissions", user_id), &token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _) = app
        .send(get(
            &format!("/api/v1/users/{}/permissions", Uuid::new_v4()),
            &token,
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_role_admin_over_http() {
    let app = TestApp::new();
    let (_, token) = app.user(&["role.manage", "role.read"]).await;
    let member = Uuid::new_v4();

    let (status, role) = app
        .send(post_json(
            "/api/v1/roles",
            &token,
            json!({ "name": "agent", "description": "front line" }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, permission) = app
        .send(post_json(
            "/api/v1/permissions",
            &token,
            json!({
                "name": "complaint.assign",
                "resource": "complaint",
                "action": "assign",
                "conditions": { "complaint.category": "utilities" }
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(permission["conditions"]["complaint.category"], "utilities");

    let (status, body) = app
        .send(
            Request::builder()
                .method("PUT")
                .uri(format!(
                    "/api/v1/roles/{}/permissions/{}",
                    role["id"].as_str().unwrap(),
                    permission["id"].as_str().unwrap()
                ))
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], true);

    let (status, body) = app
        .send(post_json(
            &format!("/api/v1/users/{}/roles", member),
            &token,
            json!({ "role_name": "agent" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], true);

    let (status, body) = app
        .send(post_json(
            &format!("/api/v1/users/{}/roles", member),
            &token,
            json!({ "role_name": "agent" }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], false);

    let (status, _) = app
        .send(post_json(
            "/api/v1/permissions",
            &token,
            json!({
                "name": "complaint.close",
                "resource": "complaint",
                "action": "close",
                "conditions": { "regions": ["north"] }
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_audit_log_listing_requires_permission() {
    let app = TestApp::new();
    let (_, auditor) = app.user(&["audit.read"]).await;
    let (_, outsider) = app.user(&[]).await;

    let (status, _) = app.send(get("/api/v1/audit-logs", &outsider)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(get(
            "/api/v1/audit-logs?action=authorization.denied&limit=10",
            &auditor,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["entity_id"], "audit.read");
}

#[tokio::test]
async fn test_default_roles_endpoint() {
    let app = TestApp::new();
    let (_, admin) = app.user(&["role.manage"]).await;
    let (_, outsider) = app.user(&[]).await;
    let member = Uuid::new_v4();

    let (status, _) = app
        .send(post_json(
            "/api/v1/roles",
            &admin,
            json!({ "name": "reporter", "is_default": true }),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let uri = format!("/api/v1/users/{}/default-roles", member);
    let (status, _) = app.send(post_json(&uri, &outsider, json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send(post_json(&uri, &admin, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], 1);

    let (status, body) = app.send(post_json(&uri, &admin, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assigned"], 0);
}
