//! HTTP 中间件
//! 请求追踪、请求元数据提取、当前操作者解析

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{AuthContext, JwtService},
    config::{AuditConfig, AuthorizationConfig, SecurityConfig},
    error::AppError,
    models::{access::Actor, audit::RequestMeta},
    realtime::EventBus,
    repository::{AuditStore, ComplaintStore, RoleStore},
    services::{AuditRecorder, AuthorizationService, ComplaintWorkflowService, RoleService},
};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// 健康检查用；内存模式下为 None
    pub db: Option<sqlx::PgPool>,
    pub trust_proxy: bool,
    pub authz: Arc<AuthorizationService>,
    pub roles: Arc<RoleService>,
    pub workflow: Arc<ComplaintWorkflowService>,
    pub audit: Arc<AuditRecorder>,
    pub jwt_service: Arc<JwtService>,
    pub event_bus: EventBus,
}

impl AppState {
    /// 组装所有服务（需在 tokio 运行时内调用，审计后台任务随之启动）
    pub fn assemble(
        db: Option<sqlx::PgPool>,
        role_store: Arc<dyn RoleStore>,
        complaint_store: Arc<dyn ComplaintStore>,
        audit_store: Arc<dyn AuditStore>,
        security: &SecurityConfig,
        authorization: AuthorizationConfig,
        audit: AuditConfig,
    ) -> Result<Self, AppError> {
        let jwt_service = Arc::new(JwtService::from_config(security)?);
        let event_bus = EventBus::default();

        let audit = Arc::new(AuditRecorder::new(audit_store, audit));
        let authz = Arc::new(AuthorizationService::new(
            role_store.clone(),
            audit.clone(),
            authorization,
        ));
        let roles = Arc::new(RoleService::new(role_store, audit.clone()));
        let workflow = Arc::new(ComplaintWorkflowService::new(
            complaint_store,
            authz.clone(),
            audit.clone(),
            event_bus.clone(),
        ));

        Ok(Self {
            db,
            trust_proxy: security.trust_proxy,
            authz,
            roles,
            workflow,
            audit,
            jwt_service,
            event_bus,
        })
    }
}

const MAX_USER_AGENT_LEN: usize = 512;

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();
        let mut response = next.run(req).await;
        let elapsed = start.elapsed();

        let status = response.status().as_u16();
        let status_class = match status {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        };
        metrics::counter!("http_requests_total", "status" => status_class).increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 提取客户端 IP 与 User-Agent；任何解析失败都降级为 None
pub fn extract_request_meta(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy: bool,
) -> RequestMeta {
    RequestMeta {
        ip_address: client_ip(headers, peer, trust_proxy).map(|ip| ip.to_string()),
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect()),
    }
}

/// 获取客户端 IP 地址
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        // X-Forwarded-For 可能包含多个 IP，取第一个
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|first| first.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok());
        if real_ip.is_some() {
            return real_ip;
        }
    }

    peer.map(|addr| addr.ip())
}

/// 当前操作者：已认证用户 + 请求元数据 + 令牌中的属性
pub struct CurrentActor(pub Actor);

impl FromRequestParts<Arc<AppState>> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);
        let meta = extract_request_meta(&parts.headers, peer, state.trust_proxy);

        Ok(CurrentActor(
            Actor::new(auth.user_id)
                .with_meta(meta)
                .with_environment(auth.attributes),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());
        assert_eq!(extract_or_generate_trace_id(&headers), "test-trace-123");

        let generated = extract_or_generate_trace_id(&HeaderMap::new());
        assert!(Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn test_forwarded_first_hop_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("user-agent", "curl/8.0".parse().unwrap());

        let meta = extract_request_meta(&headers, None, true);
        assert_eq!(meta.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.0"));
    }

    #[test]
    fn test_proxy_headers_ignored_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        let peer: SocketAddr = "192.0.2.1:5555".parse().unwrap();

        let meta = extract_request_meta(&headers, Some(peer), false);
        assert_eq!(meta.ip_address.as_deref(), Some("192.0.2.1"));
    }

    #[test]
    fn test_garbage_degrades_to_none() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        headers.insert("x-real-ip", "also bad".parse().unwrap());

        let meta = extract_request_meta(&headers, None, true);
        assert_eq!(meta, RequestMeta::default());
    }

    #[test]
    fn test_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "2001:db8::1".parse().unwrap());

        let meta = extract_request_meta(&headers, None, true);
        assert_eq!(meta.ip_address.as_deref(), Some("2001:db8::1"));
    }
}
