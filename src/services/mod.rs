//! Business logic services layer

pub mod audit_service;
pub mod authorization_service;
pub mod conditions;
pub mod role_service;
pub mod workflow_service;

pub use audit_service::{AuditAction, AuditRecorder};
pub use authorization_service::AuthorizationService;
pub use role_service::RoleService;
pub use workflow_service::ComplaintWorkflowService;
