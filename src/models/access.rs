//! Request-scoped access context and permission check results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use super::audit::RequestMeta;

/// Runtime attributes evaluated against permission conditions
pub type Environment = HashMap<String, Value>;

/// Who is asking, for what, under which attributes. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessContext {
    pub user_id: Uuid,
    pub resource: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub environment: Environment,
}

impl AccessContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn for_action(user_id: Uuid, resource: &str, action: &str) -> Self {
        Self {
            user_id,
            resource: Some(resource.to_string()),
            action: Some(action.to_string()),
            environment: Environment::new(),
        }
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }
}

/// The authenticated user performing an operation, with the request
/// attributes that feed ABAC conditions and the audit trail
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: Uuid,
    pub meta: RequestMeta,
    pub environment: Environment,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            meta: RequestMeta::default(),
            environment: Environment::new(),
        }
    }

    pub fn with_meta(mut self, meta: RequestMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }
}

/// Outcome of a permission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionCheck {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Permission check request (HTTP)
#[derive(Debug, Deserialize)]
pub struct CheckPermissionRequest {
    /// Named permission; when absent `resource` + `action` are used
    pub permission: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
    #[serde(default)]
    pub environment: Environment,
}
