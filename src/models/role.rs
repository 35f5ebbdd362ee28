//! Role and permission domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use uuid::Uuid;
use validator::Validate;

/// Role
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Auto-assigned to newly provisioned users
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scalar value a permission condition can expect.
///
/// Conditions are restricted to scalars so that evaluation is a total
/// equality check; arrays, objects and `null` are rejected when the
/// permission is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Number(Number),
    String(String),
}

impl ConditionValue {
    /// Strict equality against a runtime attribute. No type coercion:
    /// `"1"` never equals `1` and `true` never equals `1`.
    pub fn matches(&self, actual: &Value) -> bool {
        match (self, actual) {
            (ConditionValue::Bool(expected), Value::Bool(actual)) => expected == actual,
            (ConditionValue::String(expected), Value::String(actual)) => expected == actual,
            (ConditionValue::Number(expected), Value::Number(actual)) => {
                numbers_equal(expected, actual)
            }
            _ => false,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ConditionValue::Bool(*b)),
            Value::Number(n) => Some(ConditionValue::Number(n.clone())),
            Value::String(s) => Some(ConditionValue::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Attribute name -> expected value
pub type Conditions = BTreeMap<String, ConditionValue>;

/// Convert a loose JSON object into typed conditions, rejecting non-scalars.
pub fn parse_conditions(raw: &Map<String, Value>) -> Result<Conditions, String> {
    let mut conditions = Conditions::new();
    for (key, value) in raw {
        if key.trim().is_empty() {
            return Err("condition attribute names must not be blank".to_string());
        }
        let parsed = ConditionValue::from_json(value).ok_or_else(|| {
            format!(
                "condition '{}' must be a string, number or boolean",
                key
            )
        })?;
        conditions.insert(key.clone(), parsed);
    }
    Ok(conditions)
}

/// Permission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    /// Globally unique, e.g. `complaint.resolve`
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub conditions: Option<Conditions>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn has_conditions(&self) -> bool {
        self.conditions.as_ref().is_some_and(|c| !c.is_empty())
    }
}

/// Create role request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "role name must be 1-64 characters"))]
    pub name: String,
    #[validate(length(max = 512))]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Update role request
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    #[validate(length(min = 1, max = 64, message = "role name must be 1-64 characters"))]
    pub name: Option<String>,
    #[validate(length(max = 512))]
    pub description: Option<String>,
    pub is_default: Option<bool>,
}

/// Create permission request
#[derive(Debug, Deserialize, Validate)]
pub struct CreatePermissionRequest {
    #[validate(length(min = 1, max = 128, message = "permission name must be 1-128 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub resource: String,
    #[validate(length(min = 1, max = 64))]
    pub action: String,
    pub description: Option<String>,
    pub conditions: Option<Map<String, Value>>,
}

/// A permission ready to be stored (conditions already validated)
#[derive(Debug, Clone)]
pub struct NewPermission {
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
    pub conditions: Option<Conditions>,
}

/// Assign role request
#[derive(Debug, Deserialize, Validate)]
pub struct AssignRoleRequest {
    #[validate(length(min = 1, max = 64))]
    pub role_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_value_strict_equality() {
        assert!(ConditionValue::String("billing".into()).matches(&json!("billing")));
        assert!(!ConditionValue::String("1".into()).matches(&json!(1)));
        assert!(ConditionValue::Bool(true).matches(&json!(true)));
        assert!(!ConditionValue::Bool(true).matches(&json!(1)));
        assert!(!ConditionValue::Bool(false).matches(&Value::Null));
    }

    #[test]
    fn test_condition_value_number_equality() {
        let two = ConditionValue::Number(Number::from(2));
        assert!(two.matches(&json!(2)));
        assert!(two.matches(&json!(2.0)));
        assert!(!two.matches(&json!(3)));
        assert!(!two.matches(&json!("2")));

        let big = ConditionValue::Number(Number::from(u64::MAX));
        assert!(big.matches(&json!(u64::MAX)));
        assert!(!big.matches(&json!(i64::MAX)));
    }

    #[test]
    fn test_parse_conditions_rejects_non_scalars() {
        let raw = json!({"department": "billing", "level": 2, "vip": false});
        let conditions = parse_conditions(raw.as_object().unwrap()).unwrap();
        assert_eq!(conditions.len(), 3);

        for bad in [json!({"x": null}), json!({"x": [1]}), json!({"x": {"y": 1}})] {
            let err = parse_conditions(bad.as_object().unwrap()).unwrap_err();
            assert!(err.contains("'x'"));
        }

        assert!(parse_conditions(json!({" ": 1}).as_object().unwrap()).is_err());
    }

    #[test]
    fn test_conditions_deserialize_untagged() {
        let conditions: Conditions =
            serde_json::from_value(json!({"region": "north", "tier": 3})).unwrap();
        assert_eq!(
            conditions.get("region"),
            Some(&ConditionValue::String("north".into()))
        );
        assert!(serde_json::from_value::<Conditions>(json!({"x": [1]})).is_err());
    }

    #[test]
    fn test_create_role_request_validation() {
        let ok = CreateRoleRequest {
            name: "agent".into(),
            description: None,
            is_default: false,
        };
        assert!(ok.validate().is_ok());

        let blank = CreateRoleRequest {
            name: "".into(),
            description: None,
            is_default: false,
        };
        assert!(blank.validate().is_err());
    }
}
