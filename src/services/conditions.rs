//! ABAC 条件求值
//! 条件之间为 AND 关系，逐项严格相等比较，遇到第一个不匹配立即返回

use crate::models::{access::Environment, role::Conditions};

/// 权限条件是否全部满足；无条件或空条件总是满足
pub fn conditions_match(conditions: Option<&Conditions>, environment: &Environment) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };

    conditions.iter().all(|(attribute, expected)| {
        environment
            .get(attribute)
            .is_some_and(|actual| expected.matches(actual))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::role::ConditionValue;
    use serde_json::{json, Number};

    fn env(pairs: &[(&str, serde_json::Value)]) -> Environment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_no_conditions_always_match() {
        assert!(conditions_match(None, &Environment::new()));
        assert!(conditions_match(Some(&Conditions::new()), &Environment::new()));
    }

    #[test]
    fn test_all_conditions_must_match() {
        let mut conditions = Conditions::new();
        conditions.insert("department".into(), ConditionValue::String("billing".into()));
        conditions.insert("level".into(), ConditionValue::Number(Number::from(2)));

        let matching = env(&[("department", json!("billing")), ("level", json!(2))]);
        assert!(conditions_match(Some(&conditions), &matching));

        let wrong_value = env(&[("department", json!("support")), ("level", json!(2))]);
        assert!(!conditions_match(Some(&conditions), &wrong_value));

        let missing = env(&[("department", json!("billing"))]);
        assert!(!conditions_match(Some(&conditions), &missing));
    }

    #[test]
    fn test_no_type_coercion() {
        let mut conditions = Conditions::new();
        conditions.insert("level".into(), ConditionValue::Number(Number::from(2)));

        assert!(!conditions_match(Some(&conditions), &env(&[("level", json!("2"))])));
    }

    #[test]
    fn test_extra_environment_keys_ignored() {
        let mut conditions = Conditions::new();
        conditions.insert("vip".into(), ConditionValue::Bool(true));

        let environment = env(&[("vip", json!(true)), ("region", json!("north"))]);
        assert!(conditions_match(Some(&conditions), &environment));
    }
}
