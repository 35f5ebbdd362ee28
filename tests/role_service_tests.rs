//! 角色与权限管理集成测试

use complaint_desk::{
    error::ErrorKind,
    models::{
        access::{AccessContext, Actor},
        audit::ANONYMOUS_ACTOR,
        role::{CreatePermissionRequest, CreateRoleRequest, UpdateRoleRequest},
    },
    repository::RoleStore,
};
use serde_json::{json, Map, Value};
use uuid::Uuid;

mod common;
use common::TestHarness;

fn admin() -> Actor {
    Actor::new(Uuid::new_v4())
}

fn role_request(name: &str, is_default: bool) -> CreateRoleRequest {
    CreateRoleRequest {
        name: name.to_string(),
        description: None,
        is_default,
    }
}

fn permission_request(name: &str, conditions: Option<Value>) -> CreatePermissionRequest {
    let (resource, action) = name.split_once('.').unwrap();
    CreatePermissionRequest {
        name: name.to_string(),
        resource: resource.to_string(),
        action: action.to_string(),
        description: None,
        conditions: conditions.map(|value| match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }),
    }
}

#[tokio::test]
async fn test_create_role_rejects_duplicates() {
    let harness = TestHarness::new();
    let actor = admin();

    let role = harness
        .roles
        .create_role(&actor, role_request("agent", false))
        .await
        .unwrap();
    assert_eq!(role.name, "agent");

    let err = harness
        .roles
        .create_role(&actor, role_request("agent", true))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = harness
        .roles
        .create_role(&actor, role_request("", false))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(harness.audit_actions().await, vec!["role.create"]);
}

#[tokio::test]
async fn test_rename_onto_existing_name_conflicts() {
    let harness = TestHarness::new();
    let actor = admin();
    harness
        .roles
        .create_role(&actor, role_request("agent", false))
        .await
        .unwrap();
    let supervisor = harness
        .roles
        .create_role(&actor, role_request("supervisor", false))
        .await
        .unwrap();

    let err = harness
        .roles
        .update_role(
            &actor,
            supervisor.id,
            UpdateRoleRequest {
                name: Some("agent".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let updated = harness
        .roles
        .update_role(
            &actor,
            supervisor.id,
            UpdateRoleRequest {
                description: Some("handles escalations".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "supervisor");
    assert_eq!(updated.description.as_deref(), Some("handles escalations"));

    let err = harness
        .roles
        .update_role(&actor, Uuid::new_v4(), UpdateRoleRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_assigned_role_cannot_be_deleted() {
    let harness = TestHarness::new();
    let actor = admin();
    let user_id = Uuid::new_v4();
    let role = harness
        .roles
        .create_role(&actor, role_request("agent", false))
        .await
        .unwrap();
    harness.store.assign_role(user_id, role.id).await.unwrap();

    let err = harness.roles.delete_role(&actor, role.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    harness.store.remove_role(user_id, role.id).await.unwrap();
    harness.roles.delete_role(&actor, role.id).await.unwrap();
    assert!(harness.roles.list_roles().await.unwrap().is_empty());

    let err = harness.roles.delete_role(&actor, role.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_permission_conditions_must_be_scalars() {
    let harness = TestHarness::new();
    let actor = admin();

    let err = harness
        .roles
        .create_permission(
            &actor,
            permission_request(
                "complaint.resolve",
                Some(json!({ "departments": ["billing", "support"] })),
            ),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = harness
        .roles
        .create_permission(
            &actor,
            permission_request("complaint.resolve", Some(json!({ "department": null }))),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let permission = harness
        .roles
        .create_permission(
            &actor,
            permission_request(
                "complaint.resolve",
                Some(json!({ "department": "billing", "level": 2, "senior": true })),
            ),
        )
        .await
        .unwrap();
    assert!(permission.has_conditions());

    let err = harness
        .roles
        .create_permission(&actor, permission_request("complaint.resolve", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_grant_and_revoke_flow_through_to_checks() {
    let harness = TestHarness::new();
    let actor = admin();
    let user_id = Uuid::new_v4();

    let role = harness
        .roles
        .create_role(&actor, role_request("agent", false))
        .await
        .unwrap();
    let permission = harness
        .roles
        .create_permission(&actor, permission_request("complaint.assign", None))
        .await
        .unwrap();

    assert!(harness
        .roles
        .grant_permission_to_role(&actor, role.id, permission.id)
        .await
        .unwrap());
    assert!(!harness
        .roles
        .grant_permission_to_role(&actor, role.id, permission.id)
        .await
        .unwrap());

    harness
        .authz
        .assign_role_to_user(&actor, user_id, "agent")
        .await
        .unwrap();
    let check = harness
        .authz
        .check_permission(&AccessContext::new(user_id), "complaint.assign")
        .await
        .unwrap();
    assert!(check.allowed);

    // 仍挂在角色上的权限不能删除
    let err = harness
        .roles
        .delete_permission(&actor, permission.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert!(harness
        .roles
        .revoke_permission_from_role(&actor, role.id, permission.id)
        .await
        .unwrap());
    assert!(!harness
        .roles
        .revoke_permission_from_role(&actor, role.id, permission.id)
        .await
        .unwrap());

    let check = harness
        .authz
        .check_permission(&AccessContext::new(user_id), "complaint.assign")
        .await
        .unwrap();
    assert!(!check.allowed);

    harness
        .roles
        .delete_permission(&actor, permission.id)
        .await
        .unwrap();

    assert_eq!(
        harness.audit_actions().await,
        vec![
            "role.create",
            "permission.create",
            "role_permission.grant",
            "user_role.assign",
            "role_permission.revoke",
            "permission.delete",
        ]
    );
}

#[tokio::test]
async fn test_grant_unknown_role_or_permission_not_found() {
    let harness = TestHarness::new();
    let actor = admin();
    let role = harness
        .roles
        .create_role(&actor, role_request("agent", false))
        .await
        .unwrap();

    let err = harness
        .roles
        .grant_permission_to_role(&actor, role.id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = harness
        .roles
        .grant_permission_to_role(&actor, Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_default_roles_assigned_once() {
    let harness = TestHarness::new();
    let actor = admin();
    let user_id = Uuid::new_v4();
    harness
        .roles
        .create_role(&actor, role_request("viewer", true))
        .await
        .unwrap();
    harness
        .roles
        .create_role(&actor, role_request("reporter", true))
        .await
        .unwrap();
    harness
        .roles
        .create_role(&actor, role_request("agent", false))
        .await
        .unwrap();

    assert_eq!(
        harness
            .roles
            .assign_default_roles(None, user_id)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        harness
            .roles
            .assign_default_roles(Some(&actor), user_id)
            .await
            .unwrap(),
        0
    );

    // 只有实际新增的分配写入审计
    let entries = harness.audit_entries().await;
    let assignments: Vec<_> = entries
        .iter()
        .filter(|entry| entry.action == "user_role.assign")
        .collect();
    assert_eq!(assignments.len(), 2);
    for entry in &assignments {
        assert_eq!(entry.user_id, ANONYMOUS_ACTOR);
        assert_eq!(entry.entity, "user");
        assert_eq!(entry.entity_id, user_id.to_string());
        assert_eq!(entry.details["default"], true);
    }
    let mut names: Vec<&str> = assignments
        .iter()
        .map(|entry| entry.details["role_name"].as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["reporter", "viewer"]);
}
