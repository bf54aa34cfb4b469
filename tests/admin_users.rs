//! Admin user management through the privileged `admin-users` endpoint,
//! including the activity-log trail behind status changes.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use manduvi_portal::auth::Session;
use manduvi_portal::profile::{AccountStatus, Role};
use manduvi_portal::Portal;

const ANON_KEY: &str = "test-anon-key";

fn admin_session(access_token: &str, user_id: &str) -> Session {
    serde_json::from_value(json!({
        "access_token": access_token,
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "expires_at": Utc::now().timestamp() + 3600,
        "token_type": "bearer",
        "user": {
            "id": user_id,
            "email": "admin@manduvi.org.br"
        }
    }))
    .unwrap()
}

fn account_row(user_id: &str, role: &str, status: &str) -> Value {
    json!({
        "id": user_id,
        "email": format!("{}@example.com", role),
        "role": role,
        "status": status,
        "email_verified": true,
        "phone_verified": false,
        "profile_completed": true,
        "last_login_at": "2024-05-01T12:00:00Z",
        "metadata": {},
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-05-01T12:00:00Z"
    })
}

#[tokio::test]
async fn list_returns_every_account() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/functions/v1/admin-users"))
        .and(header("apikey", ANON_KEY))
        .and(header("authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            account_row("user-a", "admin", "active"),
            account_row("user-b", "usuario", "pending"),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let portal = Portal::new(&mock_server.uri(), ANON_KEY);
    let admin = portal.admin_users();

    let accounts = admin
        .list(&admin_session("admin-token", "admin-1"))
        .await
        .unwrap();

    assert_eq!(accounts.len(), 2);
    assert_eq!(accounts[0].role, Role::Admin);
    assert_eq!(accounts[1].status, AccountStatus::Pending);
}

#[tokio::test]
async fn update_status_records_the_activity() {
    let mock_server = MockServer::start().await;
    let admin_id = Uuid::new_v4().to_string();
    let target_id = Uuid::new_v4().to_string();

    Mock::given(method("PUT"))
        .and(path("/functions/v1/admin-users"))
        .and(header("authorization", "Bearer admin-token"))
        .and(body_json(json!({
            "userId": target_id,
            "status": "suspended"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/admin_activity_log"))
        .and(header("authorization", "Bearer admin-token"))
        .and(body_json(json!({
            "user_id": admin_id,
            "action": "update",
            "entity_type": "user_status",
            "entity_id": target_id,
            "changes": { "status": "suspended" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let portal = Portal::new(&mock_server.uri(), ANON_KEY);
    let admin = portal.admin_users();

    admin
        .update_status(
            &admin_session("admin-token", &admin_id),
            &target_id,
            AccountStatus::Suspended,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn update_status_survives_a_failed_activity_write() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/functions/v1/admin-users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/admin_activity_log"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": "42501",
            "message": "permission denied for table admin_activity_log",
            "details": null,
            "hint": null
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let portal = Portal::new(&mock_server.uri(), ANON_KEY);
    let admin = portal.admin_users();

    admin
        .update_status(
            &admin_session("admin-token", "admin-1"),
            "user-b",
            AccountStatus::Active,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn non_admins_are_rejected_by_the_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/functions/v1/admin-users"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": "Access denied: Admin role required"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/admin_activity_log"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&mock_server)
        .await;

    let portal = Portal::new(&mock_server.uri(), ANON_KEY);
    let admin = portal.admin_users();

    let result = admin
        .update_status(
            &admin_session("user-token", "user-b"),
            "user-c",
            AccountStatus::Suspended,
        )
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("Access denied"));
}
