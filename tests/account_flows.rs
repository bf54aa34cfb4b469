//! Credential flows through the session manager: sign-in with profile row
//! synchronization, sign-up, sign-out and password recovery.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use manduvi_portal::auth::{AuthError, Session, SignUp};
use manduvi_portal::config::{BootstrapOptions, ClientOptions};
use manduvi_portal::error::Error;
use manduvi_portal::profile::Role;
use manduvi_portal::state::{AuthPhase, AuthSnapshot};
use manduvi_portal::Portal;

const ANON_KEY: &str = "test-anon-key";

fn portal_for(server: &MockServer) -> Portal {
    let bootstrap = BootstrapOptions::default().with_backoff_base(Duration::from_millis(10));
    let options = ClientOptions::default().with_bootstrap(bootstrap);
    Portal::new_with_options(&server.uri(), ANON_KEY, options)
}

fn session_body(access_token: &str, user_id: &str) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": "refresh-1",
        "expires_in": 3600,
        "expires_at": Utc::now().timestamp() + 3600,
        "token_type": "bearer",
        "user": {
            "id": user_id,
            "email": "ana@example.com",
            "email_confirmed_at": "2024-01-01T00:00:00Z",
            "user_metadata": { "name": "Ana Lima" }
        }
    })
}

fn session(access_token: &str, user_id: &str) -> Session {
    serde_json::from_value(session_body(access_token, user_id)).unwrap()
}

fn no_rows_body() -> Value {
    json!({
        "code": "PGRST116",
        "message": "JSON object requested, multiple (or no) rows returned",
        "details": "The result contains 0 rows",
        "hint": null
    })
}

async fn wait_for(
    changes: &mut broadcast::Receiver<AuthSnapshot>,
    predicate: impl Fn(&AuthSnapshot) -> bool,
) -> AuthSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = changes.recv().await.expect("snapshot feed closed");
            if predicate(&snapshot) {
                return snapshot;
            }
        }
    })
    .await
    .expect("expected auth state never arrived")
}

#[test]
fn sign_in_creates_the_missing_profile_row() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;
        let user_id = Uuid::new_v4().to_string();

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(body_json(json!({
                "email": "ana@example.com",
                "password": "segredo123"
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(session_body("token-9", &user_id)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        // Read twice: once by the row sync, once by the sign-in listener.
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .and(query_param("id", format!("eq.{}", user_id)))
            .respond_with(ResponseTemplate::new(406).set_body_json(no_rows_body()))
            .expect(2)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/users"))
            .and(header("prefer", "return=representation"))
            .and(header("authorization", "Bearer token-9"))
            .and(body_partial_json(json!({
                "id": user_id,
                "role": "usuario",
                "status": "active",
                "profile_completed": true
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "id": user_id }])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        let manager = portal.session_manager();
        let mut changes = manager.subscribe();

        let signed_in = manager.sign_in("ana@example.com", "segredo123").await.unwrap();
        assert_eq!(signed_in.access_token, "token-9");

        let settled = wait_for(&mut changes, |snapshot| {
            snapshot.phase == AuthPhase::Ready && snapshot.profile.is_some()
        })
        .await;

        assert!(settled.is_authenticated());
        assert_eq!(settled.profile.unwrap().role, Role::Usuario);
        assert!(settled.error.is_none());
    });
}

#[test]
fn sign_in_refreshes_the_existing_profile_row() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;
        let user_id = Uuid::new_v4().to_string();

        let stored_row = json!({
            "id": user_id,
            "email": "ana@example.com",
            "role": "colaborador",
            "status": "active",
            "email_verified": true,
            "phone_verified": false,
            "profile_completed": true,
            "last_login_at": "2024-05-01T09:00:00Z",
            "metadata": { "theme": "dark", "name": "Old Name" },
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-05-01T09:00:00Z"
        });

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(session_body("token-8", &user_id)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        // Read twice: once by the row sync, once by the sign-in listener.
        Mock::given(method("GET"))
            .and(path("/rest/v1/users"))
            .and(query_param("id", format!("eq.{}", user_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(stored_row.clone()))
            .expect(2)
            .mount(&mock_server)
            .await;

        // Stored keys survive the merge, identity keys win.
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/users"))
            .and(query_param("id", format!("eq.{}", user_id)))
            .and(header("prefer", "return=representation"))
            .and(header("authorization", "Bearer token-8"))
            .and(body_partial_json(json!({
                "metadata": { "theme": "dark", "name": "Ana Lima" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([stored_row])))
            .expect(1)
            .mount(&mock_server)
            .await;

        // A returning user must never be re-inserted.
        Mock::given(method("POST"))
            .and(path("/rest/v1/users"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .expect(0)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        let manager = portal.session_manager();
        let mut changes = manager.subscribe();

        let signed_in = manager.sign_in("ana@example.com", "segredo123").await.unwrap();
        assert_eq!(signed_in.access_token, "token-8");

        let settled = wait_for(&mut changes, |snapshot| {
            snapshot.phase == AuthPhase::Ready && snapshot.profile.is_some()
        })
        .await;

        let profile = settled.profile.unwrap();
        assert_eq!(profile.role, Role::Colaborador);
        assert_eq!(profile.metadata["theme"], "dark");
        assert!(settled.error.is_none());
    });
}

#[test]
fn rejected_credentials_surface_on_the_snapshot() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_description": "Invalid login credentials"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        let manager = portal.session_manager();

        let result = manager.sign_in("ana@example.com", "errada").await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::AuthenticationError(_)))
        ));

        let snapshot = manager.snapshot();
        assert!(!snapshot.is_authenticated());
        assert_eq!(snapshot.phase, AuthPhase::Idle);
        assert_eq!(
            snapshot.error.as_deref(),
            Some("Authentication error: Invalid login credentials")
        );
    });
}

#[test]
fn sign_up_pending_confirmation_skips_the_row_sync() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;
        let user_id = Uuid::new_v4().to_string();

        Mock::given(method("POST"))
            .and(path("/auth/v1/signup"))
            .and(body_partial_json(json!({ "email": "novo@example.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": user_id,
                "email": "novo@example.com",
                "user_metadata": { "name": "Novo Usuário" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        let manager = portal.session_manager();

        let outcome = manager
            .sign_up(
                "novo@example.com",
                "segredo123",
                Some(json!({ "name": "Novo Usuário" })),
            )
            .await
            .unwrap();

        match outcome {
            SignUp::ConfirmationPending(user) => assert_eq!(user.id, user_id),
            SignUp::Session(_) => panic!("confirmation-pending sign-up produced a session"),
        }

        // Nothing signed in, so the store never left its initial state.
        assert_eq!(manager.snapshot().phase, AuthPhase::Idle);
    });
}

#[test]
fn sign_out_settles_the_anonymous_state() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        portal.auth.set_session(session("token-1", "user-1"));

        let manager = portal.session_manager();
        manager.sign_out().await.unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.phase, AuthPhase::Ready);
        assert!(!snapshot.is_authenticated());
        assert!(snapshot.session.is_none());
        assert!(snapshot.profile.is_none());
    });
}

#[test]
fn sign_out_clears_the_state_even_when_the_server_fails() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        portal.auth.set_session(session("token-1", "user-1"));

        let manager = portal.session_manager();
        assert!(manager.sign_out().await.is_err());

        let snapshot = manager.snapshot();
        assert!(!snapshot.is_authenticated());
        assert_eq!(snapshot.phase, AuthPhase::Ready);
    });
}

#[test]
fn reset_password_posts_the_recovery_request() {
    tokio_test::block_on(async {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/v1/recover"))
            .and(body_json(json!({ "email": "ana@example.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let portal = portal_for(&mock_server);
        let manager = portal.session_manager();

        manager.reset_password("ana@example.com").await.unwrap();
    });
}
