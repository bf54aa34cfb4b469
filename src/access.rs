//! Route gating.
//!
//! Pure evaluation of an [`AuthSnapshot`] against what a guarded area
//! requires. The portal's shells map the decision onto their own
//! navigation; nothing here blocks or redirects by itself.

use crate::state::{AuthPhase, AuthSnapshot};

/// What a guarded area requires of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRequirement {
    /// Any signed-in user.
    Authenticated,
    /// A signed-in user whose profile carries the admin role.
    Admin,
}

/// Outcome of evaluating a snapshot against a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// The auth state has not settled; show progress and decide later.
    Pending,
    /// Bootstrap failed; offer a retry rather than a sign-in redirect.
    Failed,
    /// Nobody is signed in; go to sign-in.
    SignedOut,
    /// Signed in, but the required role is missing.
    Denied,
    /// Allowed through.
    Granted,
}

/// Decides whether the caller may enter. Checks run in the same order the
/// portal's screens apply them: settling first, then failure, then
/// identity, then role.
pub fn evaluate(snapshot: &AuthSnapshot, requirement: AccessRequirement) -> AccessDecision {
    match snapshot.phase {
        AuthPhase::Idle | AuthPhase::Loading => return AccessDecision::Pending,
        AuthPhase::Ready => {}
    }

    if snapshot.error.is_some() {
        return AccessDecision::Failed;
    }

    if !snapshot.is_authenticated() {
        return AccessDecision::SignedOut;
    }

    match requirement {
        AccessRequirement::Authenticated => AccessDecision::Granted,
        AccessRequirement::Admin if snapshot.is_admin() => AccessDecision::Granted,
        AccessRequirement::Admin => AccessDecision::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Profile, ProfileOrigin, Role};
    use crate::state::SessionStore;
    use chrono::Utc;
    use std::collections::HashMap;

    use manduvi_portal_auth::{Session, User};

    fn session_for(role: Role) -> (Session, Profile) {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": "user-1",
            "email": "ana@example.com"
        }))
        .unwrap();

        let session = Session {
            access_token: "jwt".to_string(),
            refresh_token: "refresh".to_string(),
            expires_in: 3600,
            expires_at: Some(Utc::now().timestamp() + 3600),
            token_type: "bearer".to_string(),
            user,
        };

        let profile = Profile {
            id: "user-1".to_string(),
            email: "ana@example.com".to_string(),
            role,
            status: crate::profile::AccountStatus::Active,
            email_verified: true,
            phone_verified: false,
            profile_completed: true,
            last_login_at: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            name: None,
        };

        (session, profile)
    }

    fn signed_in_snapshot(role: Role) -> AuthSnapshot {
        let store = SessionStore::new();
        let generation = store.begin_loading();
        let (session, profile) = session_for(role);
        store.set_session(generation, Some(session));
        store.set_profile(generation, profile, ProfileOrigin::Stored);
        store.snapshot()
    }

    #[test]
    fn unsettled_state_waits() {
        let store = SessionStore::new();
        assert_eq!(
            evaluate(&store.snapshot(), AccessRequirement::Authenticated),
            AccessDecision::Pending
        );

        store.begin_loading();
        assert_eq!(
            evaluate(&store.snapshot(), AccessRequirement::Admin),
            AccessDecision::Pending
        );
    }

    #[test]
    fn bootstrap_failure_asks_for_a_retry() {
        let store = SessionStore::new();
        let generation = store.begin_loading();
        store.fail_bootstrap(generation, "network down");

        assert_eq!(
            evaluate(&store.snapshot(), AccessRequirement::Authenticated),
            AccessDecision::Failed
        );
    }

    #[test]
    fn anonymous_users_are_sent_to_sign_in() {
        let store = SessionStore::new();
        let generation = store.begin_loading();
        store.set_anonymous(generation);

        assert_eq!(
            evaluate(&store.snapshot(), AccessRequirement::Authenticated),
            AccessDecision::SignedOut
        );
    }

    #[test]
    fn plain_users_cannot_enter_the_admin_area() {
        let snapshot = signed_in_snapshot(Role::Usuario);

        assert_eq!(
            evaluate(&snapshot, AccessRequirement::Authenticated),
            AccessDecision::Granted
        );
        assert_eq!(
            evaluate(&snapshot, AccessRequirement::Admin),
            AccessDecision::Denied
        );
    }

    #[test]
    fn admins_enter_everywhere() {
        let snapshot = signed_in_snapshot(Role::Admin);

        assert_eq!(
            evaluate(&snapshot, AccessRequirement::Authenticated),
            AccessDecision::Granted
        );
        assert_eq!(
            evaluate(&snapshot, AccessRequirement::Admin),
            AccessDecision::Granted
        );
    }
}
